use anyhow::Result;
use repofs::backing_store::BackingStore;
use repofs::config::SyncConfig;
use repofs::fuse::ROOT_INO;
use repofs::sync::SyncManager;
use std::sync::Arc;
use std::time::Duration;

use crate::common::mock_source::RecordingSource;
use crate::common::setup::memory_tree;

#[tokio::test(start_paused = true)]
async fn test_full_queue_never_blocks_and_keeps_dirty_state() -> Result<()> {
    let (tree, _store, mut events) = memory_tree(2);

    // Nobody consumes the queue; every create past the second drops its event
    for i in 0..5 {
        tree.create(ROOT_INO, &format!("f{}", i))?;
    }
    assert_eq!(tree.notifier().dropped_count(), 3);
    assert_eq!(tree.list(ROOT_INO)?.len(), 5);

    let source = Arc::new(RecordingSource::default());
    let manager = SyncManager::new(source.clone(), SyncConfig::default());
    let mut accepted = 0;
    while let Ok(event) = events.try_recv() {
        manager.record(&event).await;
        accepted += 1;
    }
    assert_eq!(accepted, 2);
    assert!(manager.status().await.dirty);

    tokio::time::advance(Duration::from_secs(2)).await;
    assert!(manager.on_tick().await);
    assert_eq!(source.commits(), 1);
    assert!(!manager.status().await.dirty);
    Ok(())
}

#[test]
fn test_notify_after_receiver_dropped_does_not_fail() -> Result<()> {
    let (tree, store, events) = memory_tree(1);
    drop(events);

    let file = tree.create(ROOT_INO, "orphan.txt")?;
    tree.write(file.ino, 0, b"still written")?;
    tree.flush(file.ino)?;

    assert_eq!(store.read("/orphan.txt")?, b"still written");
    assert_eq!(tree.notifier().dropped_count(), 0);
    Ok(())
}

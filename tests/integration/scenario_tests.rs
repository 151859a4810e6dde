use anyhow::Result;
use repofs::backing_store::BackingStore;
use repofs::fuse::ROOT_INO;
use repofs::sync::ChangeKind;
use repofs::{FsError, RepoService};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::common::mock_source::RecordingSource;
use crate::common::setup::{memory_tree, test_settings};

#[test]
fn test_create_write_fsync_reaches_backing_store() -> Result<()> {
    let (tree, store, mut events) = memory_tree(16);

    let dir = tree.mkdir(ROOT_INO, "a", 0o755)?;
    let file = tree.create(dir.ino, "b.txt")?;
    assert_eq!(tree.write(file.ino, 0, b"hello")?, 5);
    tree.flush(file.ino)?;

    assert_eq!(store.read("/a/b.txt")?, b"hello");

    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        kinds.push((event.path, event.kind));
    }
    assert_eq!(
        kinds,
        vec![
            ("/a".to_string(), ChangeKind::Mkdir),
            ("/a/b.txt".to_string(), ChangeKind::Create),
            ("/a/b.txt".to_string(), ChangeKind::Write),
        ]
    );
    println!("✅ /a/b.txt flushed to the backing store");
    Ok(())
}

#[test]
fn test_adjacent_writes_read_back_joined() -> Result<()> {
    let (tree, _store, _events) = memory_tree(16);

    let file = tree.create(ROOT_INO, "x.txt")?;
    tree.write(file.ino, 0, b"AB")?;
    tree.write(file.ino, 2, b"CD")?;

    assert_eq!(tree.read(file.ino, 0, 4)?, b"ABCD");
    assert_eq!(tree.getattr(file.ino)?.size, 4);
    Ok(())
}

#[test]
fn test_write_past_end_zero_fills_gap() -> Result<()> {
    let (tree, _store, _events) = memory_tree(16);

    let file = tree.create(ROOT_INO, "sparse.bin")?;
    tree.write(file.ino, 0, b"ab")?;
    tree.write(file.ino, 6, b"z")?;

    assert_eq!(tree.read(file.ino, 0, 100)?, b"ab\0\0\0\0z");
    assert!(tree.read(file.ino, 100, 10)?.is_empty());
    Ok(())
}

#[test]
fn test_truncate_then_grow() -> Result<()> {
    let (tree, store, _events) = memory_tree(16);

    let file = tree.create(ROOT_INO, "t.txt")?;
    tree.write(file.ino, 0, b"abcdef")?;
    tree.setattr(file.ino, Some(3), None)?;
    assert_eq!(tree.read(file.ino, 0, 10)?, b"abc");

    tree.setattr(file.ino, Some(5), None)?;
    tree.flush(file.ino)?;
    assert_eq!(store.read("/t.txt")?, b"abc\0\0");
    Ok(())
}

#[test]
fn test_rename_preserves_content() -> Result<()> {
    let (tree, store, _events) = memory_tree(16);

    let docs = tree.mkdir(ROOT_INO, "docs", 0o755)?;
    let file = tree.create(ROOT_INO, "a.txt")?;
    tree.write(file.ino, 0, b"draft")?;
    tree.flush(file.ino)?;
    tree.write(file.ino, 0, b"final")?;

    tree.rename(ROOT_INO, "a.txt", docs.ino, "b.txt", 0)?;

    assert!(matches!(tree.lookup(ROOT_INO, "a.txt"), Err(FsError::NotFound(_))));
    let moved = tree.resolve("/docs/b.txt")?;
    assert_eq!(moved, file.ino);
    assert_eq!(tree.read(moved, 0, 16)?, b"final");

    tree.flush(moved)?;
    assert_eq!(store.read("/docs/b.txt")?, b"final");
    assert!(store.stat("/a.txt").is_err());
    Ok(())
}

#[test]
fn test_rmdir_with_children_leaves_tree_unchanged() -> Result<()> {
    let (tree, store, _events) = memory_tree(16);

    let dir = tree.mkdir(ROOT_INO, "full", 0o755)?;
    tree.create(dir.ino, "keep.txt")?;

    let err = tree.rmdir(ROOT_INO, "full").unwrap_err();
    assert!(matches!(err, FsError::NotEmpty(_)));
    assert_eq!(err.errno(), libc::ENOTEMPTY);

    assert_eq!(tree.lookup(ROOT_INO, "full")?.ino, dir.ino);
    assert_eq!(tree.list(dir.ino)?.len(), 1);
    assert!(store.stat("/full/keep.txt").is_ok());
    Ok(())
}

#[test]
fn test_cross_tree_rename_is_rejected() -> Result<()> {
    let (first, _store_a, _events_a) = memory_tree(16);
    let (second, _store_b, _events_b) = memory_tree(16);
    first.create(ROOT_INO, "f")?;

    let err = first
        .rename_into(ROOT_INO, "f", &second, ROOT_INO, "f", 0)
        .unwrap_err();
    assert!(matches!(err, FsError::CrossDeviceNotSupported));
    assert_eq!(err.errno(), libc::EXDEV);
    assert!(first.lookup(ROOT_INO, "f").is_ok());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_burst_of_changes_yields_one_commit_after_silence() -> Result<()> {
    let source = Arc::new(RecordingSource::default());
    let store = Arc::new(repofs::backing_store::MemoryWorkTree::new());
    let service = RepoService::start(store, source.clone(), &test_settings())?;
    let tree = service.tree.clone();
    let start = Instant::now();

    let file = tree.create(ROOT_INO, "notes.txt")?;
    tokio::time::sleep(Duration::from_millis(500)).await;
    tree.write(file.ino, 0, b"one")?;
    tree.flush(file.ino)?;
    tokio::time::sleep(Duration::from_millis(500)).await;
    tree.write(file.ino, 3, b" two")?;
    tree.flush(file.ino)?;

    // Last change at 1.0s; nothing may run before 3.0s
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(source.commits(), 0);

    tokio::time::sleep(Duration::from_millis(2500)).await;
    let pushes = source.pushes();
    assert_eq!(source.commits(), 1);
    assert_eq!(pushes.len(), 1);
    assert!(pushes[0].duration_since(start) >= Duration::from_secs(3));

    let status = service.stop().await;
    assert!(!status.dirty);
    assert_eq!(status.cycles, 1);
    println!("✅ Three changes coalesced into one commit");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_transient_push_failures_are_retried_on_later_ticks() -> Result<()> {
    let source = Arc::new(RecordingSource::default());
    source.fail_next_pushes(2);
    let store = Arc::new(repofs::backing_store::MemoryWorkTree::new());
    let service = RepoService::start(store, source.clone(), &test_settings())?;

    service.tree.mkdir(ROOT_INO, "dir", 0o755)?;
    tokio::time::sleep(Duration::from_secs(10)).await;

    let status = service.sync_task.status().await;
    assert!(!status.dirty);
    assert!(!status.suspended);
    assert_eq!(source.commits(), 3);
    assert_eq!(source.pushes().len(), 1);

    service.stop().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_stop_flushes_and_delivers_pending_changes() -> Result<()> {
    let source = Arc::new(RecordingSource::default());
    let store = Arc::new(repofs::backing_store::MemoryWorkTree::new());
    let service = RepoService::start(store.clone(), source.clone(), &test_settings())?;

    let file = service.tree.create(ROOT_INO, "unsaved.txt")?;
    service.tree.write(file.ino, 0, b"pending")?;

    let status = service.stop().await;
    assert_eq!(store.read("/unsaved.txt")?, b"pending");
    assert_eq!(source.commits(), 1);
    assert!(!status.dirty);
    Ok(())
}

use anyhow::{bail, Result};
use repofs::config::Settings;
use repofs::fuse::ROOT_INO;
use repofs::RepoService;
use std::sync::Arc;
use std::time::Duration;

use crate::common::fixtures::{
    identity, remote_commit_count, remote_file, remote_head_author, SEED_CONTENT, SEED_FILE,
};
use crate::common::setup::{test_settings, GitEnv};

fn fast_settings() -> repofs::config::Settings {
    let mut settings = test_settings();
    settings.sync.tick_interval = Duration::from_millis(50);
    settings.sync.quiescence = Duration::from_millis(500);
    settings
}

#[tokio::test]
async fn test_edits_are_committed_and_pushed_on_stop() -> Result<()> {
    let env = GitEnv::new()?;
    let service = RepoService::start(env.store.clone(), Arc::new(env.repo.clone()), &test_settings())?;
    let tree = service.tree.clone();

    assert_eq!(tree.read(tree.resolve(&format!("/{}", SEED_FILE))?, 0, 100)?, SEED_CONTENT.as_bytes());

    let dir = tree.mkdir(ROOT_INO, "a", 0o755)?;
    let file = tree.create(dir.ino, "b.txt")?;
    tree.write(file.ino, 0, b"hello")?;

    let status = service.stop().await;
    assert!(!status.dirty, "final sync failed: {:?}", status.last_error);

    assert_eq!(remote_file(&env.remote_path(), "a/b.txt").as_deref(), Some(&b"hello"[..]));
    assert_eq!(remote_commit_count(&env.remote_path()), 2);
    assert_eq!(remote_head_author(&env.remote_path()), Some(identity().name));
    println!("✅ Changes pushed to the bare remote");
    Ok(())
}

#[tokio::test]
async fn test_quiet_period_triggers_one_push() -> Result<()> {
    let env = GitEnv::new()?;
    let service = RepoService::start(env.store.clone(), Arc::new(env.repo.clone()), &fast_settings())?;
    let tree = service.tree.clone();

    for name in ["one.txt", "two.txt", "three.txt"] {
        let file = tree.create(ROOT_INO, name)?;
        tree.write(file.ino, 0, name.as_bytes())?;
        tree.flush(file.ino)?;
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let status = service.sync_task.status().await;
        if status.cycles > 0 && !status.dirty {
            break;
        }
        if tokio::time::Instant::now() > deadline {
            bail!("no sync cycle within 10s: {:?}", status);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    assert_eq!(remote_commit_count(&env.remote_path()), 2);
    for name in ["one.txt", "two.txt", "three.txt"] {
        assert_eq!(remote_file(&env.remote_path(), name).as_deref(), Some(name.as_bytes()));
    }

    service.stop().await;
    assert_eq!(remote_commit_count(&env.remote_path()), 2);
    Ok(())
}

#[tokio::test]
async fn test_rename_and_delete_reach_remote() -> Result<()> {
    let env = GitEnv::new()?;
    let service = RepoService::start(env.store.clone(), Arc::new(env.repo.clone()), &test_settings())?;
    let tree = service.tree.clone();

    let docs = tree.mkdir(ROOT_INO, "docs", 0o755)?;
    tree.rename(ROOT_INO, SEED_FILE, docs.ino, "GUIDE.md", 0)?;
    let scratch = tree.create(ROOT_INO, "scratch.txt")?;
    tree.write(scratch.ino, 0, b"tmp")?;
    tree.flush(scratch.ino)?;
    tree.unlink(ROOT_INO, "scratch.txt")?;

    assert!(!env.work_tree_path().join(SEED_FILE).exists());
    assert!(env.work_tree_path().join("docs/GUIDE.md").is_file());

    let status = service.stop().await;
    assert!(!status.dirty, "final sync failed: {:?}", status.last_error);

    let remote = env.remote_path();
    assert_eq!(remote_file(&remote, SEED_FILE), None);
    assert_eq!(remote_file(&remote, "scratch.txt"), None);
    assert_eq!(remote_file(&remote, "docs/GUIDE.md").as_deref(), Some(SEED_CONTENT.as_bytes()));
    Ok(())
}

#[tokio::test]
async fn test_sync_now_without_changes_adds_no_commit() -> Result<()> {
    let env = GitEnv::new()?;
    let service = RepoService::start(env.store.clone(), Arc::new(env.repo.clone()), &test_settings())?;

    service.sync_task.sync_now().await?;
    assert_eq!(remote_commit_count(&env.remote_path()), 1);

    let status = service.stop().await;
    assert_eq!(status.cycles, 1);
    Ok(())
}

#[tokio::test]
async fn test_default_clone_depth_works_with_local_remote() -> Result<()> {
    let depth = Settings::default().clone_depth;
    assert_eq!(depth, Some(1));
    let env = GitEnv::with_depth(depth)?;
    let service = RepoService::start(env.store.clone(), Arc::new(env.repo.clone()), &test_settings())?;

    let file = service.tree.create(ROOT_INO, "local.txt")?;
    service.tree.write(file.ino, 0, b"from a path remote")?;

    let status = service.stop().await;
    assert!(!status.dirty, "final sync failed: {:?}", status.last_error);
    assert_eq!(
        remote_file(&env.remote_path(), "local.txt").as_deref(),
        Some(&b"from a path remote"[..])
    );
    Ok(())
}

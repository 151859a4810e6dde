//! Needs /dev/fuse and fusermount; run with `--features integration-tests`
use anyhow::{Context, Result};
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

use crate::common::fixtures::{remote_file, SEED_CONTENT, SEED_FILE};
use crate::common::setup::{test_settings, GitEnv};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_mount_write_unmount_pushes() -> Result<()> {
    let env = GitEnv::new()?;
    let mount_dir = TempDir::new().context("Failed to create mount point")?;
    let mountpoint = mount_dir.path().to_path_buf();

    let handle = repofs::mount(&mountpoint, env.store.clone(), Arc::new(env.repo.clone()), &test_settings()).await?;

    let check = mountpoint.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        assert_eq!(fs::read_to_string(check.join(SEED_FILE))?, SEED_CONTENT);
        assert!(!check.join(".git").exists());

        fs::create_dir(check.join("notes"))?;
        fs::write(check.join("notes/today.md"), "mounted write")?;
        fs::rename(check.join(SEED_FILE), check.join("notes/README.md"))?;

        let mut names: Vec<String> = fs::read_dir(check.join("notes"))?
            .map(|e| e.map(|e| e.file_name().to_string_lossy().into_owned()))
            .collect::<Result<_, _>>()?;
        names.sort();
        assert_eq!(names, vec!["README.md", "today.md"]);

        fs::create_dir(check.join("empty"))?;
        fs::remove_dir(check.join("empty"))?;
        let err = fs::remove_dir(check.join("notes")).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOTEMPTY));
        Ok(())
    })
    .await??;

    let status = handle.unmount().await;
    assert!(!status.dirty, "final sync failed: {:?}", status.last_error);

    let remote = env.remote_path();
    assert_eq!(remote_file(&remote, "notes/today.md").as_deref(), Some(&b"mounted write"[..]));
    assert_eq!(remote_file(&remote, "notes/README.md").as_deref(), Some(SEED_CONTENT.as_bytes()));
    assert_eq!(remote_file(&remote, SEED_FILE), None);
    println!("✅ Mounted edits pushed on unmount");
    Ok(())
}

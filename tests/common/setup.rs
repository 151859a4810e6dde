#![allow(dead_code)]
use anyhow::{Context, Result};
use repofs::backing_store::{MemoryWorkTree, WorkTree};
use repofs::config::Settings;
use repofs::fuse::{AttributeManager, NodeTree};
use repofs::sync::{change_channel, ChangeEvent, GitRepository};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

use super::fixtures::{identity, seed_bare_remote};

/// Node tree over an in-memory store, with the receiving end of its channel
pub fn memory_tree(capacity: usize) -> (NodeTree, Arc<MemoryWorkTree>, mpsc::Receiver<ChangeEvent>) {
    let store = Arc::new(MemoryWorkTree::new());
    let (notifier, events) = change_channel(capacity);
    let tree = NodeTree::build(store.clone(), notifier, AttributeManager::default())
        .expect("tree over an empty store");
    (tree, store, events)
}

/// Settings tuned for tests: one second ticks, two seconds of quiescence
pub fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.sync.tick_interval = Duration::from_secs(1);
    settings.sync.quiescence = Duration::from_secs(2);
    settings.sync.max_transient_retries = 3;
    settings
}

/// A bare remote and a clone of it that serves as the work tree
pub struct GitEnv {
    remote_dir: TempDir,
    work_dir: TempDir,
    pub repo: GitRepository,
    pub store: Arc<WorkTree>,
}

impl GitEnv {
    pub fn new() -> Result<Self> {
        Self::with_depth(None)
    }

    /// Same as `new`, cloning with the given history depth
    pub fn with_depth(depth: Option<u32>) -> Result<Self> {
        let remote_dir = TempDir::new().context("Failed to create remote dir")?;
        seed_bare_remote(remote_dir.path())?;

        let work_dir = TempDir::new().context("Failed to create work dir")?;
        let url = remote_dir
            .path()
            .to_str()
            .context("temp path is not UTF-8")?
            .to_string();
        let tree_dir = work_dir.path().join("tree");
        let repo = GitRepository::clone_remote(&url, &tree_dir, depth, identity(), None)?;
        let store = Arc::new(WorkTree::new(&tree_dir));
        Ok(Self {
            remote_dir,
            work_dir,
            repo,
            store,
        })
    }

    pub fn remote_path(&self) -> PathBuf {
        self.remote_dir.path().to_path_buf()
    }

    pub fn work_tree_path(&self) -> PathBuf {
        self.repo.root().to_path_buf()
    }
}

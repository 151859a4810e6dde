//! Mount lifecycle
//!
//! `mount` wires the node tree, the change channel and the sync task together
//! and hands the filesystem to fuser. The returned `MountHandle` owns all of
//! it; `unmount` tears it down in order: kernel session, pending writes, then
//! the final sync.

use anyhow::{Context, Result};
use fuser::{BackgroundSession, MountOption};
use log::{error, info};
use std::path::Path;
use std::sync::Arc;

use crate::backing_store::BackingStore;
use crate::config::Settings;
use crate::fuse::{AttributeManager, NodeTree, RepoFs};
use crate::scheduler::SyncTask;
use crate::sync::{change_channel, SourceControl, SyncError, SyncManager, SyncStatus};

/// Everything that serves one repository, before it is attached to a mount point
pub struct RepoService {
    pub tree: Arc<NodeTree>,
    pub sync_task: SyncTask,
}

impl RepoService {
    /// Build the tree from `store` and start syncing through `source`. Must be
    /// called from within a tokio runtime.
    pub fn start(
        store: Arc<dyn BackingStore>,
        source: Arc<dyn SourceControl>,
        settings: &Settings,
    ) -> Result<Self> {
        let (notifier, events) = change_channel(settings.sync.queue_capacity);
        let tree = NodeTree::build(store, notifier, AttributeManager::from_settings(settings))
            .context("Failed to build node tree")?;
        let manager = Arc::new(SyncManager::new(source, settings.sync.clone()));
        let sync_task = SyncTask::spawn(manager, events);
        Ok(Self {
            tree: Arc::new(tree),
            sync_task,
        })
    }

    /// Flush pending writes and stop the sync task after a final cycle
    pub async fn stop(self) -> SyncStatus {
        if let Err(e) = self.tree.flush_all() {
            error!("Some files could not be flushed before shutdown: {}", e);
        }
        self.sync_task.shutdown().await
    }
}

/// A live mount. Dropping it unmounts without the final flush; call
/// `unmount` instead.
pub struct MountHandle {
    session: BackgroundSession,
    service: RepoService,
}

fn mount_options() -> Vec<MountOption> {
    vec![
        MountOption::RW,
        MountOption::FSName("repofs".to_string()),
        MountOption::Subtype("repofs".to_string()),
        MountOption::DefaultPermissions,
        MountOption::NoAtime,
    ]
}

/// Mount the repository at `mountpoint`
pub async fn mount(
    mountpoint: &Path,
    store: Arc<dyn BackingStore>,
    source: Arc<dyn SourceControl>,
    settings: &Settings,
) -> Result<MountHandle> {
    let service = RepoService::start(store, source, settings)?;
    let fs = RepoFs::new(service.tree.clone());

    info!("📁 Mounting repository at {}", mountpoint.display());
    match fuser::spawn_mount2(fs, mountpoint, &mount_options()) {
        Ok(session) => Ok(MountHandle { session, service }),
        Err(e) => {
            service.stop().await;
            Err(e).with_context(|| format!("Failed to mount filesystem at {}", mountpoint.display()))
        }
    }
}

impl MountHandle {
    pub fn tree(&self) -> &Arc<NodeTree> {
        &self.service.tree
    }

    pub async fn sync_now(&self) -> Result<(), SyncError> {
        self.service.sync_task.sync_now().await
    }

    pub async fn status(&self) -> SyncStatus {
        self.service.sync_task.status().await
    }

    /// Detach from the kernel, flush pending writes and run the final sync.
    /// Needs the multi-threaded runtime.
    pub async fn unmount(self) -> SyncStatus {
        info!("Unmounting filesystem");
        let session = self.session;
        tokio::task::block_in_place(move || session.join());
        let status = self.service.stop().await;
        info!("✅ Unmounted");
        status
    }
}

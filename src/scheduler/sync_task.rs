//! Background task driving the sync manager
//!
//! The task owns the change receiver and a ticker. Shutdown is signalled over a
//! watch channel so the task can drain pending events and run a final cycle
//! instead of being aborted mid-push.

use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use log::{debug, error, info};

use crate::sync::{ChangeEvent, SyncError, SyncManager, SyncStatus};

pub struct SyncTask {
    manager: Arc<SyncManager>,
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SyncTask {
    /// Start consuming `events` on the current runtime
    pub fn spawn(manager: Arc<SyncManager>, events: mpsc::Receiver<ChangeEvent>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run(manager.clone(), events, shutdown_rx));
        info!("🔄 Sync task started");
        Self {
            manager,
            shutdown_tx,
            handle,
        }
    }

    pub fn manager(&self) -> &Arc<SyncManager> {
        &self.manager
    }

    /// Run a cycle immediately, bypassing the debounce
    pub async fn sync_now(&self) -> Result<(), SyncError> {
        self.manager.sync_now().await
    }

    pub async fn status(&self) -> SyncStatus {
        self.manager.status().await
    }

    /// Stop the loop, recording events still queued and delivering them in a
    /// final cycle
    pub async fn shutdown(self) -> SyncStatus {
        info!("🛑 Shutting down sync task...");
        // The receiver only goes away when the task already ended
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.handle.await {
            error!("Sync task ended abnormally: {}", e);
        }
        let status = self.manager.status().await;
        info!("✅ Sync task shutdown complete");
        status
    }
}

async fn run(
    manager: Arc<SyncManager>,
    mut events: mpsc::Receiver<ChangeEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(manager.config().tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut events_open = true;

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            event = events.recv(), if events_open => match event {
                Some(event) => manager.record(&event).await,
                None => {
                    debug!("All change notifiers dropped");
                    events_open = false;
                }
            },
            _ = ticker.tick() => {
                manager.on_tick().await;
            }
        }
    }

    while let Ok(event) = events.try_recv() {
        manager.record(&event).await;
    }
    if let Err(e) = manager.finish().await {
        error!("Final sync failed, changes stay committed locally or in the work tree: {}", e);
    }
}

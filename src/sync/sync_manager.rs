//! Debounced commit-and-push of the working tree
//!
//! Change events mark the manager dirty. On every tick, once no event has
//! arrived for the quiescence period, one cycle stages everything, commits and
//! pushes. A burst of changes therefore produces a single commit.

use crate::config::SyncConfig;
use crate::sync::{ChangeEvent, SourceControl, SyncError};
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Default)]
struct SyncState {
    dirty: bool,
    last_change: Option<Instant>,
    consecutive_failures: u32,
    suspended: bool,
    cycles: u64,
    last_error: Option<String>,
    last_success: Option<DateTime<Utc>>,
}

/// Snapshot of the manager state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatus {
    pub dirty: bool,
    pub suspended: bool,
    pub consecutive_failures: u32,
    /// Successful cycles so far
    pub cycles: u64,
    pub last_error: Option<String>,
    /// Wall-clock time of the last successful cycle
    pub last_success: Option<DateTime<Utc>>,
}

pub struct SyncManager {
    source: Arc<dyn SourceControl>,
    config: SyncConfig,
    state: Mutex<SyncState>,
}

impl SyncManager {
    pub fn new(source: Arc<dyn SourceControl>, config: SyncConfig) -> Self {
        Self {
            source,
            config,
            state: Mutex::new(SyncState::default()),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Mark the manager dirty. A suspended manager is re-armed.
    pub async fn record(&self, event: &ChangeEvent) {
        let mut state = self.state.lock().await;
        debug!("Change detected: {} ({})", event.path, event.kind);
        state.dirty = true;
        state.last_change = Some(match state.last_change {
            Some(previous) if previous > event.at => previous,
            _ => event.at,
        });
        if state.suspended {
            info!("Resuming sync after new change to {}", event.path);
            state.suspended = false;
            state.consecutive_failures = 0;
        }
    }

    /// Run a cycle if the manager is dirty, not suspended and quiet for long
    /// enough. Returns whether a cycle was attempted.
    pub async fn on_tick(&self) -> bool {
        let mut state = self.state.lock().await;
        if !state.dirty || state.suspended {
            return false;
        }
        let quiet_for = state
            .last_change
            .map(|at| Instant::now().saturating_duration_since(at))
            .unwrap_or(self.config.quiescence);
        if quiet_for < self.config.quiescence {
            return false;
        }

        // Failures are recorded in the state
        let _ = self.run_cycle(&mut state).await;
        true
    }

    /// Run a cycle now regardless of quiescence, re-arming a suspended manager
    pub async fn sync_now(&self) -> Result<(), SyncError> {
        let mut state = self.state.lock().await;
        state.suspended = false;
        state.consecutive_failures = 0;
        self.run_cycle(&mut state).await
    }

    /// Final cycle at shutdown, only when there is something to deliver
    pub async fn finish(&self) -> Result<(), SyncError> {
        let mut state = self.state.lock().await;
        if !state.dirty {
            return Ok(());
        }
        info!("Running final sync before shutdown");
        self.run_cycle(&mut state).await
    }

    pub async fn status(&self) -> SyncStatus {
        let state = self.state.lock().await;
        SyncStatus {
            dirty: state.dirty,
            suspended: state.suspended,
            consecutive_failures: state.consecutive_failures,
            cycles: state.cycles,
            last_error: state.last_error.clone(),
            last_success: state.last_success,
        }
    }

    /// One cycle, with the state lock held throughout
    async fn run_cycle(&self, state: &mut SyncState) -> Result<(), SyncError> {
        info!("Syncing changes to git...");
        let result = match self.source.commit_all().await {
            Ok(commit) => {
                if commit.is_none() {
                    debug!("No new commit, pushing anyway");
                }
                self.source.push().await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                state.dirty = false;
                state.consecutive_failures = 0;
                state.cycles += 1;
                state.last_error = None;
                state.last_success = Some(Utc::now());
                info!("Changes committed and pushed");
                Ok(())
            }
            Err(e) => {
                state.consecutive_failures += 1;
                state.last_error = Some(e.to_string());
                error!(
                    "Error syncing to git (attempt {}): {}",
                    state.consecutive_failures, e
                );
                if e.is_permanent() {
                    warn!("Suspending sync retries until the next change: {}", e);
                    state.suspended = true;
                } else if state.consecutive_failures >= self.config.max_transient_retries {
                    warn!(
                        "Suspending sync retries after {} consecutive failures",
                        state.consecutive_failures
                    );
                    state.suspended = true;
                }
                Err(e)
            }
        }
    }
}

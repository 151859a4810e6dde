#![allow(dead_code)]
use async_trait::async_trait;
use repofs::sync::{SourceControl, SyncError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::time::Instant;

/// Source control stand-in that records when each cycle ran
#[derive(Default)]
pub struct RecordingSource {
    commits: AtomicUsize,
    pushes: Mutex<Vec<Instant>>,
    fail_pushes: AtomicUsize,
}

impl RecordingSource {
    /// Fail the next `count` pushes with a transient rejection
    pub fn fail_next_pushes(&self, count: usize) {
        self.fail_pushes.store(count, Ordering::SeqCst);
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn pushes(&self) -> Vec<Instant> {
        self.pushes.lock().unwrap().clone()
    }
}

#[async_trait]
impl SourceControl for RecordingSource {
    async fn commit_all(&self) -> Result<Option<String>, SyncError> {
        let n = self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(Some(format!("{:040x}", n)))
    }

    async fn push(&self) -> Result<(), SyncError> {
        let remaining = self.fail_pushes.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_pushes.store(remaining - 1, Ordering::SeqCst);
            return Err(SyncError::PushRejected {
                reference: "refs/heads/main".to_string(),
                message: "remote busy".to_string(),
            });
        }
        self.pushes.lock().unwrap().push(Instant::now());
        Ok(())
    }
}

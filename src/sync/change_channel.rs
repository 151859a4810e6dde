//! Change notifications from filesystem operations to the sync manager
//!
//! The queue is bounded and never blocks the sender: once it is full the newest
//! event is dropped. A synchronization cycle stages everything that changed in
//! the working tree, so the events only signal that a cycle is due.

use log::{debug, warn};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::Instant;

/// Default queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Create,
    Write,
    Delete,
    Mkdir,
    Rmdir,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChangeKind::Create => "create",
            ChangeKind::Write => "write",
            ChangeKind::Delete => "delete",
            ChangeKind::Mkdir => "mkdir",
            ChangeKind::Rmdir => "rmdir",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub path: String,
    pub kind: ChangeKind,
    pub at: Instant,
}

/// Sending half, shared by every node of a tree
#[derive(Debug, Clone)]
pub struct ChangeNotifier {
    sender: mpsc::Sender<ChangeEvent>,
    dropped: Arc<AtomicU64>,
}

/// Create a notifier and the receiver the sync manager consumes
pub fn change_channel(capacity: usize) -> (ChangeNotifier, mpsc::Receiver<ChangeEvent>) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (
        ChangeNotifier {
            sender,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        receiver,
    )
}

impl ChangeNotifier {
    /// Record a change. Returns false when the event was dropped.
    pub fn notify(&self, path: &str, kind: ChangeKind) -> bool {
        let event = ChangeEvent {
            path: path.to_string(),
            kind,
            at: Instant::now(),
        };
        debug!("NotifyChange: {} ({})", path, kind);

        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Change queue is full, dropping {} event for {}",
                    event.kind, event.path
                );
                false
            }
            Err(TrySendError::Closed(event)) => {
                debug!("Sync manager is gone, ignoring {} event for {}", event.kind, event.path);
                false
            }
        }
    }

    /// Number of events dropped because the queue was full
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_arrive_in_order() {
        let (notifier, mut rx) = change_channel(8);
        notifier.notify("/a", ChangeKind::Create);
        notifier.notify("/a", ChangeKind::Write);

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!((first.path.as_str(), first.kind), ("/a", ChangeKind::Create));
        assert_eq!(second.kind, ChangeKind::Write);
    }

    #[tokio::test]
    async fn test_full_queue_drops_newest_without_blocking() {
        let (notifier, mut rx) = change_channel(2);
        assert!(notifier.notify("/1", ChangeKind::Create));
        assert!(notifier.notify("/2", ChangeKind::Create));
        assert!(!notifier.notify("/3", ChangeKind::Create));
        assert_eq!(notifier.dropped_count(), 1);

        assert_eq!(rx.recv().await.unwrap().path, "/1");
        assert_eq!(rx.recv().await.unwrap().path, "/2");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_notify_after_receiver_dropped() {
        let (notifier, rx) = change_channel(2);
        drop(rx);
        assert!(!notifier.notify("/a", ChangeKind::Delete));
        assert_eq!(notifier.dropped_count(), 0);
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(ChangeKind::Rmdir.to_string(), "rmdir");
        assert_eq!(ChangeKind::Mkdir.to_string(), "mkdir");
    }
}

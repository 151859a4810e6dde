//! Change tracking and background synchronization with the remote

pub mod change_channel;
pub mod git_repository;
pub mod sync_manager;

pub use change_channel::{change_channel, ChangeEvent, ChangeKind, ChangeNotifier, DEFAULT_QUEUE_CAPACITY};
pub use git_repository::{CommitIdentity, FailureKind, GitRepository, SourceControl, SyncError};
pub use sync_manager::{SyncManager, SyncStatus};

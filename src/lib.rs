//! Mount a git repository as a writable FUSE filesystem.
//!
//! File operations land in an in-memory node tree backed by a local clone.
//! Every change is reported to a sync manager that, once the tree has been
//! quiet for a while, commits everything and pushes it to the remote.

pub mod backing_store;
pub mod config;
pub mod error;
pub mod fuse;
pub mod log_appender;
pub mod mount;
pub mod scheduler;
pub mod sync;

pub use error::{FsError, FsResult};
pub use mount::{mount, MountHandle, RepoService};

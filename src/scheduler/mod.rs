//! Scheduler module for the background sync task

pub mod sync_task;

pub use sync_task::SyncTask;

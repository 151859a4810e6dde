pub mod backpressure_tests;
#[cfg(feature = "integration-tests")]
pub mod fuse_mount_tests;
pub mod git_sync_tests;
pub mod scenario_tests;

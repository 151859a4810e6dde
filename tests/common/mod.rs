pub mod fixtures;
pub mod mock_source;
pub mod setup;

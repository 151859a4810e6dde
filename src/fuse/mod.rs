//! FUSE module for the repository filesystem

pub mod attributes;
pub mod file_node;
pub mod filesystem;
pub mod operations;
pub mod tree;

pub use attributes::{AttrKind, AttributeManager};
pub use file_node::FileNode;
pub use filesystem::RepoFs;
pub use tree::{DirListing, Node, NodeTree, ROOT_INO};

//! Path-addressed storage the node tree writes through to
//!
//! Paths are absolute mount paths (`/`, `/a`, `/a/b.txt`). No call keeps a
//! descriptor open past its return.

mod memory;
mod work_tree;

pub use memory::MemoryWorkTree;
pub use work_tree::WorkTree;

use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Directory holding git metadata; never exposed through the mount
pub const GIT_DIR: &str = ".git";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
}

#[derive(Debug, Clone)]
pub struct EntryMetadata {
    pub kind: EntryKind,
    pub size: u64,
    pub mtime: SystemTime,
}

impl EntryMetadata {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

#[derive(Debug, Clone)]
pub struct DirEntryInfo {
    pub name: String,
    pub metadata: EntryMetadata,
}

/// Storage primitives of a working tree
pub trait BackingStore: Send + Sync {
    /// Metadata following symlinks
    fn stat(&self, path: &str) -> io::Result<EntryMetadata>;

    /// Metadata of the entry itself
    fn lstat(&self, path: &str) -> io::Result<EntryMetadata>;

    fn read_dir(&self, path: &str) -> io::Result<Vec<DirEntryInfo>>;

    /// Full content of a regular file
    fn read(&self, path: &str) -> io::Result<Vec<u8>>;

    /// Create an empty file, truncating an existing one
    fn create(&self, path: &str) -> io::Result<()>;

    /// Replace the content of a file (open for write, truncate, write all)
    fn write(&self, path: &str, data: &[u8]) -> io::Result<()>;

    fn mkdir_all(&self, path: &str, mode: u32) -> io::Result<()>;

    /// Remove a file, symlink or empty directory
    fn remove(&self, path: &str) -> io::Result<()>;

    fn rename(&self, from: &str, to: &str) -> io::Result<()>;

    fn symlink(&self, target: &Path, link: &str) -> io::Result<()>;

    fn read_link(&self, path: &str) -> io::Result<PathBuf>;
}

/// Join a child name onto an absolute mount path
pub fn join_path(parent: &str, name: &str) -> String {
    if parent == "/" || parent.is_empty() {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent, name)
    }
}

/// Parent of an absolute mount path (`/` for top level entries)
pub fn parent_path(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(pos) => &path[..pos],
    }
}

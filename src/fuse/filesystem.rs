//! Main FUSE filesystem implementation

use log::{debug, warn};
use std::ffi::OsStr;
use std::sync::Arc;

use crate::error::FsError;
use crate::fuse::tree::NodeTree;

/// Filesystem handed to fuser. All state lives in the shared node tree so the
/// mount handle can still flush it after the session ends.
pub struct RepoFs {
    tree: Arc<NodeTree>,
}

impl RepoFs {
    pub fn new(tree: Arc<NodeTree>) -> Self {
        Self { tree }
    }

    pub fn tree(&self) -> &Arc<NodeTree> {
        &self.tree
    }

    /// Names must be valid UTF-8 to be addressable in the tree
    pub(crate) fn name_str<'a>(&self, name: &'a OsStr) -> Result<&'a str, libc::c_int> {
        name.to_str().ok_or_else(|| {
            warn!("Rejecting non UTF-8 name {:?}", name);
            libc::EINVAL
        })
    }

    /// Log a failed operation and return the errno for the reply
    pub(crate) fn errno(&self, op: &str, e: FsError) -> libc::c_int {
        match &e {
            FsError::NotFound(_) => debug!("{}: {}", op, e),
            _ => warn!("{} failed: {}", op, e),
        }
        e.errno()
    }
}

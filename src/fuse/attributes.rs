//! File attribute conversion for the FUSE filesystem

use fuser::{FileAttr, FileType};
use std::time::SystemTime;

use crate::config::Settings;

/// Size reported for every directory
pub const DIRECTORY_SIZE: u64 = 4096;

const BLOCK_SIZE: u32 = 512;

/// Kind of node an attribute set describes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrKind {
    Directory,
    File,
    Symlink,
}

/// Ownership and permissions applied to every node. Per-node mode and owner
/// are not tracked.
#[derive(Debug, Clone, Copy)]
pub struct AttributeManager {
    pub uid: u32,
    pub gid: u32,
    pub file_permission: u16,
    pub dir_permission: u16,
}

impl Default for AttributeManager {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl AttributeManager {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            uid: settings.uid,
            gid: settings.gid,
            file_permission: settings.file_permission,
            dir_permission: settings.dir_permission,
        }
    }

    /// Build the attributes of one node
    pub fn file_attr(&self, ino: u64, kind: AttrKind, size: u64, mtime: SystemTime) -> FileAttr {
        let (kind, size, perm, nlink) = match kind {
            AttrKind::Directory => (FileType::Directory, DIRECTORY_SIZE, self.dir_permission, 2),
            AttrKind::File => (FileType::RegularFile, size, self.file_permission, 1),
            AttrKind::Symlink => (FileType::Symlink, size, 0o777, 1),
        };

        FileAttr {
            ino,
            size,
            blocks: size.div_ceil(BLOCK_SIZE as u64),
            atime: mtime,
            mtime,
            ctime: mtime,
            crtime: mtime,
            kind,
            perm,
            nlink,
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            flags: 0,
            blksize: BLOCK_SIZE,
        }
    }
}

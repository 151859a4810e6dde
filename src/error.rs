//! Error types for filesystem operations
//!
//! Every FUSE handler answers with one of these; `errno()` turns them into the
//! code handed back to the kernel.

use libc::c_int;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FsError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("directory not empty: {0}")]
    NotEmpty(String),

    #[error("rename across filesystem instances is not supported")]
    CrossDeviceNotSupported,

    #[error("backing store failure on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("is a directory: {0}")]
    IsADirectory(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),
}

pub type FsResult<T> = std::result::Result<T, FsError>;

impl FsError {
    /// Wrap a backing store error; a missing entry keeps its own code.
    pub fn backing(path: &str, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            FsError::NotFound(path.to_string())
        } else {
            FsError::Io {
                path: path.to_string(),
                source,
            }
        }
    }

    pub fn errno(&self) -> c_int {
        match self {
            FsError::NotFound(_) => libc::ENOENT,
            FsError::NotEmpty(_) => libc::ENOTEMPTY,
            FsError::CrossDeviceNotSupported => libc::EXDEV,
            FsError::Io { .. } => libc::EIO,
            FsError::Unsupported(_) => libc::ENOSYS,
            FsError::AlreadyExists(_) => libc::EEXIST,
            FsError::NotADirectory(_) => libc::ENOTDIR,
            FsError::IsADirectory(_) => libc::EISDIR,
            FsError::InvalidArgument(_) => libc::EINVAL,
            FsError::PermissionDenied(_) => libc::EACCES,
        }
    }
}

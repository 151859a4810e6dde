//! Working tree of a git checkout on local disk

use super::{BackingStore, DirEntryInfo, EntryKind, EntryMetadata, GIT_DIR};
use log::debug;
use std::fs::{self, Metadata};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Backing store rooted at the checkout directory of a repository
#[derive(Debug, Clone)]
pub struct WorkTree {
    root: PathBuf,
}

impl WorkTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a mount path below the root, refusing anything that escapes it
    /// or points into the git directory.
    fn resolve(&self, path: &str) -> io::Result<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        let mut resolved = self.root.clone();
        for (i, component) in relative.components().enumerate() {
            match component {
                Component::Normal(name) => {
                    if i == 0 && name == GIT_DIR {
                        return Err(io::Error::new(
                            io::ErrorKind::PermissionDenied,
                            format!("{} is reserved", GIT_DIR),
                        ));
                    }
                    resolved.push(name);
                }
                Component::CurDir => {}
                _ => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("invalid path: {}", path),
                    ))
                }
            }
        }
        Ok(resolved)
    }
}

fn to_entry_metadata(metadata: &Metadata) -> EntryMetadata {
    let file_type = metadata.file_type();
    let kind = if file_type.is_dir() {
        EntryKind::Directory
    } else if file_type.is_symlink() {
        EntryKind::Symlink
    } else {
        EntryKind::File
    };
    EntryMetadata {
        kind,
        size: metadata.len(),
        mtime: metadata.modified().unwrap_or(UNIX_EPOCH),
    }
}

impl BackingStore for WorkTree {
    fn stat(&self, path: &str) -> io::Result<EntryMetadata> {
        fs::metadata(self.resolve(path)?).map(|m| to_entry_metadata(&m))
    }

    fn lstat(&self, path: &str) -> io::Result<EntryMetadata> {
        fs::symlink_metadata(self.resolve(path)?).map(|m| to_entry_metadata(&m))
    }

    fn read_dir(&self, path: &str) -> io::Result<Vec<DirEntryInfo>> {
        let dir = self.resolve(path)?;
        let is_root = dir == self.root;
        let mut entries = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_root && name == GIT_DIR {
                continue;
            }
            let metadata = entry.metadata()?;
            entries.push(DirEntryInfo {
                name,
                metadata: to_entry_metadata(&metadata),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        fs::read(self.resolve(path)?)
    }

    fn create(&self, path: &str) -> io::Result<()> {
        let target = self.resolve(path)?;
        debug!("Creating {}", target.display());
        fs::File::create(target).map(|_| ())
    }

    fn write(&self, path: &str, data: &[u8]) -> io::Result<()> {
        fs::write(self.resolve(path)?, data)
    }

    fn mkdir_all(&self, path: &str, mode: u32) -> io::Result<()> {
        use std::os::unix::fs::DirBuilderExt;

        fs::DirBuilder::new()
            .recursive(true)
            .mode(mode)
            .create(self.resolve(path)?)
    }

    fn remove(&self, path: &str) -> io::Result<()> {
        let target = self.resolve(path)?;
        if fs::symlink_metadata(&target)?.is_dir() {
            fs::remove_dir(target)
        } else {
            fs::remove_file(target)
        }
    }

    fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        fs::rename(self.resolve(from)?, self.resolve(to)?)
    }

    fn symlink(&self, target: &Path, link: &str) -> io::Result<()> {
        std::os::unix::fs::symlink(target, self.resolve(link)?)
    }

    fn read_link(&self, path: &str) -> io::Result<PathBuf> {
        fs::read_link(self.resolve(path)?)
    }
}

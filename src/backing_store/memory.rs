//! In-memory working tree

use super::{join_path, parent_path, BackingStore, DirEntryInfo, EntryKind, EntryMetadata};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use std::time::SystemTime;

#[derive(Debug, Clone)]
enum MemEntry {
    File { data: Vec<u8>, mtime: SystemTime },
    Directory { mtime: SystemTime },
    Symlink { target: PathBuf, mtime: SystemTime },
}

impl MemEntry {
    fn metadata(&self) -> EntryMetadata {
        match self {
            MemEntry::File { data, mtime } => EntryMetadata {
                kind: EntryKind::File,
                size: data.len() as u64,
                mtime: *mtime,
            },
            MemEntry::Directory { mtime } => EntryMetadata {
                kind: EntryKind::Directory,
                size: 0,
                mtime: *mtime,
            },
            MemEntry::Symlink { target, mtime } => EntryMetadata {
                kind: EntryKind::Symlink,
                size: target.as_os_str().len() as u64,
                mtime: *mtime,
            },
        }
    }
}

fn not_found(path: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("no such entry: {}", path))
}

/// Working tree kept entirely in memory, keyed by absolute path
#[derive(Debug)]
pub struct MemoryWorkTree {
    entries: RwLock<BTreeMap<String, MemEntry>>,
}

impl Default for MemoryWorkTree {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryWorkTree {
    pub fn new() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(
            "/".to_string(),
            MemEntry::Directory {
                mtime: SystemTime::now(),
            },
        );
        Self {
            entries: RwLock::new(entries),
        }
    }

    fn children<'a>(
        entries: &'a BTreeMap<String, MemEntry>,
        dir: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a MemEntry)> + 'a {
        entries
            .iter()
            .filter(move |(path, _)| path.as_str() != "/" && parent_path(path) == dir)
    }

    fn require_parent_dir(entries: &BTreeMap<String, MemEntry>, path: &str) -> io::Result<()> {
        match entries.get(parent_path(path)) {
            Some(MemEntry::Directory { .. }) => Ok(()),
            Some(_) => Err(io::Error::new(
                io::ErrorKind::Other,
                format!("parent of {} is not a directory", path),
            )),
            None => Err(not_found(parent_path(path))),
        }
    }

    fn resolve_link<'a>(
        entries: &'a BTreeMap<String, MemEntry>,
        path: &str,
    ) -> io::Result<&'a MemEntry> {
        let mut current = path.to_string();
        for _ in 0..16 {
            let entry = entries.get(&current).ok_or_else(|| not_found(&current))?;
            match entry {
                MemEntry::Symlink { target, .. } => {
                    let target = target.to_string_lossy();
                    current = if target.starts_with('/') {
                        target.into_owned()
                    } else {
                        join_path(parent_path(&current), &target)
                    };
                }
                other => return Ok(other),
            }
        }
        Err(io::Error::new(io::ErrorKind::Other, "too many levels of symbolic links"))
    }
}

impl BackingStore for MemoryWorkTree {
    fn stat(&self, path: &str) -> io::Result<EntryMetadata> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        Self::resolve_link(&entries, path).map(MemEntry::metadata)
    }

    fn lstat(&self, path: &str) -> io::Result<EntryMetadata> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(path)
            .map(MemEntry::metadata)
            .ok_or_else(|| not_found(path))
    }

    fn read_dir(&self, path: &str) -> io::Result<Vec<DirEntryInfo>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        match entries.get(path) {
            Some(MemEntry::Directory { .. }) => {}
            Some(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::Other,
                    format!("not a directory: {}", path),
                ))
            }
            None => return Err(not_found(path)),
        }
        Ok(Self::children(&entries, path)
            .map(|(child, entry)| DirEntryInfo {
                name: child.rsplit('/').next().unwrap_or_default().to_string(),
                metadata: entry.metadata(),
            })
            .collect())
    }

    fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        match Self::resolve_link(&entries, path)? {
            MemEntry::File { data, .. } => Ok(data.clone()),
            _ => Err(io::Error::new(
                io::ErrorKind::Other,
                format!("not a regular file: {}", path),
            )),
        }
    }

    fn create(&self, path: &str) -> io::Result<()> {
        self.write(path, &[])
    }

    fn write(&self, path: &str, data: &[u8]) -> io::Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        Self::require_parent_dir(&entries, path)?;
        if let Some(MemEntry::Directory { .. }) = entries.get(path) {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("is a directory: {}", path),
            ));
        }
        entries.insert(
            path.to_string(),
            MemEntry::File {
                data: data.to_vec(),
                mtime: SystemTime::now(),
            },
        );
        Ok(())
    }

    fn mkdir_all(&self, path: &str, _mode: u32) -> io::Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let mut current = String::from("/");
        for component in path.split('/').filter(|c| !c.is_empty()) {
            current = join_path(&current, component);
            match entries.get(&current) {
                Some(MemEntry::Directory { .. }) => {}
                Some(_) => {
                    return Err(io::Error::new(
                        io::ErrorKind::AlreadyExists,
                        format!("not a directory: {}", current),
                    ))
                }
                None => {
                    entries.insert(
                        current.clone(),
                        MemEntry::Directory {
                            mtime: SystemTime::now(),
                        },
                    );
                }
            }
        }
        Ok(())
    }

    fn remove(&self, path: &str) -> io::Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        match entries.get(path) {
            None => return Err(not_found(path)),
            Some(MemEntry::Directory { .. }) => {
                if path == "/" || Self::children(&entries, path).next().is_some() {
                    return Err(io::Error::new(
                        io::ErrorKind::Other,
                        format!("directory not empty: {}", path),
                    ));
                }
            }
            Some(_) => {}
        }
        entries.remove(path);
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if !entries.contains_key(from) {
            return Err(not_found(from));
        }
        Self::require_parent_dir(&entries, to)?;

        let prefix = format!("{}/", from);
        let moved: Vec<String> = entries
            .keys()
            .filter(|path| path.as_str() == from || path.starts_with(&prefix))
            .cloned()
            .collect();

        entries.remove(to);
        for old in moved {
            if let Some(entry) = entries.remove(&old) {
                let new = format!("{}{}", to, &old[from.len()..]);
                entries.insert(new, entry);
            }
        }
        Ok(())
    }

    fn symlink(&self, target: &Path, link: &str) -> io::Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        Self::require_parent_dir(&entries, link)?;
        if entries.contains_key(link) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("already exists: {}", link),
            ));
        }
        entries.insert(
            link.to_string(),
            MemEntry::Symlink {
                target: target.to_path_buf(),
                mtime: SystemTime::now(),
            },
        );
        Ok(())
    }

    fn read_link(&self, path: &str) -> io::Result<PathBuf> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        match entries.get(path) {
            Some(MemEntry::Symlink { target, .. }) => Ok(target.clone()),
            Some(_) => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("not a symlink: {}", path),
            )),
            None => Err(not_found(path)),
        }
    }
}

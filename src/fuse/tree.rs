//! Node tree of a mounted repository
//!
//! Nodes live in an arena keyed by inode number. Every entry knows its parent
//! and its absolute mount path; renames rewrite the path of the moved node and
//! of all its descendants.
//!
//! Structural operations change the backing store first and only touch the
//! arena once that succeeded. Lock order is tree, then file.

use fuser::FileAttr;
use log::{debug, info, warn};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::SystemTime;

use crate::backing_store::{join_path, BackingStore, EntryKind, GIT_DIR};
use crate::error::{FsError, FsResult};
use crate::fuse::attributes::{AttrKind, AttributeManager};
use crate::fuse::file_node::FileNode;
use crate::sync::{ChangeKind, ChangeNotifier};

pub const ROOT_INO: u64 = 1;

static NEXT_TREE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
pub struct DirectoryNode {
    pub children: BTreeMap<String, u64>,
    pub mtime: SystemTime,
}

impl DirectoryNode {
    fn new(mtime: SystemTime) -> Self {
        Self {
            children: BTreeMap::new(),
            mtime,
        }
    }
}

#[derive(Debug)]
pub struct SymlinkNode {
    pub target: PathBuf,
    pub mtime: SystemTime,
}

#[derive(Debug)]
pub enum Node {
    Root(DirectoryNode),
    Directory(DirectoryNode),
    File(Arc<FileNode>),
    Symlink(SymlinkNode),
}

impl Node {
    fn as_dir(&self) -> Option<&DirectoryNode> {
        match self {
            Node::Root(dir) | Node::Directory(dir) => Some(dir),
            Node::File(_) | Node::Symlink(_) => None,
        }
    }

    fn as_dir_mut(&mut self) -> Option<&mut DirectoryNode> {
        match self {
            Node::Root(dir) | Node::Directory(dir) => Some(dir),
            Node::File(_) | Node::Symlink(_) => None,
        }
    }

    fn is_dir(&self) -> bool {
        self.as_dir().is_some()
    }

    fn kind(&self) -> AttrKind {
        match self {
            Node::Root(_) | Node::Directory(_) => AttrKind::Directory,
            Node::File(_) => AttrKind::File,
            Node::Symlink(_) => AttrKind::Symlink,
        }
    }
}

#[derive(Debug)]
struct NodeEntry {
    parent: u64,
    name: String,
    path: String,
    node: Node,
}

/// One child as listed by `NodeTree::list`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirListing {
    pub ino: u64,
    pub kind: AttrKind,
    pub name: String,
}

#[derive(Debug)]
struct TreeInner {
    nodes: HashMap<u64, NodeEntry>,
    next_ino: u64,
}

impl TreeInner {
    fn entry(&self, ino: u64) -> FsResult<&NodeEntry> {
        self.nodes
            .get(&ino)
            .ok_or_else(|| FsError::NotFound(format!("inode {}", ino)))
    }

    fn dir(&self, ino: u64) -> FsResult<&DirectoryNode> {
        let entry = self.entry(ino)?;
        entry
            .node
            .as_dir()
            .ok_or_else(|| FsError::NotADirectory(entry.path.clone()))
    }

    fn dir_mut(&mut self, ino: u64) -> FsResult<&mut DirectoryNode> {
        let entry = self
            .nodes
            .get_mut(&ino)
            .ok_or_else(|| FsError::NotFound(format!("inode {}", ino)))?;
        let path = &entry.path;
        match entry.node.as_dir_mut() {
            Some(dir) => Ok(dir),
            None => Err(FsError::NotADirectory(path.clone())),
        }
    }

    fn child(&self, parent: u64, name: &str) -> FsResult<Option<u64>> {
        Ok(self.dir(parent)?.children.get(name).copied())
    }

    fn require_child(&self, parent: u64, name: &str) -> FsResult<u64> {
        self.child(parent, name)?
            .ok_or_else(|| FsError::NotFound(join_path(&self.nodes[&parent].path, name)))
    }

    fn touch(&mut self, dir: u64) {
        if let Ok(dir) = self.dir_mut(dir) {
            dir.mtime = SystemTime::now();
        }
    }

    /// Link a new node under `parent`; the name must be free
    fn insert(&mut self, parent: u64, name: &str, path: String, node: Node) -> u64 {
        let ino = self.next_ino;
        self.next_ino += 1;
        self.nodes.insert(
            ino,
            NodeEntry {
                parent,
                name: name.to_string(),
                path,
                node,
            },
        );
        if let Ok(dir) = self.dir_mut(parent) {
            dir.children.insert(name.to_string(), ino);
        }
        ino
    }

    /// Unlink a leaf (or empty directory) from its parent and the arena
    fn detach(&mut self, ino: u64) -> Option<NodeEntry> {
        let entry = self.nodes.remove(&ino)?;
        if let Ok(dir) = self.dir_mut(entry.parent) {
            dir.children.remove(&entry.name);
        }
        Some(entry)
    }

    fn is_ancestor(&self, ancestor: u64, mut ino: u64) -> bool {
        loop {
            if ino == ancestor {
                return true;
            }
            match self.nodes.get(&ino) {
                Some(entry) if ino != ROOT_INO => ino = entry.parent,
                _ => return false,
            }
        }
    }

    /// Set the path of `ino` and of everything below it
    fn rewrite_paths(&mut self, ino: u64, path: String) {
        let mut pending = vec![(ino, path)];
        while let Some((ino, path)) = pending.pop() {
            let Some(entry) = self.nodes.get_mut(&ino) else {
                continue;
            };
            match &entry.node {
                Node::File(file) => file.set_path(path.clone()),
                Node::Root(dir) | Node::Directory(dir) => {
                    for (name, child) in &dir.children {
                        pending.push((*child, join_path(&path, name)));
                    }
                }
                Node::Symlink(_) => {}
            }
            entry.path = path;
        }
    }
}

/// Reject names the kernel should never hand us and the reserved git directory
fn validate_name(parent: u64, name: &str) -> FsResult<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(FsError::InvalidArgument(format!("invalid name {:?}", name)));
    }
    if parent == ROOT_INO && name == GIT_DIR {
        return Err(FsError::PermissionDenied(format!("/{} is reserved", GIT_DIR)));
    }
    Ok(())
}

pub struct NodeTree {
    id: u64,
    inner: RwLock<TreeInner>,
    store: Arc<dyn BackingStore>,
    notifier: ChangeNotifier,
    attrs: AttributeManager,
}

impl std::fmt::Debug for NodeTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeTree").field("id", &self.id).finish()
    }
}

impl NodeTree {
    /// Build the tree from the current content of the backing store. File
    /// content is loaded into memory and starts clean.
    pub fn build(
        store: Arc<dyn BackingStore>,
        notifier: ChangeNotifier,
        attrs: AttributeManager,
    ) -> FsResult<Self> {
        let root_meta = store.stat("/").map_err(|e| FsError::backing("/", e))?;
        let mut inner = TreeInner {
            nodes: HashMap::new(),
            next_ino: ROOT_INO + 1,
        };
        inner.nodes.insert(
            ROOT_INO,
            NodeEntry {
                parent: ROOT_INO,
                name: String::new(),
                path: "/".to_string(),
                node: Node::Root(DirectoryNode::new(root_meta.mtime)),
            },
        );

        let mut pending = vec![ROOT_INO];
        while let Some(dir_ino) = pending.pop() {
            let dir_path = inner.nodes[&dir_ino].path.clone();
            let listing = store
                .read_dir(&dir_path)
                .map_err(|e| FsError::backing(&dir_path, e))?;

            for child in listing {
                if dir_ino == ROOT_INO && child.name == GIT_DIR {
                    continue;
                }
                let path = join_path(&dir_path, &child.name);
                let node = match child.metadata.kind {
                    EntryKind::Directory => Node::Directory(DirectoryNode::new(child.metadata.mtime)),
                    EntryKind::File => {
                        let content = store.read(&path).map_err(|e| FsError::backing(&path, e))?;
                        Node::File(Arc::new(FileNode::with_content(
                            path.clone(),
                            content,
                            child.metadata.mtime,
                        )))
                    }
                    EntryKind::Symlink => Node::Symlink(SymlinkNode {
                        target: store.read_link(&path).map_err(|e| FsError::backing(&path, e))?,
                        mtime: child.metadata.mtime,
                    }),
                };
                let is_dir = node.is_dir();
                let ino = inner.insert(dir_ino, &child.name, path, node);
                if is_dir {
                    pending.push(ino);
                }
            }
        }

        info!("Node tree built with {} nodes", inner.nodes.len());
        Ok(Self {
            id: NEXT_TREE_ID.fetch_add(1, Ordering::Relaxed),
            inner: RwLock::new(inner),
            store,
            notifier,
            attrs,
        })
    }

    fn read_inner(&self) -> RwLockReadGuard<'_, TreeInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_inner(&self) -> RwLockWriteGuard<'_, TreeInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Identity of this tree instance
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn attributes(&self) -> &AttributeManager {
        &self.attrs
    }

    pub fn notifier(&self) -> &ChangeNotifier {
        &self.notifier
    }

    fn attr_of(&self, inner: &TreeInner, ino: u64) -> FsResult<FileAttr> {
        let entry = inner.entry(ino)?;
        let attr = match &entry.node {
            Node::Root(dir) | Node::Directory(dir) => {
                self.attrs.file_attr(ino, AttrKind::Directory, 0, dir.mtime)
            }
            Node::File(file) => self.attrs.file_attr(ino, AttrKind::File, file.len(), file.mtime()),
            Node::Symlink(link) => self.attrs.file_attr(
                ino,
                AttrKind::Symlink,
                link.target.as_os_str().len() as u64,
                link.mtime,
            ),
        };
        Ok(attr)
    }

    pub fn getattr(&self, ino: u64) -> FsResult<FileAttr> {
        let inner = self.read_inner();
        self.attr_of(&inner, ino)
    }

    pub fn lookup(&self, parent: u64, name: &str) -> FsResult<FileAttr> {
        let inner = self.read_inner();
        let ino = inner.require_child(parent, name)?;
        self.attr_of(&inner, ino)
    }

    /// Absolute mount path of a node
    pub fn path_of(&self, ino: u64) -> FsResult<String> {
        Ok(self.read_inner().entry(ino)?.path.clone())
    }

    /// Inode of the parent directory (the root is its own parent)
    pub fn parent_of(&self, ino: u64) -> FsResult<u64> {
        Ok(self.read_inner().entry(ino)?.parent)
    }

    /// Resolve an absolute mount path
    pub fn resolve(&self, path: &str) -> FsResult<u64> {
        let inner = self.read_inner();
        let mut ino = ROOT_INO;
        for name in path.split('/').filter(|c| !c.is_empty()) {
            ino = inner.require_child(ino, name)?;
        }
        Ok(ino)
    }

    /// Children of a directory in name order
    pub fn list(&self, ino: u64) -> FsResult<Vec<DirListing>> {
        let inner = self.read_inner();
        let dir = inner.dir(ino)?;
        Ok(dir
            .children
            .iter()
            .filter_map(|(name, child)| {
                inner.nodes.get(child).map(|entry| DirListing {
                    ino: *child,
                    kind: entry.node.kind(),
                    name: name.clone(),
                })
            })
            .collect())
    }

    pub fn create(&self, parent: u64, name: &str) -> FsResult<FileAttr> {
        validate_name(parent, name)?;
        let mut inner = self.write_inner();
        if inner.child(parent, name)?.is_some() {
            return Err(FsError::AlreadyExists(name.to_string()));
        }
        let path = join_path(&inner.entry(parent)?.path, name);

        self.store
            .create(&path)
            .map_err(|e| FsError::backing(&path, e))?;

        let node = Node::File(Arc::new(FileNode::new(path.clone())));
        let ino = inner.insert(parent, name, path.clone(), node);
        inner.touch(parent);
        self.notifier.notify(&path, ChangeKind::Create);
        debug!("Created {} as inode {}", path, ino);
        self.attr_of(&inner, ino)
    }

    pub fn mkdir(&self, parent: u64, name: &str, mode: u32) -> FsResult<FileAttr> {
        validate_name(parent, name)?;
        let mut inner = self.write_inner();
        if inner.child(parent, name)?.is_some() {
            return Err(FsError::AlreadyExists(name.to_string()));
        }
        let path = join_path(&inner.entry(parent)?.path, name);
        let mode = match mode & 0o7777 {
            0 => self.attrs.dir_permission as u32,
            mode => mode,
        };

        self.store
            .mkdir_all(&path, mode)
            .map_err(|e| FsError::backing(&path, e))?;

        let ino = inner.insert(
            parent,
            name,
            path.clone(),
            Node::Directory(DirectoryNode::new(SystemTime::now())),
        );
        inner.touch(parent);
        self.notifier.notify(&path, ChangeKind::Mkdir);
        self.attr_of(&inner, ino)
    }

    pub fn symlink(&self, parent: u64, name: &str, target: &Path) -> FsResult<FileAttr> {
        validate_name(parent, name)?;
        let mut inner = self.write_inner();
        if inner.child(parent, name)?.is_some() {
            return Err(FsError::AlreadyExists(name.to_string()));
        }
        let path = join_path(&inner.entry(parent)?.path, name);

        self.store
            .symlink(target, &path)
            .map_err(|e| FsError::backing(&path, e))?;

        let node = Node::Symlink(SymlinkNode {
            target: target.to_path_buf(),
            mtime: SystemTime::now(),
        });
        let ino = inner.insert(parent, name, path.clone(), node);
        inner.touch(parent);
        self.notifier.notify(&path, ChangeKind::Create);
        self.attr_of(&inner, ino)
    }

    pub fn readlink(&self, ino: u64) -> FsResult<PathBuf> {
        let inner = self.read_inner();
        let entry = inner.entry(ino)?;
        match &entry.node {
            Node::Symlink(link) => Ok(link.target.clone()),
            _ => Err(FsError::InvalidArgument(format!("{} is not a symlink", entry.path))),
        }
    }

    /// Remove a file or symlink
    pub fn unlink(&self, parent: u64, name: &str) -> FsResult<()> {
        let mut inner = self.write_inner();
        let ino = inner.require_child(parent, name)?;
        let entry = inner.entry(ino)?;
        if entry.node.is_dir() {
            return Err(FsError::IsADirectory(entry.path.clone()));
        }
        let path = entry.path.clone();

        self.store
            .remove(&path)
            .map_err(|e| FsError::backing(&path, e))?;

        if let Some(entry) = inner.detach(ino) {
            match entry.node {
                Node::File(file) => file.unlink(&self.notifier),
                _ => {
                    self.notifier.notify(&path, ChangeKind::Delete);
                }
            }
        }
        inner.touch(parent);
        debug!("Unlinked {}", path);
        Ok(())
    }

    /// Remove an empty directory
    pub fn rmdir(&self, parent: u64, name: &str) -> FsResult<()> {
        let mut inner = self.write_inner();
        let ino = inner.require_child(parent, name)?;
        let entry = inner.entry(ino)?;
        let path = entry.path.clone();
        match entry.node.as_dir() {
            None => return Err(FsError::NotADirectory(path)),
            Some(dir) if !dir.children.is_empty() => return Err(FsError::NotEmpty(path)),
            Some(_) => {}
        }

        self.store
            .remove(&path)
            .map_err(|e| FsError::backing(&path, e))?;

        inner.detach(ino);
        inner.touch(parent);
        self.notifier.notify(&path, ChangeKind::Rmdir);
        Ok(())
    }

    pub fn rename(
        &self,
        parent: u64,
        name: &str,
        new_parent: u64,
        new_name: &str,
        flags: u32,
    ) -> FsResult<()> {
        self.rename_into(parent, name, self, new_parent, new_name, flags)
    }

    /// Move `parent/name` to `new_parent/new_name` of `target`, which must be
    /// this same tree instance.
    pub fn rename_into(
        &self,
        parent: u64,
        name: &str,
        target: &NodeTree,
        new_parent: u64,
        new_name: &str,
        flags: u32,
    ) -> FsResult<()> {
        if target.id != self.id {
            return Err(FsError::CrossDeviceNotSupported);
        }
        if flags & libc::RENAME_EXCHANGE != 0 {
            return Err(FsError::Unsupported("RENAME_EXCHANGE"));
        }
        if flags & !libc::RENAME_NOREPLACE != 0 {
            return Err(FsError::InvalidArgument(format!("rename flags {:#x}", flags)));
        }
        validate_name(new_parent, new_name)?;

        let mut inner = self.write_inner();
        let src = inner.require_child(parent, name)?;
        inner.dir(new_parent)?;
        let src_is_dir = inner.entry(src)?.node.is_dir();

        if src_is_dir && inner.is_ancestor(src, new_parent) {
            return Err(FsError::InvalidArgument(format!(
                "cannot move {} into itself",
                inner.entry(src)?.path
            )));
        }

        let existing = inner.child(new_parent, new_name)?;
        if existing == Some(src) {
            return Ok(());
        }
        if let Some(dst) = existing {
            if flags & libc::RENAME_NOREPLACE != 0 {
                return Err(FsError::AlreadyExists(new_name.to_string()));
            }
            let dst_entry = inner.entry(dst)?;
            match (src_is_dir, dst_entry.node.as_dir()) {
                (true, Some(dir)) if !dir.children.is_empty() => {
                    return Err(FsError::NotEmpty(dst_entry.path.clone()))
                }
                (true, None) => return Err(FsError::NotADirectory(dst_entry.path.clone())),
                (false, Some(_)) => return Err(FsError::IsADirectory(dst_entry.path.clone())),
                _ => {}
            }
        }

        let old_path = inner.entry(src)?.path.clone();
        let new_path = join_path(&inner.entry(new_parent)?.path, new_name);

        self.store
            .rename(&old_path, &new_path)
            .map_err(|e| FsError::backing(&old_path, e))?;

        if let Some(dst) = existing {
            if let Some(NodeEntry {
                node: Node::File(file),
                ..
            }) = inner.detach(dst)
            {
                file.discard();
            }
        }

        inner.dir_mut(parent)?.children.remove(name);
        inner
            .dir_mut(new_parent)?
            .children
            .insert(new_name.to_string(), src);
        if let Some(entry) = inner.nodes.get_mut(&src) {
            entry.parent = new_parent;
            entry.name = new_name.to_string();
        }
        inner.rewrite_paths(src, new_path.clone());
        inner.touch(parent);
        inner.touch(new_parent);

        self.notifier.notify(&old_path, ChangeKind::Delete);
        self.notifier.notify(&new_path, ChangeKind::Create);
        debug!("Renamed {} to {}", old_path, new_path);
        Ok(())
    }

    /// Apply a size and/or mtime change. Mode and owner are not tracked.
    pub fn setattr(
        &self,
        ino: u64,
        size: Option<u64>,
        mtime: Option<SystemTime>,
    ) -> FsResult<FileAttr> {
        let mut inner = self.write_inner();
        let entry = inner
            .nodes
            .get_mut(&ino)
            .ok_or_else(|| FsError::NotFound(format!("inode {}", ino)))?;

        match &mut entry.node {
            Node::File(file) => {
                if let Some(size) = size {
                    file.set_size(size)?;
                }
                if let Some(mtime) = mtime {
                    file.set_mtime(mtime);
                }
            }
            Node::Root(dir) | Node::Directory(dir) => {
                if size.is_some() {
                    return Err(FsError::IsADirectory(entry.path.clone()));
                }
                if let Some(mtime) = mtime {
                    dir.mtime = mtime;
                }
            }
            Node::Symlink(link) => {
                if size.is_some() {
                    warn!("Ignoring size change on symlink {}", entry.path);
                }
                if let Some(mtime) = mtime {
                    link.mtime = mtime;
                }
            }
        }
        self.attr_of(&inner, ino)
    }

    fn file(&self, inner: &TreeInner, ino: u64) -> FsResult<Arc<FileNode>> {
        let entry = inner.entry(ino)?;
        match &entry.node {
            Node::File(file) => Ok(Arc::clone(file)),
            Node::Root(_) | Node::Directory(_) => Err(FsError::IsADirectory(entry.path.clone())),
            Node::Symlink(_) => Err(FsError::InvalidArgument(format!(
                "{} is a symlink",
                entry.path
            ))),
        }
    }

    /// Check that `ino` can be opened as a regular file
    pub fn open(&self, ino: u64) -> FsResult<()> {
        let inner = self.read_inner();
        self.file(&inner, ino).map(|_| ())
    }

    pub fn read(&self, ino: u64, offset: u64, size: usize) -> FsResult<Vec<u8>> {
        let file = self.file(&self.read_inner(), ino)?;
        Ok(file.read(offset, size))
    }

    pub fn write(&self, ino: u64, offset: u64, data: &[u8]) -> FsResult<usize> {
        let file = self.file(&self.read_inner(), ino)?;
        file.write(offset, data)
    }

    /// Write pending content of one file to the backing store. The tree stays
    /// read-locked so no rename can move the file during the rewrite.
    pub fn flush(&self, ino: u64) -> FsResult<()> {
        let inner = self.read_inner();
        let entry = inner.entry(ino)?;
        match &entry.node {
            Node::File(file) => file.flush(self.store.as_ref(), &self.notifier),
            _ => Ok(()),
        }
    }

    /// Flush every dirty file, continuing past failures. Returns the first error.
    pub fn flush_all(&self) -> FsResult<()> {
        let inner = self.read_inner();
        let mut first_error = None;
        let mut flushed = 0usize;
        for entry in inner.nodes.values() {
            if let Node::File(file) = &entry.node {
                if !file.is_dirty() {
                    continue;
                }
                match file.flush(self.store.as_ref(), &self.notifier) {
                    Ok(()) => flushed += 1,
                    Err(e) => {
                        warn!("Failed to flush {}: {}", entry.path, e);
                        first_error.get_or_insert(e);
                    }
                }
            }
        }
        info!("Flushed {} dirty files", flushed);
        first_error.map_or(Ok(()), Err)
    }
}

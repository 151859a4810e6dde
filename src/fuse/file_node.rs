//! Regular file node with an in-memory content buffer
//!
//! The buffer mirrors the pending content of the file. While `dirty` is false
//! it equals what the backing store holds; once a write lands it becomes the
//! authoritative copy until the next flush.

use crate::backing_store::BackingStore;
use crate::error::{FsError, FsResult};
use crate::sync::{ChangeKind, ChangeNotifier};
use log::{debug, error};
use std::io;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

#[derive(Debug)]
struct FileState {
    path: String,
    buffer: Vec<u8>,
    dirty: bool,
    mtime: SystemTime,
}

/// One regular file. Every open of the file shares this node and its lock.
#[derive(Debug)]
pub struct FileNode {
    state: Mutex<FileState>,
}

fn offset_to_usize(offset: u64, path: &str) -> FsResult<usize> {
    usize::try_from(offset).map_err(|_| FsError::InvalidArgument(format!("offset {} on {}", offset, path)))
}

/// Resize `buffer` to `len`, zero-filling growth. Leaves the buffer untouched
/// if the memory cannot be reserved.
fn resize_buffer(buffer: &mut Vec<u8>, len: usize, path: &str) -> FsResult<()> {
    if len > buffer.len() {
        buffer.try_reserve(len - buffer.len()).map_err(|e| FsError::Io {
            path: path.to_string(),
            source: io::Error::new(io::ErrorKind::OutOfMemory, e),
        })?;
    }
    buffer.resize(len, 0);
    Ok(())
}

impl FileNode {
    /// Empty, already synchronized file
    pub fn new(path: impl Into<String>) -> Self {
        Self::with_content(path, Vec::new(), SystemTime::now())
    }

    /// File whose buffer matches what the backing store holds
    pub fn with_content(path: impl Into<String>, content: Vec<u8>, mtime: SystemTime) -> Self {
        Self {
            state: Mutex::new(FileState {
                path: path.into(),
                buffer: content,
                dirty: false,
                mtime,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FileState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn path(&self) -> String {
        self.lock().path.clone()
    }

    pub(crate) fn set_path(&self, path: String) {
        self.lock().path = path;
    }

    pub fn len(&self) -> u64 {
        self.lock().buffer.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.lock().buffer.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.lock().dirty
    }

    pub fn mtime(&self) -> SystemTime {
        self.lock().mtime
    }

    pub fn set_mtime(&self, mtime: SystemTime) {
        self.lock().mtime = mtime;
    }

    /// Copy of `[offset, offset + len)` clamped to the buffer; empty past the end
    pub fn read(&self, offset: u64, len: usize) -> Vec<u8> {
        let state = self.lock();
        let size = state.buffer.len();
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(size);
        let end = start.saturating_add(len).min(size);
        state.buffer[start..end].to_vec()
    }

    /// Write `data` at `offset`, growing the buffer with zeros if needed.
    /// Either the whole write lands or the buffer is left as it was.
    pub fn write(&self, offset: u64, data: &[u8]) -> FsResult<usize> {
        let mut state = self.lock();
        let start = offset_to_usize(offset, &state.path)?;
        let end = start
            .checked_add(data.len())
            .ok_or_else(|| FsError::InvalidArgument(format!("write past addressable size on {}", state.path)))?;

        if end > state.buffer.len() {
            let path = state.path.clone();
            resize_buffer(&mut state.buffer, end, &path)?;
        }
        state.buffer[start..end].copy_from_slice(data);
        state.dirty = true;
        state.mtime = SystemTime::now();
        Ok(data.len())
    }

    /// Truncate or zero-extend to `size`; always marks the file dirty
    pub fn set_size(&self, size: u64) -> FsResult<()> {
        let mut state = self.lock();
        let len = offset_to_usize(size, &state.path)?;
        let path = state.path.clone();
        resize_buffer(&mut state.buffer, len, &path)?;
        state.dirty = true;
        state.mtime = SystemTime::now();
        debug!("File {} size changed to {}", state.path, size);
        Ok(())
    }

    /// Rewrite the backing entry from the buffer if there are pending changes.
    /// The lock is held for the whole rewrite so writers wait for it.
    pub fn flush(&self, store: &dyn BackingStore, notifier: &ChangeNotifier) -> FsResult<()> {
        let mut state = self.lock();
        if !state.dirty {
            return Ok(());
        }

        if let Err(e) = store.write(&state.path, &state.buffer) {
            error!("Error writing file {} during flush: {}", state.path, e);
            return Err(FsError::backing(&state.path, e));
        }

        state.dirty = false;
        notifier.notify(&state.path, ChangeKind::Write);
        Ok(())
    }

    /// Drop pending content after the file left the tree and emit `Delete`
    pub fn unlink(&self, notifier: &ChangeNotifier) {
        let mut state = self.lock();
        state.buffer = Vec::new();
        state.dirty = false;
        notifier.notify(&state.path, ChangeKind::Delete);
    }

    /// Drop pending content without signalling, for a file replaced by a rename
    pub(crate) fn discard(&self) {
        let mut state = self.lock();
        state.buffer = Vec::new();
        state.dirty = false;
    }
}

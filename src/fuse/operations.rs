//! FUSE filesystem operations implementation

use fuser::{
    FileType, Filesystem, KernelConfig, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, ReplyXattr, Request, TimeOrNow,
};
use libc::c_int;
use log::{debug, info, warn};
use std::ffi::OsStr;
use std::path::Path;
use std::time::{Duration, SystemTime};

use crate::fuse::attributes::AttrKind;
use crate::fuse::filesystem::RepoFs;

const TTL: Duration = Duration::from_secs(1);

/// Every open shares the file node, so one handle value is enough
const FILE_HANDLE: u64 = 0;

fn file_type(kind: AttrKind) -> FileType {
    match kind {
        AttrKind::Directory => FileType::Directory,
        AttrKind::File => FileType::RegularFile,
        AttrKind::Symlink => FileType::Symlink,
    }
}

fn to_system_time(time: TimeOrNow) -> SystemTime {
    match time {
        TimeOrNow::SpecificTime(time) => time,
        TimeOrNow::Now => SystemTime::now(),
    }
}

impl RepoFs {
    fn flush_ino(&self, op: &str, ino: u64, reply: ReplyEmpty) {
        match self.tree().flush(ino) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(self.errno(op, e)),
        }
    }
}

impl Filesystem for RepoFs {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), c_int> {
        info!("Filesystem initialized");
        Ok(())
    }

    fn destroy(&mut self) {
        info!("Filesystem destroyed, flushing pending writes");
        if let Err(e) = self.tree().flush_all() {
            warn!("Flush on destroy failed: {}", e);
        }
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        debug!("LOOKUP: parent={}, name={:?}", parent, name);
        let name = match self.name_str(name) {
            Ok(name) => name,
            Err(errno) => return reply.error(errno),
        };
        match self.tree().lookup(parent, name) {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(e) => reply.error(self.errno("LOOKUP", e)),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        debug!("GETATTR: ino={}", ino);
        match self.tree().getattr(ino) {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(e) => reply.error(self.errno("GETATTR", e)),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        debug!("SETATTR: ino={}, size={:?}, mtime={:?}", ino, size, mtime);
        if mode.is_some() || uid.is_some() || gid.is_some() {
            warn!(
                "Ignoring mode/owner change on inode {} (mode={:?}, uid={:?}, gid={:?})",
                ino, mode, uid, gid
            );
        }
        match self.tree().setattr(ino, size, mtime.map(to_system_time)) {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(e) => reply.error(self.errno("SETATTR", e)),
        }
    }

    fn readlink(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyData) {
        debug!("READLINK: ino={}", ino);
        match self.tree().readlink(ino) {
            Ok(target) => reply.data(target.as_os_str().as_encoded_bytes()),
            Err(e) => reply.error(self.errno("READLINK", e)),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        reply: ReplyEntry,
    ) {
        debug!("MKDIR: parent={}, name={:?}, mode={:o}", parent, name, mode);
        let name = match self.name_str(name) {
            Ok(name) => name,
            Err(errno) => return reply.error(errno),
        };
        match self.tree().mkdir(parent, name, mode & !umask) {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(e) => reply.error(self.errno("MKDIR", e)),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        debug!("UNLINK: parent={}, name={:?}", parent, name);
        let name = match self.name_str(name) {
            Ok(name) => name,
            Err(errno) => return reply.error(errno),
        };
        match self.tree().unlink(parent, name) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(self.errno("UNLINK", e)),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        debug!("RMDIR: parent={}, name={:?}", parent, name);
        let name = match self.name_str(name) {
            Ok(name) => name,
            Err(errno) => return reply.error(errno),
        };
        match self.tree().rmdir(parent, name) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(self.errno("RMDIR", e)),
        }
    }

    fn symlink(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        link_name: &OsStr,
        target: &Path,
        reply: ReplyEntry,
    ) {
        debug!("SYMLINK: parent={}, name={:?}, target={}", parent, link_name, target.display());
        let name = match self.name_str(link_name) {
            Ok(name) => name,
            Err(errno) => return reply.error(errno),
        };
        match self.tree().symlink(parent, name, target) {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(e) => reply.error(self.errno("SYMLINK", e)),
        }
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
        reply: ReplyEmpty,
    ) {
        debug!(
            "RENAME: parent={}, name={:?}, newparent={}, newname={:?}, flags={}",
            parent, name, newparent, newname, flags
        );
        let (name, newname) = match (self.name_str(name), self.name_str(newname)) {
            (Ok(name), Ok(newname)) => (name, newname),
            (Err(errno), _) | (_, Err(errno)) => return reply.error(errno),
        };
        match self.tree().rename(parent, name, newparent, newname, flags) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(self.errno("RENAME", e)),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        debug!("OPEN: ino={}, flags={:#x}", ino, flags);
        match self.tree().open(ino) {
            Ok(()) => reply.opened(FILE_HANDLE, 0),
            Err(e) => reply.error(self.errno("OPEN", e)),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        debug!("READ: ino={}, offset={}, size={}", ino, offset, size);
        let Ok(offset) = u64::try_from(offset) else {
            return reply.error(libc::EINVAL);
        };
        match self.tree().read(ino, offset, size as usize) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(self.errno("READ", e)),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        debug!("WRITE: ino={}, offset={}, len={}", ino, offset, data.len());
        let Ok(offset) = u64::try_from(offset) else {
            return reply.error(libc::EINVAL);
        };
        match self.tree().write(ino, offset, data) {
            Ok(written) => reply.written(written as u32),
            Err(e) => reply.error(self.errno("WRITE", e)),
        }
    }

    fn flush(&mut self, _req: &Request<'_>, ino: u64, _fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        debug!("FLUSH: ino={}", ino);
        self.flush_ino("FLUSH", ino, reply);
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        debug!("RELEASE: ino={}", ino);
        self.flush_ino("RELEASE", ino, reply);
    }

    fn fsync(&mut self, _req: &Request<'_>, ino: u64, _fh: u64, _datasync: bool, reply: ReplyEmpty) {
        debug!("FSYNC: ino={}", ino);
        self.flush_ino("FSYNC", ino, reply);
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        debug!("OPENDIR: ino={}", ino);
        match self.tree().list(ino) {
            Ok(_) => reply.opened(FILE_HANDLE, 0),
            Err(e) => reply.error(self.errno("OPENDIR", e)),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        debug!("READDIR: ino={}, offset={}", ino, offset);
        let (children, parent) = match (self.tree().list(ino), self.tree().parent_of(ino)) {
            (Ok(children), Ok(parent)) => (children, parent),
            (Err(e), _) | (_, Err(e)) => return reply.error(self.errno("READDIR", e)),
        };

        let entries = [(ino, FileType::Directory, ".".to_string()), (parent, FileType::Directory, "..".to_string())]
            .into_iter()
            .chain(
                children
                    .into_iter()
                    .map(|child| (child.ino, file_type(child.kind), child.name)),
            );

        let skip = usize::try_from(offset).unwrap_or(0);
        for (i, (child_ino, kind, name)) in entries.enumerate().skip(skip) {
            // Offset of the next entry
            if reply.add(child_ino, (i + 1) as i64, kind, &name) {
                break;
            }
        }
        reply.ok();
    }

    fn releasedir(&mut self, _req: &Request<'_>, ino: u64, _fh: u64, _flags: i32, reply: ReplyEmpty) {
        debug!("RELEASEDIR: ino={}", ino);
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        debug!("STATFS");
        reply.statfs(
            1_000_000_000, // Total blocks
            500_000_000,   // Free blocks
            500_000_000,   // Available blocks
            1_000_000,     // Total files
            500_000,       // Free files
            512,           // Block size
            255,           // Max filename length
            0,             // Fragment size
        );
    }

    fn getxattr(&mut self, _req: &Request<'_>, ino: u64, name: &OsStr, _size: u32, reply: ReplyXattr) {
        debug!("GETXATTR: ino={}, name={:?}", ino, name);
        reply.error(libc::ENODATA);
    }

    fn listxattr(&mut self, _req: &Request<'_>, ino: u64, size: u32, reply: ReplyXattr) {
        debug!("LISTXATTR: ino={}", ino);
        if size == 0 {
            reply.size(0);
        } else {
            reply.data(&[]);
        }
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        debug!("CREATE: parent={}, name={:?}, mode={:o}, flags={:#x}", parent, name, mode, flags);
        let name = match self.name_str(name) {
            Ok(name) => name,
            Err(errno) => return reply.error(errno),
        };
        match self.tree().create(parent, name) {
            Ok(attr) => reply.created(&TTL, &attr, 0, FILE_HANDLE, 0),
            Err(e) => reply.error(self.errno("CREATE", e)),
        }
    }
}

//! `fuser::Filesystem` adapter over [`MonitorFs`].
//!
//! The session thread owns the inode and handle tables and answers
//! metadata requests directly. Reads, writes, flushes and syncs are handed
//! to an [`IoPool`] together with their reply, so blocking I/O or a
//! heatmap render on one handle never stalls the others. Each open handle
//! sits behind its own lock. Errors are answered with the errno of the
//! underlying [`VfsError`].

use std::collections::HashMap;
use std::ffi::OsStr;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use fuser::{
    consts::FOPEN_DIRECT_IO, FileType as FuseFileType, Filesystem, ReplyAttr, ReplyCreate,
    ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite,
    Request, TimeOrNow,
};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use heatfs_kernel::process::UNKNOWN_PROCESS;
use heatfs_kernel::{
    CallerInfo, FileAttr, FileHandle, FileType, LocalBackend, MonitorFs, OpenFlags, SetAttr,
    VfsError, VfsOps, VfsResult,
};

use crate::inode::{InodeTable, ROOT_INODE};
use crate::pool::IoPool;

/// Inode reported for listed entries the kernel has not looked up yet.
///
/// Plain `readdir` numbers are informational; the kernel looks every name
/// up before using it.
const UNLISTED_INODE: u64 = u64::MAX;

type SharedHandle = Arc<Mutex<FileHandle>>;

/// FUSE filesystem serving a [`MonitorFs`].
pub struct HeatFuse<B: VfsOps = LocalBackend> {
    monitor: Arc<MonitorFs<B>>,
    inodes: InodeTable,
    handles: HashMap<u64, SharedHandle>,
    next_handle: u64,
    ttl: Duration,
    pool: IoPool,
}

impl<B: VfsOps + 'static> HeatFuse<B> {
    /// Adapter with `io_threads` workers for file I/O.
    pub fn new(monitor: MonitorFs<B>, ttl: Duration, io_threads: usize) -> io::Result<Self> {
        Ok(Self {
            monitor: Arc::new(monitor),
            inodes: InodeTable::new(),
            handles: HashMap::new(),
            next_handle: 1,
            ttl,
            pool: IoPool::new(io_threads)?,
        })
    }

    pub fn monitor(&self) -> &MonitorFs<B> {
        &self.monitor
    }

    fn path(&self, ino: u64) -> Result<PathBuf, i32> {
        self.inodes
            .path_for(ino)
            .map(Path::to_path_buf)
            .ok_or(libc::ENOENT)
    }

    fn child(&self, parent: u64, name: &OsStr) -> Result<PathBuf, i32> {
        self.inodes.child_path(parent, name).ok_or(libc::ENOENT)
    }

    /// Attributes for an entry reply; counts as one kernel lookup.
    fn entry_attr(&mut self, path: &Path, attr: &FileAttr) -> fuser::FileAttr {
        let ino = self.inodes.lookup(path);
        to_fuse_attr(ino, attr)
    }

    fn add_handle(&mut self, handle: FileHandle) -> (u64, u32) {
        let fh = self.next_handle;
        self.next_handle += 1;
        let flags = if handle.direct_io() { FOPEN_DIRECT_IO } else { 0 };
        self.handles.insert(fh, Arc::new(Mutex::new(handle)));
        (fh, flags)
    }

    /// Attributes of `path`, through `fh` when it is open and idle.
    fn attr_for(&self, path: &Path, fh: Option<u64>) -> VfsResult<FileAttr> {
        match fh.and_then(|fh| self.handles.get(&fh)) {
            Some(handle) => match handle.try_lock() {
                Some(handle) => self.monitor.fgetattr(&handle),
                // Busy with I/O on a worker: the path gives the same answer.
                None => self.monitor.getattr(path),
            },
            None => self.monitor.getattr(path),
        }
    }

    /// Run `io` on a worker with the handle locked, then `reply` there.
    fn spawn_io<T, F, R>(&self, fh: u64, op: &'static str, io: F, reply: R)
    where
        T: Send + 'static,
        F: FnOnce(&MonitorFs<B>, &mut FileHandle) -> VfsResult<T> + Send + 'static,
        R: FnOnce(Result<T, i32>) + Send + 'static,
    {
        let Some(handle) = self.handles.get(&fh).cloned() else {
            reply(Err(libc::EBADF));
            return;
        };
        let monitor = Arc::clone(&self.monitor);
        self.pool.execute(move || {
            let mut handle = handle.lock();
            let result = io(&monitor, &mut *handle).map_err(|e| errno(op, handle.base(), &e));
            drop(handle);
            reply(result);
        });
    }

    /// Forget `fh` and close it unless a worker still holds it.
    fn release_handle(&mut self, fh: u64) -> Result<(), i32> {
        let handle = self.handles.remove(&fh).ok_or(libc::EBADF)?;
        match Arc::try_unwrap(handle) {
            Ok(handle) => {
                let handle = handle.into_inner();
                let path = handle.base().to_path_buf();
                self.monitor
                    .release(handle)
                    .map_err(|e| errno("release", &path, &e))
            }
            Err(_busy) => {
                // The last worker to finish drops it.
                debug!(fh, "released with I/O in flight");
                Ok(())
            }
        }
    }
}

/// Caller identity, looked up only for I/O that gets logged.
fn caller(pid: u32, handle: &FileHandle) -> CallerInfo {
    if handle.is_real() {
        CallerInfo::from_pid(pid)
    } else {
        CallerInfo::new(pid, UNKNOWN_PROCESS)
    }
}

fn errno(op: &str, path: &Path, err: &VfsError) -> i32 {
    let code = err.errno();
    if code == libc::ENOENT {
        debug!(op, path = %path.display(), "not found");
    } else {
        warn!(op, path = %path.display(), error = %err, "request failed");
    }
    code
}

fn reply_empty(reply: ReplyEmpty) -> impl FnOnce(Result<(), i32>) + Send + 'static {
    move |result| match result {
        Ok(()) => reply.ok(),
        Err(code) => reply.error(code),
    }
}

fn to_fuse_attr(ino: u64, attr: &FileAttr) -> fuser::FileAttr {
    fuser::FileAttr {
        ino,
        size: attr.size,
        blocks: attr.blocks,
        atime: attr.atime,
        mtime: attr.mtime,
        ctime: attr.ctime,
        crtime: attr.ctime,
        kind: to_fuse_kind(attr.kind),
        perm: attr.perm as u16,
        nlink: attr.nlink,
        uid: attr.uid,
        gid: attr.gid,
        rdev: attr.rdev,
        blksize: attr.blksize,
        flags: 0,
    }
}

fn to_fuse_kind(kind: FileType) -> FuseFileType {
    match kind {
        FileType::File => FuseFileType::RegularFile,
        FileType::Directory => FuseFileType::Directory,
        FileType::Symlink => FuseFileType::Symlink,
        FileType::Fifo => FuseFileType::NamedPipe,
        FileType::Socket => FuseFileType::Socket,
        FileType::CharDevice => FuseFileType::CharDevice,
        FileType::BlockDevice => FuseFileType::BlockDevice,
    }
}

fn to_system_time(time: TimeOrNow) -> SystemTime {
    match time {
        TimeOrNow::SpecificTime(t) => t,
        TimeOrNow::Now => SystemTime::now(),
    }
}

/// Unwrap a `Result<_, errno>` or answer the request with the errno.
macro_rules! try_reply {
    ($reply:expr, $result:expr) => {
        match $result {
            Ok(value) => value,
            Err(code) => {
                $reply.error(code);
                return;
            }
        }
    };
}

impl<B: VfsOps + 'static> Filesystem for HeatFuse<B> {
    fn destroy(&mut self) {
        info!(
            open_handles = self.handles.len(),
            inodes = self.inodes.len(),
            io_threads = self.pool.threads(),
            "filesystem unmounted"
        );
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        self.inodes.forget(ino, nlookup);
    }

    // ========================================================================
    // Metadata
    // ========================================================================

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let path = try_reply!(reply, self.child(parent, name));
        let attr = try_reply!(
            reply,
            self.monitor.getattr(&path).map_err(|e| errno("lookup", &path, &e))
        );
        let attr = self.entry_attr(&path, &attr);
        reply.entry(&self.ttl, &attr, 0);
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, fh: Option<u64>, reply: ReplyAttr) {
        let path = try_reply!(reply, self.path(ino));
        let attr = try_reply!(
            reply,
            self.attr_for(&path, fh).map_err(|e| errno("getattr", &path, &e))
        );
        reply.attr(&self.ttl, &to_fuse_attr(ino, &attr));
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let path = try_reply!(reply, self.path(ino));
        let mut changes = SetAttr {
            size,
            mtime: mtime.map(to_system_time),
            atime: atime.map(to_system_time),
            perm: mode.map(|m| m & 0o7777),
            uid,
            gid,
        };

        // Truncation through an open handle goes to its descriptor.
        if let (Some(size), Some(handle)) = (size, fh.and_then(|fh| self.handles.get(&fh))) {
            try_reply!(
                reply,
                self.monitor
                    .ftruncate(&handle.lock(), size)
                    .map_err(|e| errno("ftruncate", &path, &e))
            );
            changes.size = None;
        }

        let attr = try_reply!(
            reply,
            self.monitor
                .setattr(&path, changes)
                .map_err(|e| errno("setattr", &path, &e))
        );
        reply.attr(&self.ttl, &to_fuse_attr(ino, &attr));
    }

    fn readlink(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyData) {
        let path = try_reply!(reply, self.path(ino));
        let target = try_reply!(
            reply,
            self.monitor.readlink(&path).map_err(|e| errno("readlink", &path, &e))
        );
        reply.data(target.as_os_str().as_bytes());
    }

    fn access(&mut self, _req: &Request<'_>, ino: u64, mask: i32, reply: ReplyEmpty) {
        let path = try_reply!(reply, self.path(ino));
        try_reply!(
            reply,
            self.monitor.access(&path, mask).map_err(|e| errno("access", &path, &e))
        );
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        let st = try_reply!(
            reply,
            self.monitor.statfs().map_err(|e| errno("statfs", Path::new("/"), &e))
        );
        reply.statfs(
            st.blocks, st.bfree, st.bavail, st.files, st.ffree, st.bsize, st.namelen, st.frsize,
        );
    }

    // ========================================================================
    // Namespace
    // ========================================================================

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let path = try_reply!(reply, self.path(ino));
        let entries = try_reply!(
            reply,
            self.monitor.readdir(&path).map_err(|e| errno("readdir", &path, &e))
        );

        let parent_ino = path
            .parent()
            .and_then(|parent| self.inodes.peek(parent))
            .unwrap_or(ROOT_INODE);
        let mut listing = Vec::with_capacity(entries.len() + 2);
        listing.push((ino, FuseFileType::Directory, ".".to_string()));
        listing.push((parent_ino, FuseFileType::Directory, "..".to_string()));
        for entry in entries {
            let child = self
                .inodes
                .peek(&path.join(&entry.name))
                .unwrap_or(UNLISTED_INODE);
            listing.push((child, to_fuse_kind(entry.kind), entry.name));
        }

        let start = offset.max(0) as usize;
        for (i, (child, kind, name)) in listing.into_iter().enumerate().skip(start) {
            if reply.add(child, (i + 1) as i64, kind, name) {
                break;
            }
        }
        reply.ok();
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
        let path = try_reply!(reply, self.child(parent, name));
        let attr = try_reply!(
            reply,
            self.monitor
                .mkdir(&path, mode & !umask & 0o7777)
                .map_err(|e| errno("mkdir", &path, &e))
        );
        let attr = self.entry_attr(&path, &attr);
        reply.entry(&self.ttl, &attr, 0);
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let path = try_reply!(reply, self.child(parent, name));
        try_reply!(
            reply,
            self.monitor.unlink(&path).map_err(|e| errno("unlink", &path, &e))
        );
        self.inodes.remove(&path);
        reply.ok();
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let path = try_reply!(reply, self.child(parent, name));
        try_reply!(
            reply,
            self.monitor.rmdir(&path).map_err(|e| errno("rmdir", &path, &e))
        );
        self.inodes.remove(&path);
        reply.ok();
    }

    fn symlink(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        link_name: &OsStr,
        target: &Path,
        reply: ReplyEntry,
    ) {
        let path = try_reply!(reply, self.child(parent, link_name));
        let attr = try_reply!(
            reply,
            self.monitor
                .symlink(&path, target)
                .map_err(|e| errno("symlink", &path, &e))
        );
        let attr = self.entry_attr(&path, &attr);
        reply.entry(&self.ttl, &attr, 0);
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let from = try_reply!(reply, self.child(parent, name));
        let to = try_reply!(reply, self.child(newparent, newname));
        try_reply!(
            reply,
            self.monitor.rename(&from, &to).map_err(|e| errno("rename", &from, &e))
        );
        self.inodes.rename(&from, &to);
        reply.ok();
    }

    fn link(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        newparent: u64,
        newname: &OsStr,
        reply: ReplyEntry,
    ) {
        let old = try_reply!(reply, self.path(ino));
        let new = try_reply!(reply, self.child(newparent, newname));
        let attr = try_reply!(
            reply,
            self.monitor.link(&old, &new).map_err(|e| errno("link", &new, &e))
        );
        let attr = self.entry_attr(&new, &attr);
        reply.entry(&self.ttl, &attr, 0);
    }

    // ========================================================================
    // Handles
    // ========================================================================

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let path = try_reply!(reply, self.path(ino));
        let handle = try_reply!(
            reply,
            self.monitor
                .open(&path, OpenFlags::from_raw(flags))
                .map_err(|e| errno("open", &path, &e))
        );
        let (fh, open_flags) = self.add_handle(handle);
        reply.opened(fh, open_flags);
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        let path = try_reply!(reply, self.child(parent, name));
        let handle = try_reply!(
            reply,
            self.monitor
                .create(&path, OpenFlags::from_raw(flags), mode & !umask & 0o7777)
                .map_err(|e| errno("create", &path, &e))
        );
        let attr = try_reply!(
            reply,
            self.monitor
                .fgetattr(&handle)
                .map_err(|e| errno("create", &path, &e))
        );
        let attr = self.entry_attr(&path, &attr);
        let (fh, open_flags) = self.add_handle(handle);
        reply.created(&self.ttl, &attr, 0, fh, open_flags);
    }

    fn read(
        &mut self,
        req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let offset = try_reply!(reply, u64::try_from(offset).map_err(|_| libc::EINVAL));
        let pid = req.pid();
        self.spawn_io(
            fh,
            "read",
            move |monitor, handle| {
                let caller = caller(pid, handle);
                monitor.read(handle, offset, size, &caller)
            },
            move |result| match result {
                Ok(data) => reply.data(&data),
                Err(code) => reply.error(code),
            },
        );
    }

    fn write(
        &mut self,
        req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let offset = try_reply!(reply, u64::try_from(offset).map_err(|_| libc::EINVAL));
        let pid = req.pid();
        let data = data.to_vec();
        self.spawn_io(
            fh,
            "write",
            move |monitor, handle| {
                let caller = caller(pid, handle);
                monitor.write(handle, offset, &data, &caller)
            },
            move |result| match result {
                Ok(written) => reply.written(written),
                Err(code) => reply.error(code),
            },
        );
    }

    fn flush(&mut self, _req: &Request<'_>, _ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        self.spawn_io(
            fh,
            "flush",
            |monitor, handle| monitor.flush(handle),
            reply_empty(reply),
        );
    }

    fn fsync(&mut self, _req: &Request<'_>, _ino: u64, fh: u64, datasync: bool, reply: ReplyEmpty) {
        self.spawn_io(
            fh,
            "fsync",
            move |monitor, handle| monitor.fsync(handle, datasync),
            reply_empty(reply),
        );
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        try_reply!(reply, self.release_handle(fh));
        reply.ok();
    }
}

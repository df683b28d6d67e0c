//! Attribute, listing and open-flag types shared by every backend.
//!
//! Path-based and independent of the FUSE binding; the adapter crate turns
//! these into kernel protocol structures.

use std::fs::Metadata;
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Permission bits reported for synthesized files.
pub const SYNTHETIC_PERM: u32 = 0o444;

/// Kind of a node in the mirrored tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    File,
    Directory,
    Symlink,
    Fifo,
    Socket,
    CharDevice,
    BlockDevice,
}

impl FileType {
    pub fn is_file(&self) -> bool {
        *self == FileType::File
    }

    pub fn is_dir(&self) -> bool {
        *self == FileType::Directory
    }

    pub(crate) fn from_std(ft: std::fs::FileType) -> Self {
        if ft.is_dir() {
            FileType::Directory
        } else if ft.is_symlink() {
            FileType::Symlink
        } else if ft.is_fifo() {
            FileType::Fifo
        } else if ft.is_socket() {
            FileType::Socket
        } else if ft.is_char_device() {
            FileType::CharDevice
        } else if ft.is_block_device() {
            FileType::BlockDevice
        } else {
            FileType::File
        }
    }
}

/// `stat(2)` view of a node, real or synthesized.
#[derive(Debug, Clone, PartialEq)]
pub struct FileAttr {
    /// Inode on the mirrored filesystem; 0 for synthesized files.
    pub ino: u64,
    pub size: u64,
    /// 512-byte units.
    pub blocks: u64,
    pub kind: FileType,
    /// Mode bits without the type, e.g. `0o644`.
    pub perm: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u32,
    pub blksize: u32,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
}

impl FileAttr {
    pub fn from_metadata(meta: &Metadata) -> Self {
        Self {
            ino: meta.ino(),
            size: meta.len(),
            blocks: meta.blocks(),
            kind: FileType::from_std(meta.file_type()),
            perm: meta.permissions().mode() & 0o7777,
            nlink: meta.nlink() as u32,
            uid: meta.uid(),
            gid: meta.gid(),
            rdev: meta.rdev() as u32,
            blksize: meta.blksize() as u32,
            atime: unix_time(meta.atime(), meta.atime_nsec()),
            mtime: unix_time(meta.mtime(), meta.mtime_nsec()),
            ctime: unix_time(meta.ctime(), meta.ctime_nsec()),
        }
    }

    /// Attributes of a synthesized, read-only regular file.
    ///
    /// Ownership and timestamps are borrowed from the base file.
    pub fn synthetic(size: u64, base: &FileAttr) -> Self {
        Self {
            ino: 0,
            size,
            blocks: size.div_ceil(512),
            kind: FileType::File,
            perm: SYNTHETIC_PERM,
            nlink: 1,
            uid: base.uid,
            gid: base.gid,
            rdev: 0,
            blksize: base.blksize,
            atime: base.atime,
            mtime: base.mtime,
            ctime: base.ctime,
        }
    }

    pub fn is_file(&self) -> bool {
        self.kind.is_file()
    }

    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }
}

fn unix_time(secs: i64, nsecs: i64) -> SystemTime {
    let nanos = Duration::from_nanos(nsecs.clamp(0, 999_999_999) as u64);
    if secs >= 0 {
        UNIX_EPOCH + Duration::from_secs(secs as u64) + nanos
    } else {
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs()) + nanos
    }
}

/// One name in a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Bare name, never a path.
    pub name: String,
    pub kind: FileType,
}

impl DirEntry {
    pub fn new(name: impl Into<String>, kind: FileType) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn file(name: impl Into<String>) -> Self {
        Self::new(name, FileType::File)
    }

    pub fn directory(name: impl Into<String>) -> Self {
        Self::new(name, FileType::Directory)
    }
}

/// Changes requested by `setattr`; `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct SetAttr {
    /// Truncate or extend to this length.
    pub size: Option<u64>,
    pub mtime: Option<SystemTime>,
    pub atime: Option<SystemTime>,
    pub perm: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

impl SetAttr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_perm(mut self, perm: u32) -> Self {
        self.perm = Some(perm);
        self
    }

    /// Nothing to change.
    pub fn is_empty(&self) -> bool {
        self.size.is_none()
            && self.mtime.is_none()
            && self.atime.is_none()
            && self.perm.is_none()
            && self.uid.is_none()
            && self.gid.is_none()
    }
}

/// `statvfs(2)` of the filesystem holding the mirrored tree.
#[derive(Debug, Clone)]
pub struct StatFs {
    pub blocks: u64,
    pub bfree: u64,
    /// Free blocks usable by unprivileged callers.
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub bsize: u32,
    pub namelen: u32,
    pub frsize: u32,
}

/// Open file flags, decoded from the raw `O_*` bits the kernel passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags {
    pub read: bool,
    pub write: bool,
    pub append: bool,
    /// The raw flag word; creation and truncation bits reach `open(2)`
    /// through it unchanged.
    pub raw: i32,
}

impl Default for OpenFlags {
    fn default() -> Self {
        Self::from_raw(libc::O_RDONLY)
    }
}

impl OpenFlags {
    /// Decode raw `open(2)` flags.
    pub fn from_raw(flags: i32) -> Self {
        let access = flags & libc::O_ACCMODE;
        Self {
            read: access == libc::O_RDONLY || access == libc::O_RDWR,
            write: access == libc::O_WRONLY || access == libc::O_RDWR,
            append: flags & libc::O_APPEND != 0,
            raw: flags,
        }
    }

    /// `O_RDONLY`.
    pub fn read() -> Self {
        Self::default()
    }

    /// `O_RDWR`.
    pub fn read_write() -> Self {
        Self::from_raw(libc::O_RDWR)
    }

    /// Whether a handle opened this way may modify the file.
    pub fn is_writable(&self) -> bool {
        self.write || self.append
    }
}

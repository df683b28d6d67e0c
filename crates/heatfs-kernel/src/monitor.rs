//! The monitoring filesystem.
//!
//! [`MonitorFs`] sits between the FUSE adapter and a [`VfsOps`] backend.
//! Real paths pass through; every completed read or write on a real handle
//! is appended to that file's access log. Synthetic `.csv` and
//! `-heatmap.png` paths are served from the log store and the heatmap
//! engine.
//!
//! ## Handle lifecycle
//!
//! The handle variant is chosen once, at open, from the path's
//! [`PathRole`]:
//!
//! | Operation | Real | Log | Heatmap |
//! |---|---|---|---|
//! | read | positional read, then log | slice of the log | render once, then slice |
//! | write | positional write, then log | ignored (0) | ignored (0) |
//! | flush / fsync | forwarded | no-op | no-op |
//! | fgetattr | stat of the fd | synthetic, from base | synthetic, size 0 |
//! | ftruncate | forwarded | ignored | ignored |

use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::access_log::{shared_access_log, AccessDirection, LogRow, SharedAccessLog};
use crate::config::MonitorConfig;
use crate::heatmap::HeatmapEngine;
use crate::process::CallerInfo;
use crate::resolve::{self, PathRole};
use crate::vfs::{
    DirEntry, FileAttr, LocalBackend, OpenFlags, SetAttr, StatFs, VfsError, VfsOps, VfsResult,
};

/// Open real file plus the key of its access log.
#[derive(Debug)]
pub struct RealHandle {
    path: PathBuf,
    key: String,
    file: File,
    flags: OpenFlags,
}

/// Open synthetic access log.
#[derive(Debug)]
pub struct LogHandle {
    base: PathBuf,
    key: String,
}

/// Open synthetic heatmap.
///
/// The image is rendered on the first read that finds logged data and
/// then kept for the life of the handle, even if more I/O is logged.
#[derive(Debug)]
pub struct HeatmapHandle {
    base: PathBuf,
    key: String,
    cache: Option<Vec<u8>>,
}

/// Per-open state, fixed at open time.
#[derive(Debug)]
pub enum FileHandle {
    Real(RealHandle),
    Log(LogHandle),
    Heatmap(HeatmapHandle),
}

impl FileHandle {
    /// Path of the underlying file (the base file for synthetic handles).
    pub fn base(&self) -> &Path {
        match self {
            FileHandle::Real(h) => &h.path,
            FileHandle::Log(h) => &h.base,
            FileHandle::Heatmap(h) => &h.base,
        }
    }

    pub fn is_real(&self) -> bool {
        matches!(self, FileHandle::Real(_))
    }

    /// Whether the kernel must bypass its page cache for this handle.
    ///
    /// Heatmaps advertise size 0, so cached reads would never reach us.
    pub fn direct_io(&self) -> bool {
        matches!(self, FileHandle::Heatmap(_))
    }
}

/// Pass-through filesystem that records and visualizes file access.
pub struct MonitorFs<B: VfsOps = LocalBackend> {
    backend: B,
    logs: SharedAccessLog,
    engine: HeatmapEngine,
}

impl<B: VfsOps> std::fmt::Debug for MonitorFs<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorFs")
            .field("logs", &self.logs)
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

impl<B: VfsOps> MonitorFs<B> {
    pub fn new(backend: B, logs: SharedAccessLog, engine: HeatmapEngine) -> Self {
        Self {
            backend,
            logs,
            engine,
        }
    }

    /// Monitor with a fresh log store and a PNG engine configured by
    /// `config`.
    pub fn from_config(backend: B, config: &MonitorConfig) -> Self {
        Self::new(backend, shared_access_log(), config.engine())
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn access_log(&self) -> &SharedAccessLog {
        &self.logs
    }

    pub fn engine(&self) -> &HeatmapEngine {
        &self.engine
    }

    /// What `path` refers to.
    pub fn classify(&self, path: &Path) -> PathRole {
        resolve::classify(path, |base| self.backend.is_file(base))
    }

    // ========================================================================
    // Path-level metadata
    // ========================================================================

    /// Attributes of `path` without an open handle.
    ///
    /// Synthetic heatmaps always report size 0: rendering just to answer
    /// a listing stat would be far too expensive.
    pub fn getattr(&self, path: &Path) -> VfsResult<FileAttr> {
        match self.classify(path) {
            PathRole::Real(path) => self.backend.getattr(&path),
            PathRole::SyntheticLog(base) => {
                let size = self.logs.len(&resolve::log_key(&base)).unwrap_or(0);
                Ok(FileAttr::synthetic(size, &self.backend.stat(&base)?))
            }
            PathRole::SyntheticHeatmap(base) => Ok(FileAttr::synthetic(0, &self.backend.stat(&base)?)),
        }
    }

    /// Directory listing with synthetic siblings for every regular file.
    pub fn readdir(&self, path: &Path) -> VfsResult<Vec<DirEntry>> {
        let role = self.classify(path);
        if role.is_synthetic() {
            return Err(VfsError::NotADirectory(path.display().to_string()));
        }
        let entries = self.backend.readdir(path)?;
        Ok(resolve::with_synthetic_entries(path, entries, |p| {
            self.backend.is_file(p)
        }))
    }

    // ========================================================================
    // Handles
    // ========================================================================

    /// Open `path`, creating its log header if this is the first open.
    pub fn open(&self, path: &Path, flags: OpenFlags) -> VfsResult<FileHandle> {
        let handle = match self.classify(path) {
            PathRole::Real(path) => {
                let file = self.backend.open(&path, flags)?;
                FileHandle::Real(RealHandle {
                    key: resolve::log_key(&path),
                    path,
                    file,
                    flags,
                })
            }
            PathRole::SyntheticLog(base) => FileHandle::Log(LogHandle {
                key: resolve::log_key(&base),
                base,
            }),
            PathRole::SyntheticHeatmap(base) => FileHandle::Heatmap(HeatmapHandle {
                key: resolve::log_key(&base),
                base,
                cache: None,
            }),
        };

        let key = match &handle {
            FileHandle::Real(h) => &h.key,
            FileHandle::Log(h) => &h.key,
            FileHandle::Heatmap(h) => &h.key,
        };
        self.logs.ensure_header(key);
        debug!(path = %path.display(), real = handle.is_real(), "open");
        Ok(handle)
    }

    /// Create and open a new real file.
    pub fn create(&self, path: &Path, flags: OpenFlags, mode: u32) -> VfsResult<FileHandle> {
        if self.classify(path).is_synthetic() {
            return Err(VfsError::permission_denied(path.display().to_string()));
        }
        let file = self.backend.create(path, flags, mode)?;
        let key = resolve::log_key(path);
        self.logs.ensure_header(&key);
        debug!(path = %path.display(), mode, "create");
        Ok(FileHandle::Real(RealHandle {
            path: path.to_path_buf(),
            key,
            file,
            flags,
        }))
    }

    /// Read up to `size` bytes at `offset`.
    ///
    /// For real handles the row logged records the bytes actually read,
    /// which may be fewer than requested near end of file.
    pub fn read(
        &self,
        handle: &mut FileHandle,
        offset: u64,
        size: u32,
        caller: &CallerInfo,
    ) -> VfsResult<Vec<u8>> {
        match handle {
            FileHandle::Real(h) => {
                let mut buf = vec![0u8; size as usize];
                let n = h.file.read_at(&mut buf, offset)?;
                buf.truncate(n);

                let file_size = h.file.metadata()?.len();
                let row = LogRow::now(AccessDirection::Read, offset, n as u64, file_size, caller);
                self.logs.append(&h.key, &row)?;
                debug!(
                    path = %h.path.display(),
                    offset,
                    length = n,
                    pid = caller.pid,
                    "read"
                );
                Ok(buf)
            }
            FileHandle::Log(h) => Ok(self.logs.read_slice(&h.key, offset, size as usize)),
            FileHandle::Heatmap(h) => {
                if h.cache.is_none() {
                    let text = self.logs.snapshot_text(&h.key).unwrap_or_default();
                    let image = self.engine.render(&h.key, &text).inspect_err(|e| {
                        warn!(path = %h.base.display(), error = %e, "heatmap rendering failed");
                    })?;
                    if image.is_empty() {
                        // Header only: retry on the next read.
                        return Ok(Vec::new());
                    }
                    debug!(path = %h.base.display(), bytes = image.len(), "heatmap rendered");
                    h.cache = Some(image);
                }
                Ok(h.cache.as_deref().map(|image| clip(image, offset, size)).unwrap_or_default())
            }
        }
    }

    /// Write `data` at `offset`; synthetic handles accept nothing.
    pub fn write(
        &self,
        handle: &mut FileHandle,
        offset: u64,
        data: &[u8],
        caller: &CallerInfo,
    ) -> VfsResult<u32> {
        let FileHandle::Real(h) = handle else {
            return Ok(0);
        };

        let n = h.file.write_at(data, offset)?;
        // Size after the write; it may have grown.
        let file_size = h.file.metadata()?.len();
        let row = LogRow::now(AccessDirection::Write, offset, n as u64, file_size, caller);
        self.logs.append(&h.key, &row)?;
        debug!(
            path = %h.path.display(),
            offset,
            length = n,
            pid = caller.pid,
            "write"
        );
        Ok(n as u32)
    }

    /// Flush a real handle by closing a duplicate of its descriptor.
    pub fn flush(&self, handle: &FileHandle) -> VfsResult<()> {
        match handle {
            FileHandle::Real(h) if h.flags.is_writable() => {
                drop(h.file.try_clone()?);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Sync a real handle to storage (data only if `datasync`).
    pub fn fsync(&self, handle: &FileHandle, datasync: bool) -> VfsResult<()> {
        let FileHandle::Real(h) = handle else {
            return Ok(());
        };
        if datasync {
            h.file.sync_data()?;
        } else {
            h.file.sync_all()?;
        }
        Ok(())
    }

    /// Close the handle.
    pub fn release(&self, handle: FileHandle) -> VfsResult<()> {
        debug!(path = %handle.base().display(), "release");
        drop(handle);
        Ok(())
    }

    /// Attributes through an open handle.
    pub fn fgetattr(&self, handle: &FileHandle) -> VfsResult<FileAttr> {
        match handle {
            FileHandle::Real(h) => Ok(FileAttr::from_metadata(&h.file.metadata()?)),
            FileHandle::Log(h) => {
                let size = self.logs.len(&h.key).unwrap_or(0);
                Ok(FileAttr::synthetic(size, &self.backend.stat(&h.base)?))
            }
            // Same as the path: direct I/O makes the size irrelevant.
            FileHandle::Heatmap(h) => Ok(FileAttr::synthetic(0, &self.backend.stat(&h.base)?)),
        }
    }

    /// Truncate through an open handle; ignored for synthetic handles.
    pub fn ftruncate(&self, handle: &FileHandle, size: u64) -> VfsResult<()> {
        if let FileHandle::Real(h) = handle {
            h.file.set_len(size)?;
        }
        Ok(())
    }

    // ========================================================================
    // Pass-through path operations
    // ========================================================================

    pub fn readlink(&self, path: &Path) -> VfsResult<PathBuf> {
        match self.classify(path) {
            PathRole::Real(path) => self.backend.readlink(&path),
            _ => Err(VfsError::invalid_path(path.display().to_string())),
        }
    }

    pub fn mkdir(&self, path: &Path, mode: u32) -> VfsResult<FileAttr> {
        self.real_only(path)?;
        self.backend.mkdir(path, mode)
    }

    pub fn unlink(&self, path: &Path) -> VfsResult<()> {
        self.real_only(path)?;
        self.backend.unlink(path)
    }

    pub fn rmdir(&self, path: &Path) -> VfsResult<()> {
        self.real_only(path)?;
        self.backend.rmdir(path)
    }

    pub fn symlink(&self, path: &Path, target: &Path) -> VfsResult<FileAttr> {
        self.real_only(path)?;
        self.backend.symlink(path, target)
    }

    pub fn rename(&self, from: &Path, to: &Path) -> VfsResult<()> {
        self.real_only(from)?;
        self.real_only(to)?;
        self.backend.rename(from, to)
    }

    pub fn link(&self, oldpath: &Path, newpath: &Path) -> VfsResult<FileAttr> {
        self.real_only(oldpath)?;
        self.real_only(newpath)?;
        self.backend.link(oldpath, newpath)
    }

    /// chmod / chown / truncate / utime by path.
    ///
    /// An empty change on a synthetic path succeeds and returns its
    /// current attributes.
    pub fn setattr(&self, path: &Path, attr: SetAttr) -> VfsResult<FileAttr> {
        if attr.is_empty() {
            return self.getattr(path);
        }
        self.real_only(path)?;
        self.backend.setattr(path, attr)
    }

    /// `access(2)`; synthetic files are readable but never writable or
    /// executable.
    pub fn access(&self, path: &Path, mask: i32) -> VfsResult<()> {
        match self.classify(path) {
            PathRole::Real(path) => self.backend.access(&path, mask),
            _ if mask & (libc::W_OK | libc::X_OK) != 0 => {
                Err(VfsError::permission_denied(path.display().to_string()))
            }
            _ => Ok(()),
        }
    }

    pub fn statfs(&self) -> VfsResult<StatFs> {
        self.backend.statfs()
    }

    fn real_only(&self, path: &Path) -> VfsResult<()> {
        if self.classify(path).is_synthetic() {
            warn!(path = %path.display(), "refusing to modify synthetic file");
            return Err(VfsError::permission_denied(path.display().to_string()));
        }
        Ok(())
    }
}

fn clip(data: &[u8], offset: u64, size: u32) -> Vec<u8> {
    let start = usize::try_from(offset).unwrap_or(usize::MAX).min(data.len());
    let end = start.saturating_add(size as usize).min(data.len());
    data[start..end].to_vec()
}

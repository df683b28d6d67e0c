//! Local filesystem backend.
//!
//! Mirrors a real directory tree. Every path is resolved lexically against
//! the root, so a root given as `/proc/self/fd/<n>` keeps working after
//! something else has been mounted over the original directory.

use std::fs::{self, File, OpenOptions};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt, PermissionsExt};
use std::path::{Component, Path, PathBuf};

use crate::vfs::error::{VfsError, VfsResult};
use crate::vfs::ops::VfsOps;
use crate::vfs::types::{DirEntry, FileAttr, FileType, OpenFlags, SetAttr, StatFs};

/// Local filesystem backend.
///
/// All operations are relative to `root`. For example, if `root` is
/// `/srv/media`, then `open("/movie.iso")` opens `/srv/media/movie.iso`.
///
/// Attempts to climb above the root via `..` are rejected.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    /// Create a new local filesystem rooted at the given path.
    ///
    /// The root is canonicalized at construction time to handle symlinks
    /// (e.g. macOS `/tmp` → `/private/tmp`).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root: PathBuf = root.into();
        let root = dunce::canonicalize(&root).unwrap_or(root);
        Self { root }
    }

    /// Create a backend on a root that must be used verbatim.
    ///
    /// Needed for `/proc/self/fd/<n>` roots: canonicalizing those would
    /// resolve to the mountpoint path and loop back into the mount.
    pub fn with_raw_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Get the root path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a relative path to an absolute path within the root.
    ///
    /// Returns an error if the path escapes the root (via `..`).
    fn resolve(&self, path: &Path) -> VfsResult<PathBuf> {
        let mut relative = PathBuf::new();
        for component in path.components() {
            match component {
                Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
                Component::ParentDir => {
                    if !relative.pop() {
                        return Err(VfsError::path_escapes_root(path.display().to_string()));
                    }
                }
                Component::Normal(s) => relative.push(s),
            }
        }

        if relative.as_os_str().is_empty() {
            Ok(self.root.clone())
        } else {
            Ok(self.root.join(relative))
        }
    }

    fn open_options(flags: OpenFlags) -> OpenOptions {
        let mut options = OpenOptions::new();
        options
            .read(flags.read)
            .write(flags.write)
            .append(flags.append)
            .custom_flags(flags.raw & !libc::O_ACCMODE);
        options
    }
}

impl VfsOps for LocalBackend {
    fn getattr(&self, path: &Path) -> VfsResult<FileAttr> {
        let full_path = self.resolve(path)?;
        let meta = fs::symlink_metadata(&full_path)?;
        Ok(FileAttr::from_metadata(&meta))
    }

    fn stat(&self, path: &Path) -> VfsResult<FileAttr> {
        let full_path = self.resolve(path)?;
        let meta = fs::metadata(&full_path)?;
        Ok(FileAttr::from_metadata(&meta))
    }

    fn readdir(&self, path: &Path) -> VfsResult<Vec<DirEntry>> {
        let full_path = self.resolve(path)?;
        let mut entries = Vec::new();

        for entry in fs::read_dir(&full_path)? {
            let entry = entry?;
            let kind = FileType::from_std(entry.file_type()?);
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                kind,
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn readlink(&self, path: &Path) -> VfsResult<PathBuf> {
        let full_path = self.resolve(path)?;
        Ok(fs::read_link(&full_path)?)
    }

    fn access(&self, path: &Path, mask: i32) -> VfsResult<()> {
        use rustix::fs::{Access, CWD, AtFlags};

        let full_path = self.resolve(path)?;
        rustix::fs::accessat(CWD, &full_path, Access::from_bits_truncate(mask as _), AtFlags::empty())
            .map_err(|e| VfsError::Io(e.into()))
    }

    fn statfs(&self) -> VfsResult<StatFs> {
        use rustix::fs::statvfs;

        let stat = statvfs(&self.root).map_err(|e| VfsError::Io(e.into()))?;

        Ok(StatFs {
            blocks: stat.f_blocks,
            bfree: stat.f_bfree,
            bavail: stat.f_bavail,
            files: stat.f_files,
            ffree: stat.f_ffree,
            bsize: stat.f_bsize as u32,
            namelen: stat.f_namemax as u32,
            frsize: stat.f_frsize as u32,
        })
    }

    fn open(&self, path: &Path, flags: OpenFlags) -> VfsResult<File> {
        let full_path = self.resolve(path)?;
        Ok(Self::open_options(flags).open(&full_path)?)
    }

    fn create(&self, path: &Path, flags: OpenFlags, mode: u32) -> VfsResult<File> {
        let full_path = self.resolve(path)?;
        let mut options = Self::open_options(flags);
        // O_CREAT without a writable access mode is legal but std refuses it.
        if !flags.write && !flags.append {
            options.write(true);
        }
        Ok(options.create(true).mode(mode).open(&full_path)?)
    }

    fn mkdir(&self, path: &Path, mode: u32) -> VfsResult<FileAttr> {
        let full_path = self.resolve(path)?;

        fs::DirBuilder::new().mode(mode).create(&full_path)?;

        let meta = fs::symlink_metadata(&full_path)?;
        Ok(FileAttr::from_metadata(&meta))
    }

    fn unlink(&self, path: &Path) -> VfsResult<()> {
        let full_path = self.resolve(path)?;
        Ok(fs::remove_file(&full_path)?)
    }

    fn rmdir(&self, path: &Path) -> VfsResult<()> {
        let full_path = self.resolve(path)?;
        Ok(fs::remove_dir(&full_path)?)
    }

    fn rename(&self, from: &Path, to: &Path) -> VfsResult<()> {
        let from_path = self.resolve(from)?;
        let to_path = self.resolve(to)?;
        Ok(fs::rename(&from_path, &to_path)?)
    }

    fn symlink(&self, path: &Path, target: &Path) -> VfsResult<FileAttr> {
        let full_path = self.resolve(path)?;
        std::os::unix::fs::symlink(target, &full_path)?;
        self.getattr(path)
    }

    fn link(&self, oldpath: &Path, newpath: &Path) -> VfsResult<FileAttr> {
        let old_full = self.resolve(oldpath)?;
        let new_full = self.resolve(newpath)?;
        fs::hard_link(&old_full, &new_full)?;
        self.getattr(newpath)
    }

    fn setattr(&self, path: &Path, attr: SetAttr) -> VfsResult<FileAttr> {
        let full_path = self.resolve(path)?;

        if let Some(perm) = attr.perm {
            fs::set_permissions(&full_path, fs::Permissions::from_mode(perm))?;
        }

        if attr.uid.is_some() || attr.gid.is_some() {
            std::os::unix::fs::chown(&full_path, attr.uid, attr.gid)?;
        }

        if let Some(size) = attr.size {
            let file = OpenOptions::new().write(true).open(&full_path)?;
            file.set_len(size)?;
        }

        if attr.atime.is_some() || attr.mtime.is_some() {
            let mut times = fs::FileTimes::new();
            if let Some(atime) = attr.atime {
                times = times.set_accessed(atime);
            }
            if let Some(mtime) = attr.mtime {
                times = times.set_modified(mtime);
            }
            File::open(&full_path)?.set_times(times)?;
        }

        self.getattr(path)
    }
}

//! Underlying filesystem operations trait.
//!
//! The monitor layer forwards every real-path request through this trait.
//! Calls are synchronous: the FUSE runtime dispatches one request per call
//! and waits for the reply.

use std::fs::File;
use std::path::{Path, PathBuf};

use super::types::{DirEntry, FileAttr, OpenFlags, SetAttr, StatFs};
use super::VfsResult;

/// Core underlying-filesystem trait.
///
/// Paths are relative to the backend's root; a leading `/` is accepted and
/// stripped.
pub trait VfsOps: Send + Sync {
    // ========================================================================
    // Metadata
    // ========================================================================

    /// Get attributes without following a final symlink (`lstat`).
    fn getattr(&self, path: &Path) -> VfsResult<FileAttr>;

    /// Get attributes, following symlinks (`stat`).
    fn stat(&self, path: &Path) -> VfsResult<FileAttr>;

    /// Read directory entries, sorted by name.
    fn readdir(&self, path: &Path) -> VfsResult<Vec<DirEntry>>;

    /// Read symbolic link target.
    fn readlink(&self, path: &Path) -> VfsResult<PathBuf>;

    /// Check access permissions (`access(2)` mask bits).
    fn access(&self, path: &Path, mask: i32) -> VfsResult<()>;

    /// Get filesystem statistics.
    fn statfs(&self) -> VfsResult<StatFs>;

    // ========================================================================
    // Handles
    // ========================================================================

    /// Open an existing file.
    fn open(&self, path: &Path, flags: OpenFlags) -> VfsResult<File>;

    /// Create and open a new file.
    fn create(&self, path: &Path, flags: OpenFlags, mode: u32) -> VfsResult<File>;

    // ========================================================================
    // Namespace
    // ========================================================================

    /// Create a new directory.
    fn mkdir(&self, path: &Path, mode: u32) -> VfsResult<FileAttr>;

    /// Remove a file.
    fn unlink(&self, path: &Path) -> VfsResult<()>;

    /// Remove an empty directory.
    fn rmdir(&self, path: &Path) -> VfsResult<()>;

    /// Rename a file or directory.
    fn rename(&self, from: &Path, to: &Path) -> VfsResult<()>;

    /// Create a symbolic link at `path` pointing to `target`.
    fn symlink(&self, path: &Path, target: &Path) -> VfsResult<FileAttr>;

    /// Create a hard link at `newpath` pointing to `oldpath`.
    fn link(&self, oldpath: &Path, newpath: &Path) -> VfsResult<FileAttr>;

    /// Set file attributes (chmod, chown, truncate, utime).
    fn setattr(&self, path: &Path, attr: SetAttr) -> VfsResult<FileAttr>;

    // ========================================================================
    // Convenience methods (default implementations)
    // ========================================================================

    /// Returns true if `path` names a regular file, following symlinks.
    fn is_file(&self, path: &Path) -> bool {
        self.stat(path).map(|attr| attr.is_file()).unwrap_or(false)
    }
}

//! Errors raised while serving the mirrored tree.

use std::io;
use thiserror::Error;

use crate::access_log::AccessLogError;
use crate::heatmap::HeatmapError;

#[derive(Debug, Error)]
pub enum VfsError {
    /// Also returned for every mutation of a synthesized path.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// A `..` component would leave the mirrored root.
    #[error("path escapes root: {0}")]
    PathEscapesRoot(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error(transparent)]
    AccessLog(#[from] AccessLogError),

    #[error(transparent)]
    Heatmap(#[from] HeatmapError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl VfsError {
    pub fn permission_denied(path: impl Into<String>) -> Self {
        Self::PermissionDenied(path.into())
    }

    pub fn path_escapes_root(path: impl Into<String>) -> Self {
        Self::PathEscapesRoot(path.into())
    }

    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath(path.into())
    }

    /// POSIX errno for replying to the kernel.
    ///
    /// Underlying I/O failures keep their raw OS error so they reach the
    /// caller unchanged.
    pub fn errno(&self) -> i32 {
        match self {
            VfsError::PermissionDenied(_) => libc::EACCES,
            VfsError::NotADirectory(_) => libc::ENOTDIR,
            VfsError::PathEscapesRoot(_) => libc::EACCES,
            VfsError::InvalidPath(_) => libc::EINVAL,
            VfsError::AccessLog(_) | VfsError::Heatmap(_) => libc::EIO,
            VfsError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}

pub type VfsResult<T> = Result<T, VfsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_errno_passes_through() {
        let err = VfsError::from(io::Error::from_raw_os_error(libc::ENOSPC));
        assert_eq!(err.errno(), libc::ENOSPC);
    }

    #[test]
    fn test_synthetic_errnos() {
        assert_eq!(VfsError::invalid_path("/x.csv").errno(), libc::EINVAL);
        assert_eq!(VfsError::permission_denied("/x.csv").errno(), libc::EACCES);
        assert_eq!(VfsError::NotADirectory("/f.csv".into()).errno(), libc::ENOTDIR);
        assert_eq!(
            VfsError::from(io::Error::other("no os code")).errno(),
            libc::EIO
        );
    }
}

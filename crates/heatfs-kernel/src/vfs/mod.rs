//! Underlying filesystem abstraction.
//!
//! Key components:
//!
//! - [`VfsOps`] - Operations the monitor forwards for real paths
//! - [`LocalBackend`] - Local directory tree (with path security)
//!
//! ## Design Decisions
//!
//! - **Path-based, no inodes**: Operations use paths, not inode numbers.
//!   The FUSE adapter handles inode ↔ path mapping.
//! - **Handles are real file descriptors**: `open`/`create` hand back a
//!   `std::fs::File`; positional I/O happens on it directly so the monitor
//!   can measure what was actually transferred.

pub mod backends;
mod error;
mod ops;
mod types;

pub use backends::LocalBackend;
pub use error::{VfsError, VfsResult};
pub use ops::VfsOps;
pub use types::{DirEntry, FileAttr, FileType, OpenFlags, SetAttr, StatFs, SYNTHETIC_PERM};

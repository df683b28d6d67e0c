//! VFS backends.
//!
//! Backends implement [`VfsOps`](crate::vfs::VfsOps) for the tree being
//! mirrored.

mod local;

pub use local::LocalBackend;

//! # heatfs-fuse
//!
//! FUSE binding for `heatfs-kernel`: inode bookkeeping, the
//! `fuser::Filesystem` adapter with its I/O worker pool, mount helpers,
//! and offline log conversion used by the `heatfs` binary.

pub mod convert;
pub mod filesystem;
pub mod inode;
pub mod mount;
pub mod pool;

pub use convert::render_log_file;
pub use filesystem::HeatFuse;
pub use inode::{InodeTable, ROOT_INODE};
pub use mount::{mount, mount_options, MirrorRoot, FS_NAME};
pub use pool::IoPool;

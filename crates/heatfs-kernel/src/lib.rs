//! # heatfs-kernel
//!
//! Core of an access-monitoring pass-through filesystem.
//!
//! A mirrored directory tree is exposed unchanged, except that every regular
//! file `F` gains two read-only siblings:
//! - `F.csv`: one CSV row per read or write performed on `F` through the
//!   mount (time, direction, offset, length, file size, process)
//! - `F-heatmap.png`: a square heatmap of which byte regions of `F` were
//!   touched how often
//!
//! The FUSE binding lives in `heatfs-fuse`; this crate is protocol-agnostic.

pub mod access_log;
pub mod config;
pub mod csv;
pub mod heatmap;
pub mod monitor;
pub mod process;
pub mod resolve;
pub mod vfs;

pub use access_log::{
    shared_access_log, AccessDirection, AccessLogError, AccessLogStore, LogRow, SharedAccessLog,
    LOG_COLUMNS,
};
pub use config::{ConfigError, MonitorConfig};
pub use heatmap::{
    AccessHeatmap, BucketGrid, ContrastNorm, HeatmapEngine, HeatmapError, HeatmapRenderer,
    PixelContribution, PixelMatrix, PngRenderer, Range, RenderRequest,
};
pub use monitor::{FileHandle, MonitorFs};
pub use process::CallerInfo;
pub use resolve::{PathRole, HEATMAP_SUFFIX, LOG_SUFFIX};
pub use vfs::{
    DirEntry, FileAttr, FileType, LocalBackend, OpenFlags, SetAttr, StatFs, VfsError, VfsOps,
    VfsResult,
};

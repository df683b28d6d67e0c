//! Mount helpers.
//!
//! A monitor may be mounted on top of the very directory it mirrors. The
//! directory is opened before mounting and then addressed through
//! `/proc/self/fd/<fd>`, which keeps pointing at the original, now
//! covered, tree.

use std::fs::File;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fuser::MountOption;
use tracing::info;

use heatfs_kernel::{LocalBackend, MonitorConfig, MonitorFs};

use crate::filesystem::HeatFuse;

/// Filesystem name shown in the mount table.
pub const FS_NAME: &str = "heatfs";

/// Backend for the mirrored tree plus, when mounting over it, the open
/// directory that must outlive the mount.
#[derive(Debug)]
pub struct MirrorRoot {
    pub backend: LocalBackend,
    pub dir: Option<File>,
}

impl MirrorRoot {
    /// Resolve what to mirror for a mount at `mountpoint`.
    ///
    /// Without an explicit `root`, or when it names the mountpoint itself,
    /// the mountpoint's current contents are mirrored.
    pub fn open(mountpoint: &Path, root: Option<&Path>) -> Result<Self> {
        let mountpoint = canonical(mountpoint)?;
        let root = match root {
            Some(root) => canonical(root)?,
            None => mountpoint.clone(),
        };

        if root != mountpoint {
            return Ok(Self {
                backend: LocalBackend::new(root),
                dir: None,
            });
        }

        let dir = File::open(&mountpoint)
            .with_context(|| format!("open {} before mounting over it", mountpoint.display()))?;
        let fd_path = format!("/proc/self/fd/{}", dir.as_raw_fd());
        Ok(Self {
            backend: LocalBackend::with_raw_root(fd_path),
            dir: Some(dir),
        })
    }
}

fn canonical(path: &Path) -> Result<PathBuf> {
    path.canonicalize()
        .with_context(|| format!("resolve {}", path.display()))
}

/// FUSE mount options for `config`.
pub fn mount_options(config: &MonitorConfig) -> Vec<MountOption> {
    let mut options = vec![
        MountOption::FSName(FS_NAME.to_string()),
        MountOption::DefaultPermissions,
    ];
    if config.auto_unmount {
        options.push(MountOption::AutoUnmount);
    }
    if config.allow_other {
        options.push(MountOption::AllowOther);
    }
    options
}

/// Mount a monitor at `mountpoint` and serve it until unmounted.
pub fn mount(mountpoint: &Path, root: Option<&Path>, config: &MonitorConfig) -> Result<()> {
    config.validate()?;
    let mirror = MirrorRoot::open(mountpoint, root)?;
    info!(
        mountpoint = %mountpoint.display(),
        root = %mirror.backend.root().display(),
        side_length = config.side_length,
        io_threads = config.io_threads,
        "mounting"
    );

    let monitor = MonitorFs::from_config(mirror.backend, config);
    let filesystem = HeatFuse::new(monitor, config.attr_ttl(), config.io_threads)
        .context("start I/O workers")?;
    fuser::mount2(filesystem, mountpoint, &mount_options(config))
        .with_context(|| format!("mount {}", mountpoint.display()))?;

    // The covered directory stays open for the whole session.
    drop(mirror.dir);
    info!(mountpoint = %mountpoint.display(), "unmounted");
    Ok(())
}

//! heatfs binary.
//!
//! Usage:
//!   # Mirror ./data at /mnt/heat
//!   heatfs mount /mnt/heat --root ./data
//!
//!   # Monitor a directory in place (mounts over it)
//!   heatfs mount ./data
//!
//!   # Turn a saved access log into /tmp/out-heatmap.png
//!   heatfs render movie.iso.csv /tmp/out

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt};

use heatfs_fuse::{mount, render_log_file};
use heatfs_kernel::MonitorConfig;

/// Access-monitoring pass-through filesystem.
#[derive(Parser, Debug)]
#[command(name = "heatfs")]
#[command(about = "Record every read and write to a directory tree and render access heatmaps")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Mount the monitor and serve it until unmounted
    Mount {
        /// Where to mount
        mountpoint: PathBuf,

        /// Directory to mirror (defaults to the mountpoint itself)
        #[arg(long)]
        root: Option<PathBuf>,

        /// TOML config file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Heatmap grid side length
        #[arg(long)]
        side_length: Option<u32>,

        /// Allow other users to access the mount
        #[arg(long)]
        allow_other: bool,
    },

    /// Convert a saved access log into a heatmap PNG
    Render {
        /// Access log (CSV)
        infile: PathBuf,

        /// Output base name; writes <OUTBASE>-heatmap.png
        outbase: PathBuf,

        /// Heatmap grid side length
        #[arg(long)]
        side_length: Option<u32>,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<MonitorConfig> {
    match path {
        Some(path) => MonitorConfig::load(path)
            .with_context(|| format!("load config {}", path.display())),
        None => Ok(MonitorConfig::default()),
    }
}

fn main() -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match args.command {
        Command::Mount {
            mountpoint,
            root,
            config,
            side_length,
            allow_other,
        } => {
            let mut config = load_config(config.as_ref())?;
            if let Some(side) = side_length {
                config.side_length = side;
            }
            config.allow_other |= allow_other;
            mount(&mountpoint, root.as_deref(), &config)
        }
        Command::Render {
            infile,
            outbase,
            side_length,
        } => {
            let mut config = MonitorConfig::default();
            if let Some(side) = side_length {
                config.side_length = side;
            }
            config.validate()?;
            let out = render_log_file(&infile, &outbase, &config.engine())?;
            println!("{}", out.display());
            Ok(())
        }
    }
}

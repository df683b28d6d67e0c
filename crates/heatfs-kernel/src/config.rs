//! Monitor configuration.
//!
//! Loaded from an optional TOML file; every key has a default, so an
//! empty file is valid:
//!
//! ```toml
//! side_length = 64
//! cell_pixels = 10
//! attr_ttl_ms = 1000
//! io_threads = 4
//! allow_other = false
//! auto_unmount = true
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::heatmap::{
    HeatmapEngine, DEFAULT_CELL_PIXELS, DEFAULT_SIDE_LENGTH, MAX_IMAGE_EDGE, MAX_SIDE_LENGTH,
};

/// Upper bound on `cell_pixels`.
pub const MAX_CELL_PIXELS: u32 = 64;

/// Upper bound on `io_threads`.
pub const MAX_IO_THREADS: usize = 64;

/// Errors loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config syntax: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value: {0}")]
    Invalid(String),
}

/// Tunables of a mounted monitor.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MonitorConfig {
    /// Heatmap grid side length in buckets.
    pub side_length: u32,
    /// Image pixels per bucket edge.
    pub cell_pixels: u32,
    /// How long the kernel may cache attributes and entries.
    pub attr_ttl_ms: u64,
    /// Worker threads serving reads, writes and syncs.
    pub io_threads: usize,
    /// Let other users access the mount.
    pub allow_other: bool,
    /// Unmount automatically when the process exits.
    pub auto_unmount: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            side_length: DEFAULT_SIDE_LENGTH,
            cell_pixels: DEFAULT_CELL_PIXELS,
            attr_ttl_ms: 1000,
            io_threads: 4,
            allow_other: false,
            auto_unmount: true,
        }
    }
}

impl MonitorConfig {
    /// Read and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make heatmap rendering or the mount fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_SIDE_LENGTH).contains(&self.side_length) {
            return Err(ConfigError::Invalid(format!(
                "side_length must be between 1 and {MAX_SIDE_LENGTH}, got {}",
                self.side_length
            )));
        }
        if !(1..=MAX_CELL_PIXELS).contains(&self.cell_pixels) {
            return Err(ConfigError::Invalid(format!(
                "cell_pixels must be between 1 and {MAX_CELL_PIXELS}, got {}",
                self.cell_pixels
            )));
        }
        let grid_px = u64::from(self.side_length) * u64::from(self.cell_pixels);
        if grid_px > u64::from(MAX_IMAGE_EDGE) {
            return Err(ConfigError::Invalid(format!(
                "side_length * cell_pixels must not exceed {MAX_IMAGE_EDGE}, got {grid_px}"
            )));
        }
        if !(1..=MAX_IO_THREADS).contains(&self.io_threads) {
            return Err(ConfigError::Invalid(format!(
                "io_threads must be between 1 and {MAX_IO_THREADS}, got {}",
                self.io_threads
            )));
        }
        Ok(())
    }

    pub fn attr_ttl(&self) -> Duration {
        Duration::from_millis(self.attr_ttl_ms)
    }

    /// PNG heatmap engine for these settings.
    pub fn engine(&self) -> HeatmapEngine {
        HeatmapEngine::png(self.side_length, self.cell_pixels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = MonitorConfig::from_toml_str("").unwrap();
        assert_eq!(config, MonitorConfig::default());
        assert_eq!(config.side_length, 64);
        assert_eq!(config.attr_ttl(), Duration::from_secs(1));
    }

    #[test]
    fn test_partial_override() {
        let config = MonitorConfig::from_toml_str("side_length = 16\nallow_other = true\n").unwrap();
        assert_eq!(config.side_length, 16);
        assert!(config.allow_other);
        assert_eq!(config.cell_pixels, DEFAULT_CELL_PIXELS);
    }

    #[test]
    fn test_rejects_zero_side_length() {
        let err = MonitorConfig::from_toml_str("side_length = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_oversized_values() {
        for text in [
            "side_length = 4294967295",
            "cell_pixels = 3000000000",
            "side_length = 1024\ncell_pixels = 64",
            "io_threads = 0",
            "io_threads = 10000",
        ] {
            let err = MonitorConfig::from_toml_str(text).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(_)), "{text}: {err}");
        }

        let largest = MonitorConfig {
            side_length: MAX_SIDE_LENGTH,
            cell_pixels: MAX_IMAGE_EDGE / MAX_SIDE_LENGTH,
            ..MonitorConfig::default()
        };
        assert!(largest.validate().is_ok());
    }

    #[test]
    fn test_rejects_unknown_keys() {
        let err = MonitorConfig::from_toml_str("sidelength = 8").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("heatfs.toml");
        fs::write(&path, "cell_pixels = 4\n").unwrap();

        let config = MonitorConfig::load(&path).unwrap();
        assert_eq!(config.cell_pixels, 4);

        let missing = MonitorConfig::load(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Read { .. }));
    }
}

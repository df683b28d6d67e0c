//! Offline conversion of a saved access log into a heatmap image.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::info;

use heatfs_kernel::{HeatmapEngine, HEATMAP_SUFFIX, LOG_SUFFIX};

/// Render `infile` to `<outbase>-heatmap.png` and return the written path.
///
/// The title names the log's file name without its `.csv` suffix.
pub fn render_log_file(infile: &Path, outbase: &Path, engine: &HeatmapEngine) -> Result<PathBuf> {
    let text = fs::read_to_string(infile)
        .with_context(|| format!("read access log {}", infile.display()))?;

    let file_name = infile
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let title_name = file_name.strip_suffix(LOG_SUFFIX).unwrap_or(&file_name);

    let image = engine
        .render(title_name, &text)
        .with_context(|| format!("render {}", infile.display()))?;
    if image.is_empty() {
        bail!("{} contains no logged reads or writes", infile.display());
    }

    let mut out = outbase.as_os_str().to_owned();
    out.push(HEATMAP_SUFFIX);
    let out = PathBuf::from(out);
    fs::write(&out, &image).with_context(|| format!("write {}", out.display()))?;

    info!(
        input = %infile.display(),
        output = %out.display(),
        bytes = image.len(),
        "heatmap written"
    );
    Ok(out)
}

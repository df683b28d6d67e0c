//! Synthetic path classification.
//!
//! Every regular file `F` in the mirrored tree gains two virtual siblings:
//! `F.csv` (its access log) and `F-heatmap.png` (its rendered heatmap).
//! Suffixes are matched case-sensitively and only when `F` really exists
//! as a regular file, so an actual `report.csv` next to no `report` stays a
//! plain file.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::vfs::DirEntry;

/// Suffix of synthesized access logs.
pub const LOG_SUFFIX: &str = ".csv";

/// Suffix of synthesized heatmap images.
pub const HEATMAP_SUFFIX: &str = "-heatmap.png";

/// What a requested path refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathRole {
    /// An entry of the underlying tree.
    Real(PathBuf),
    /// The access log of the contained base file.
    SyntheticLog(PathBuf),
    /// The heatmap of the contained base file.
    SyntheticHeatmap(PathBuf),
}

impl PathRole {
    pub fn is_synthetic(&self) -> bool {
        !matches!(self, PathRole::Real(_))
    }
}

/// Classify `path`, using `is_file` to test whether a candidate base is a
/// regular file (following symlinks).
pub fn classify(path: &Path, is_file: impl Fn(&Path) -> bool) -> PathRole {
    let Some(text) = path.to_str() else {
        return PathRole::Real(path.to_path_buf());
    };

    let (base, synthetic): (&str, fn(PathBuf) -> PathRole) =
        if let Some(base) = text.strip_suffix(LOG_SUFFIX) {
            (base, PathRole::SyntheticLog)
        } else if let Some(base) = text.strip_suffix(HEATMAP_SUFFIX) {
            (base, PathRole::SyntheticHeatmap)
        } else {
            return PathRole::Real(path.to_path_buf());
        };

    if base.len() > 1 && is_file(Path::new(base)) {
        synthetic(PathBuf::from(base))
    } else {
        PathRole::Real(path.to_path_buf())
    }
}

/// Key under which the access log of `base` is stored.
pub fn log_key(base: &Path) -> String {
    base.to_string_lossy().into_owned()
}

/// Listing of `dir` with the synthetic siblings inserted.
///
/// Entries are sorted by name; each regular file is immediately followed
/// by its `.csv` and `-heatmap.png` entries. `is_file` is asked about the
/// entry's full path inside `dir`. A real entry whose name is also a
/// synthetic sibling is hidden, as lookups resolve that name to the
/// synthetic file.
pub fn with_synthetic_entries(
    dir: &Path,
    mut entries: Vec<DirEntry>,
    is_file: impl Fn(&Path) -> bool,
) -> Vec<DirEntry> {
    entries.sort_by(|a, b| a.name.cmp(&b.name));

    let files: Vec<bool> = entries
        .iter()
        .map(|entry| is_file(&dir.join(&entry.name)))
        .collect();
    let shadowed: HashSet<String> = entries
        .iter()
        .zip(&files)
        .filter(|&(_, &file)| file)
        .flat_map(|(entry, _)| {
            [
                format!("{}{LOG_SUFFIX}", entry.name),
                format!("{}{HEATMAP_SUFFIX}", entry.name),
            ]
        })
        .collect();

    let mut listing = Vec::with_capacity(entries.len() * 3);
    for (entry, file) in entries.into_iter().zip(files) {
        if shadowed.contains(&entry.name) {
            continue;
        }
        let name = entry.name.clone();
        listing.push(entry);
        if file {
            listing.push(DirEntry::file(format!("{name}{LOG_SUFFIX}")));
            listing.push(DirEntry::file(format!("{name}{HEATMAP_SUFFIX}")));
        }
    }
    listing
}

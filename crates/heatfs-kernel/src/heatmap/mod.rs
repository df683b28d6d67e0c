//! Spatial access heatmaps.
//!
//! A monitored file's byte range is split into `w * w` equal buckets laid
//! out row-major on a square grid. Every logged operation adds, to each
//! bucket it touches, the number of its bytes that fall inside that
//! bucket. The resulting count matrix is contrast-stretched and handed to
//! a [`HeatmapRenderer`].
//!
//! ## Bucket arithmetic
//!
//! The bucket size `s / (w * w)` is generally fractional. Instead of
//! floating point, bucket membership is evaluated with exact integer
//! ratios: byte `b` lies in bucket `floor(b * w² / s)` and bucket `i`
//! starts at byte `ceil(i * s / w²)`. Each byte therefore lands in exactly
//! one bucket and the counts of a range always sum to its length.

mod render;

use std::collections::BTreeSet;
use std::sync::Arc;

use thiserror::Error;

use crate::access_log::{AccessLogError, LogRow};
use crate::csv::{self, CsvError};

pub use render::{
    HeatmapRenderer, PngRenderer, RenderRequest, DEFAULT_CELL_PIXELS, MAX_IMAGE_EDGE,
};

/// Default grid side length in buckets.
pub const DEFAULT_SIDE_LENGTH: u32 = 64;

/// Largest grid side an engine will accumulate.
pub const MAX_SIDE_LENGTH: u32 = 1024;

/// Normalized value assigned to a count of exactly one.
pub const CONTRAST_FLOOR: f64 = 0.2;

/// Normalized value assigned to the maximum count.
pub const CONTRAST_CEIL: f64 = 1.0;

/// Errors while turning an access log into an image.
#[derive(Debug, Error)]
pub enum HeatmapError {
    /// The log text is not valid CSV.
    #[error("corrupt access log: {0}")]
    Csv(#[from] CsvError),

    /// A log row is missing data or holds unparsable values.
    #[error("corrupt access log: {0}")]
    Row(#[from] AccessLogError),

    #[error("grid side length {side} exceeds the maximum of {max}")]
    SideTooLarge { side: u32, max: u32 },

    /// The renderer failed to produce an image.
    #[error("heatmap rendering failed: {0}")]
    Render(String),
}

/// One I/O extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub offset: u64,
    pub length: u64,
}

impl Range {
    pub fn new(offset: u64, length: u64) -> Self {
        Self { offset, length }
    }

    /// Exclusive end offset.
    pub fn end(&self) -> u64 {
        self.offset.saturating_add(self.length)
    }
}

/// Bytes of one range that fall into the bucket at grid position (x, y).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelContribution {
    pub x: u32,
    pub y: u32,
    pub count: u64,
}

/// Mapping from byte offsets of a file to grid buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketGrid {
    side: u32,
    file_size: u64,
}

impl BucketGrid {
    /// Grid of `side * side` buckets over `file_size` bytes.
    pub fn new(side: u32, file_size: u64) -> Self {
        Self {
            side: side.max(1),
            file_size,
        }
    }

    pub fn side(&self) -> u32 {
        self.side
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Total number of buckets.
    pub fn bucket_count(&self) -> u64 {
        u64::from(self.side) * u64::from(self.side)
    }

    /// Index of the bucket containing `byte`.
    pub fn bucket_of(&self, byte: u64) -> u64 {
        (u128::from(byte) * u128::from(self.bucket_count()) / u128::from(self.file_size)) as u64
    }

    /// First byte belonging to bucket `index`.
    pub fn bucket_start(&self, index: u64) -> u64 {
        let n = u128::from(self.bucket_count());
        (u128::from(index) * u128::from(self.file_size)).div_ceil(n) as u64
    }

    /// Per-bucket byte counts for one range.
    ///
    /// The iterator is finite and can be cloned to restart it. Buckets
    /// the range does not actually cover are skipped.
    pub fn contributions(&self, range: Range) -> Contributions {
        let mut next = 1;
        let mut last = 0;
        if self.file_size > 0 && range.length > 0 && range.offset < self.file_size {
            let end = range.end().min(self.file_size);
            next = self.bucket_of(range.offset);
            last = self.bucket_of(end - 1).min(self.bucket_count() - 1);
        }
        Contributions {
            grid: *self,
            range,
            next,
            last,
        }
    }
}

/// Iterator returned by [`BucketGrid::contributions`].
#[derive(Debug, Clone)]
pub struct Contributions {
    grid: BucketGrid,
    range: Range,
    next: u64,
    last: u64,
}

impl Iterator for Contributions {
    type Item = PixelContribution;

    fn next(&mut self) -> Option<PixelContribution> {
        while self.next <= self.last {
            let index = self.next;
            self.next += 1;

            let lo = self.grid.bucket_start(index).max(self.range.offset);
            let hi = self.grid.bucket_start(index + 1).min(self.range.end());
            let count = hi.saturating_sub(lo);
            if count == 0 {
                continue;
            }

            let side = u64::from(self.grid.side);
            return Some(PixelContribution {
                x: (index % side) as u32,
                y: (index / side) as u32,
                count,
            });
        }
        None
    }
}

/// Square grid of accumulated byte counts, indexed `[y][x]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelMatrix {
    side: u32,
    cells: Vec<u64>,
}

impl PixelMatrix {
    /// All-zero matrix.
    pub fn new(side: u32) -> Self {
        let side = side.max(1);
        Self {
            side,
            cells: vec![0; side as usize * side as usize],
        }
    }

    pub fn side(&self) -> u32 {
        self.side
    }

    pub fn get(&self, x: u32, y: u32) -> u64 {
        self.cells[self.index(x, y)]
    }

    /// Accumulate one contribution.
    pub fn add(&mut self, px: PixelContribution) {
        let index = self.index(px.x, px.y);
        self.cells[index] = self.cells[index].saturating_add(px.count);
    }

    /// Rows from top (y = 0) to bottom.
    pub fn rows(&self) -> impl Iterator<Item = &[u64]> {
        self.cells.chunks(self.side as usize)
    }

    /// Sum over all cells.
    pub fn total(&self) -> u64 {
        self.cells.iter().sum()
    }

    /// Largest cell value (0 for an all-zero matrix).
    pub fn max(&self) -> u64 {
        self.cells.iter().copied().max().unwrap_or(0)
    }

    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.side as usize + x as usize
    }
}

/// Two-segment contrast stretch.
///
/// Zero stays zero; counts from `vmin = 1` up to `vmax` map linearly onto
/// `[CONTRAST_FLOOR, CONTRAST_CEIL]`, so a single access is always visibly
/// distinct from none, however large the largest count is.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContrastNorm {
    pub vmin: f64,
    pub vmax: f64,
}

impl ContrastNorm {
    /// Norm for the value range of `matrix`.
    pub fn for_matrix(matrix: &PixelMatrix) -> Self {
        Self {
            vmin: 1.0,
            vmax: matrix.max() as f64,
        }
    }

    pub fn normalize(&self, value: u64) -> f64 {
        let value = value as f64;
        if self.vmin == self.vmax {
            return value;
        }
        if value <= 0.0 {
            return 0.0;
        }
        let scale = (CONTRAST_CEIL - CONTRAST_FLOOR) / (self.vmax - self.vmin);
        CONTRAST_FLOOR + (value - self.vmin) * scale
    }
}

/// Accumulated heatmap data for one monitored file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessHeatmap {
    pub grid: BucketGrid,
    pub matrix: PixelMatrix,
    /// Distinct `"name (pid N)"` labels, sorted.
    pub processes: Vec<String>,
}

impl AccessHeatmap {
    /// Accumulate `rows` on a `side * side` grid.
    ///
    /// The grid spans the largest file size any row observed. Returns
    /// `None` when there are no rows.
    pub fn from_rows(rows: &[LogRow], side: u32) -> Option<Self> {
        let file_size = rows.iter().map(|row| row.file_size).max()?;
        let grid = BucketGrid::new(side, file_size);

        let mut matrix = PixelMatrix::new(grid.side());
        for row in rows {
            for px in grid.contributions(Range::new(row.offset, row.length)) {
                matrix.add(px);
            }
        }

        let processes: BTreeSet<String> = rows.iter().map(LogRow::process_label).collect();

        Some(Self {
            grid,
            matrix,
            processes: processes.into_iter().collect(),
        })
    }

    /// Whole bytes per pixel (integer division).
    pub fn bytes_per_pixel(&self) -> u64 {
        self.grid.file_size() / self.grid.bucket_count()
    }

    pub fn norm(&self) -> ContrastNorm {
        ContrastNorm::for_matrix(&self.matrix)
    }

    /// Text block explaining the pixel-to-byte mapping and listing the
    /// observed processes.
    pub fn annotation(&self) -> String {
        let w = self.grid.side();
        let mut text = format!(
            "Image width/height in pixels w = {w}\n\
             Number of image pixels p = w * w = {w} * {w} = {pixels}\n\
             Filesize in bytes s = {size}\n\
             => Each pixel corresponds to a chunk of b = {bpp} bytes\n\
             Pixel at position (i,j) maps to byte region\n    \
             from inclusive b * (i * w + j)\n    \
             to exclusive b * (i * w + j + 1)\n\
             \n\
             Processes:",
            pixels = self.grid.bucket_count(),
            size = self.grid.file_size(),
            bpp = self.bytes_per_pixel(),
        );
        for process in &self.processes {
            text.push_str("\n  - ");
            text.push_str(process);
        }
        text
    }
}

/// Parse an access log's CSV text into rows.
///
/// Any malformed row fails the whole parse; this layer is the only writer
/// of the format, so a bad row means corruption.
pub fn parse_log(text: &str) -> Result<Vec<LogRow>, HeatmapError> {
    csv::decode(text)?
        .iter()
        .map(|record| LogRow::from_record(record).map_err(HeatmapError::from))
        .collect()
}

/// Turns access logs into encoded heatmap images.
#[derive(Clone)]
pub struct HeatmapEngine {
    side: u32,
    renderer: Arc<dyn HeatmapRenderer>,
}

impl std::fmt::Debug for HeatmapEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeatmapEngine")
            .field("side", &self.side)
            .finish_non_exhaustive()
    }
}

impl Default for HeatmapEngine {
    fn default() -> Self {
        Self::png(DEFAULT_SIDE_LENGTH, DEFAULT_CELL_PIXELS)
    }
}

impl HeatmapEngine {
    /// Engine with a custom renderer.
    pub fn new(side: u32, renderer: Arc<dyn HeatmapRenderer>) -> Self {
        Self {
            side: side.max(1),
            renderer,
        }
    }

    /// Engine rendering PNGs with `cell_pixels` image pixels per bucket.
    pub fn png(side: u32, cell_pixels: u32) -> Self {
        Self::new(side, Arc::new(PngRenderer::new(cell_pixels)))
    }

    pub fn side(&self) -> u32 {
        self.side
    }

    /// Accumulate a log without rendering it.
    pub fn accumulate(&self, log_text: &str) -> Result<Option<AccessHeatmap>, HeatmapError> {
        if self.side > MAX_SIDE_LENGTH {
            return Err(HeatmapError::SideTooLarge {
                side: self.side,
                max: MAX_SIDE_LENGTH,
            });
        }
        let rows = parse_log(log_text)?;
        Ok(AccessHeatmap::from_rows(&rows, self.side))
    }

    /// Render the heatmap of `file_name` from its log text.
    ///
    /// A log without data rows yields empty bytes: nothing to show yet.
    pub fn render(&self, file_name: &str, log_text: &str) -> Result<Vec<u8>, HeatmapError> {
        match self.accumulate(log_text)? {
            Some(heatmap) => self.render_heatmap(file_name, &heatmap),
            None => Ok(Vec::new()),
        }
    }

    /// Render already accumulated data.
    pub fn render_heatmap(
        &self,
        file_name: &str,
        heatmap: &AccessHeatmap,
    ) -> Result<Vec<u8>, HeatmapError> {
        let norm = heatmap.norm();
        let request = RenderRequest {
            matrix: &heatmap.matrix,
            norm: &norm,
            title: format!("Number of reads of / writes to file '{file_name}'"),
            x_label: "column (j)",
            y_label: "row (i)",
            colorbar_label: "Number of affected bytes in each pixel",
            annotation: heatmap.annotation(),
        };
        self.renderer.render(&request)
    }
}

//! End-to-end tests of the monitor over a real temporary directory.
//!
//! Heatmap matrices are checked through a capturing renderer so the exact
//! bucket counts are visible; one test goes through the PNG renderer.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use tempfile::TempDir;

use heatfs_kernel::csv;
use heatfs_kernel::{
    shared_access_log, CallerInfo, FileHandle, HeatmapEngine, HeatmapError, HeatmapRenderer,
    LocalBackend, MonitorConfig, MonitorFs, OpenFlags, PixelMatrix, RenderRequest, LOG_COLUMNS,
};

// ============================================================================
// Shared test setup
// ============================================================================

const MARKER: &[u8] = b"captured";

/// Renderer that records the matrix it was asked to draw.
#[derive(Default)]
struct CapturingRenderer {
    last: Mutex<Option<(PixelMatrix, String)>>,
}

impl HeatmapRenderer for CapturingRenderer {
    fn render(&self, request: &RenderRequest<'_>) -> Result<Vec<u8>, HeatmapError> {
        *self.last.lock() = Some((request.matrix.clone(), request.title.clone()));
        Ok(MARKER.to_vec())
    }
}

fn file_1024() -> TempDir {
    let dir = TempDir::new().unwrap();
    let data: Vec<u8> = (0..1024u32).map(|i| i as u8).collect();
    fs::write(dir.path().join("movie.iso"), data).unwrap();
    dir
}

fn capturing_monitor(dir: &TempDir, side: u32) -> (MonitorFs, Arc<CapturingRenderer>) {
    let renderer = Arc::new(CapturingRenderer::default());
    let monitor = MonitorFs::new(
        LocalBackend::new(dir.path()),
        shared_access_log(),
        HeatmapEngine::new(side, renderer.clone()),
    );
    (monitor, renderer)
}

fn caller() -> CallerInfo {
    CallerInfo::new(1234, "reader")
}

fn read_all(monitor: &MonitorFs, handle: &mut FileHandle) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let chunk = monitor.read(handle, out.len() as u64, 4096, &caller()).unwrap();
        if chunk.is_empty() {
            return out;
        }
        out.extend(chunk);
    }
}

fn heatmap_matrix(monitor: &MonitorFs, renderer: &CapturingRenderer, base: &str) -> PixelMatrix {
    let mut handle = monitor
        .open(Path::new(&format!("{base}-heatmap.png")), OpenFlags::read())
        .unwrap();
    let bytes = read_all(monitor, &mut handle);
    assert_eq!(bytes, MARKER);
    monitor.release(handle).unwrap();
    let (matrix, _) = renderer.last.lock().clone().unwrap();
    matrix
}

// ============================================================================
// Heatmap scenarios
// ============================================================================

#[test]
fn single_read_covers_first_two_buckets() {
    let dir = file_1024();
    let (monitor, renderer) = capturing_monitor(&dir, 2);

    let mut handle = monitor.open(Path::new("/movie.iso"), OpenFlags::read()).unwrap();
    let data = monitor.read(&mut handle, 0, 512, &caller()).unwrap();
    assert_eq!(data.len(), 512);
    assert_eq!(data[300], 44);
    monitor.release(handle).unwrap();

    // 1024 bytes over 2x2 buckets: 256 bytes each.
    let matrix = heatmap_matrix(&monitor, &renderer, "/movie.iso");
    assert_eq!(matrix.get(0, 0), 256);
    assert_eq!(matrix.get(1, 0), 256);
    assert_eq!(matrix.get(0, 1), 0);
    assert_eq!(matrix.get(1, 1), 0);
    assert_eq!(matrix.total(), 512);
}

#[test]
fn overlapping_reads_accumulate_per_bucket() {
    let dir = file_1024();
    let (monitor, renderer) = capturing_monitor(&dir, 2);

    let mut handle = monitor.open(Path::new("/movie.iso"), OpenFlags::read()).unwrap();
    monitor.read(&mut handle, 0, 300, &caller()).unwrap();
    monitor.read(&mut handle, 200, 300, &caller()).unwrap();
    monitor.release(handle).unwrap();

    // Buckets are [0,256), [256,512), [512,768), [768,1024).
    // Read [0,300):   bucket 0 gets 256 - 0   = 256, bucket 1 gets 300 - 256 = 44.
    // Read [200,500): bucket 0 gets 256 - 200 = 56,  bucket 1 gets 500 - 256 = 244.
    let bucket0 = (256 - 0) + (256 - 200);
    let bucket1 = (300 - 256) + (500 - 256);

    let matrix = heatmap_matrix(&monitor, &renderer, "/movie.iso");
    assert_eq!(matrix.get(0, 0), bucket0);
    assert_eq!(matrix.get(1, 0), bucket1);
    assert_eq!(matrix.get(0, 1), 0);
    assert_eq!(matrix.get(1, 1), 0);
    assert_eq!(matrix.total(), 600);
}

#[test]
fn heatmap_title_names_base_file() {
    let dir = file_1024();
    let (monitor, renderer) = capturing_monitor(&dir, 4);

    let mut handle = monitor.open(Path::new("/movie.iso"), OpenFlags::read()).unwrap();
    monitor.read(&mut handle, 0, 1, &caller()).unwrap();
    heatmap_matrix(&monitor, &renderer, "/movie.iso");

    let (_, title) = renderer.last.lock().clone().unwrap();
    assert_eq!(title, "Number of reads of / writes to file '/movie.iso'");
}

#[test]
fn heatmap_is_empty_before_any_io() {
    let dir = file_1024();
    let (monitor, renderer) = capturing_monitor(&dir, 2);

    let mut handle = monitor
        .open(Path::new("/movie.iso-heatmap.png"), OpenFlags::read())
        .unwrap();
    assert!(read_all(&monitor, &mut handle).is_empty());
    assert!(renderer.last.lock().is_none());
}

#[test]
fn png_heatmap_after_reads() {
    let dir = file_1024();
    let monitor = MonitorFs::from_config(
        LocalBackend::new(dir.path()),
        &MonitorConfig {
            side_length: 8,
            cell_pixels: 4,
            ..MonitorConfig::default()
        },
    );

    let mut handle = monitor.open(Path::new("/movie.iso"), OpenFlags::read()).unwrap();
    read_all(&monitor, &mut handle);

    let mut heatmap = monitor
        .open(Path::new("/movie.iso-heatmap.png"), OpenFlags::read())
        .unwrap();
    assert!(heatmap.direct_io());
    let png = read_all(&monitor, &mut heatmap);
    assert!(png.starts_with(b"\x89PNG\r\n\x1a\n"));
}

// ============================================================================
// Listings and logs
// ============================================================================

#[test]
fn listing_adds_two_siblings() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("data.bin"), b"abc").unwrap();
    let (monitor, _) = capturing_monitor(&dir, 2);

    let names: Vec<_> = monitor
        .readdir(Path::new("/"))
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(names, vec!["data.bin", "data.bin.csv", "data.bin-heatmap.png"]);
}

#[test]
fn nested_listing_checks_full_paths() {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("a/b")).unwrap();
    fs::write(dir.path().join("a/b/deep.txt"), b"x").unwrap();
    let (monitor, _) = capturing_monitor(&dir, 2);

    let names: Vec<_> = monitor
        .readdir(Path::new("/a/b"))
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(names, vec!["deep.txt", "deep.txt.csv", "deep.txt-heatmap.png"]);
    assert!(monitor.getattr(Path::new("/a/b/deep.txt.csv")).unwrap().is_file());
}

#[test]
fn log_records_each_read() {
    let dir = file_1024();
    let (monitor, _) = capturing_monitor(&dir, 2);

    let mut handle = monitor.open(Path::new("/movie.iso"), OpenFlags::read()).unwrap();
    monitor.read(&mut handle, 0, 100, &caller()).unwrap();
    monitor.read(&mut handle, 1000, 100, &caller()).unwrap();

    let mut log = monitor.open(Path::new("/movie.iso.csv"), OpenFlags::read()).unwrap();
    let text = String::from_utf8(read_all(&monitor, &mut log)).unwrap();
    let records = csv::decode(&text).unwrap();

    let columns: Vec<_> = records[0].keys().map(String::as_str).collect();
    assert_eq!(columns, LOG_COLUMNS);
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["AccessDirection"], "read");
    assert_eq!(records[0]["Length"], "100");
    assert_eq!(records[1]["Offset"], "1000");
    assert_eq!(records[1]["Length"], "24");
    assert_eq!(records[1]["Filesize"], "1024");
    assert_eq!(records[1]["ProcessID"], "1234");
    assert_eq!(records[1]["ProcessName"], "reader");
}

#[test]
fn log_read_past_end_is_empty() {
    let dir = file_1024();
    let (monitor, _) = capturing_monitor(&dir, 2);

    let mut log = monitor.open(Path::new("/movie.iso.csv"), OpenFlags::read()).unwrap();
    let len = monitor.access_log().len("/movie.iso").unwrap();
    assert!(monitor.read(&mut log, len, 10, &caller()).unwrap().is_empty());
    assert!(monitor.read(&mut log, len + 1000, 10, &caller()).unwrap().is_empty());
}

#[test]
fn process_name_with_quotes_round_trips() {
    let dir = file_1024();
    let (monitor, _) = capturing_monitor(&dir, 2);
    let odd = CallerInfo::new(9, r#"say "hi", bye"#);

    let mut handle = monitor.open(Path::new("/movie.iso"), OpenFlags::read()).unwrap();
    monitor.read(&mut handle, 0, 1, &odd).unwrap();

    let text = monitor.access_log().snapshot_text("/movie.iso").unwrap();
    let records = csv::decode(&text).unwrap();
    assert_eq!(records[0]["ProcessName"], odd.process_name);
}

#[test]
fn concurrent_reads_on_two_files() {
    let dir = file_1024();
    fs::write(dir.path().join("other.bin"), vec![0u8; 4096]).unwrap();
    let (monitor, renderer) = capturing_monitor(&dir, 2);
    let monitor = Arc::new(monitor);

    let threads: Vec<_> = ["/movie.iso", "/other.bin", "/movie.iso", "/other.bin"]
        .into_iter()
        .map(|path| {
            let monitor = Arc::clone(&monitor);
            thread::spawn(move || {
                let mut handle = monitor.open(Path::new(path), OpenFlags::read()).unwrap();
                for i in 0..16u64 {
                    monitor.read(&mut handle, i * 64, 64, &caller()).unwrap();
                }
                monitor.release(handle).unwrap();
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    for base in ["/movie.iso", "/other.bin"] {
        let text = monitor.access_log().snapshot_text(base).unwrap();
        assert_eq!(csv::decode(&text).unwrap().len(), 32);
        let matrix = heatmap_matrix(&monitor, &renderer, base);
        assert_eq!(matrix.total(), 2 * 16 * 64);
    }
}

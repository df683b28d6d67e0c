//! In-memory access logs, one append-only CSV buffer per monitored file.
//!
//! # Concurrency Model
//!
//! A single mutex guards the map and every buffer append or copy. It is
//! held only for the in-memory step, never across the real read/write
//! syscall or heatmap rendering, so I/O on different files runs in
//! parallel and only serializes at bookkeeping time.
//!
//! The raw mutex type is a parameter; production code uses the default
//! `parking_lot::RawMutex`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::lock_api::{Mutex, RawMutex};
use strum::{AsRefStr, Display, EnumString};
use thiserror::Error;

use crate::csv::{self, CsvRecord};
use crate::process::CallerInfo;

/// Column names of every access log, in order.
pub const LOG_COLUMNS: [&str; 7] = [
    "Time",
    "AccessDirection",
    "Offset",
    "Length",
    "Filesize",
    "ProcessID",
    "ProcessName",
];

/// Thread-safe access log store handle.
pub type SharedAccessLog = Arc<AccessLogStore>;

/// Create a new shared access log store.
pub fn shared_access_log() -> SharedAccessLog {
    Arc::new(AccessLogStore::new())
}

/// Errors from access log bookkeeping and row parsing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccessLogError {
    /// Append to a path whose header was never written.
    #[error("no access log for {0}")]
    MissingEntry(String),

    /// A logged row lacks a column.
    #[error("access log row is missing column {0}")]
    MissingColumn(&'static str),

    /// A logged value could not be parsed.
    #[error("invalid {column} value in access log: {value:?}")]
    InvalidField {
        /// Column name.
        column: &'static str,
        /// The raw text.
        value: String,
    },
}

/// Direction of a logged I/O operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum AccessDirection {
    Read,
    Write,
}

/// One completed read or write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRow {
    /// Completion time.
    pub time: DateTime<Utc>,
    pub direction: AccessDirection,
    /// Requested byte offset.
    pub offset: u64,
    /// Bytes actually transferred.
    pub length: u64,
    /// File size right after the operation.
    pub file_size: u64,
    pub pid: u32,
    pub process_name: String,
}

impl LogRow {
    /// Build a row stamped with the current UTC time.
    pub fn now(
        direction: AccessDirection,
        offset: u64,
        length: u64,
        file_size: u64,
        caller: &CallerInfo,
    ) -> Self {
        Self {
            time: Utc::now(),
            direction,
            offset,
            length,
            file_size,
            pid: caller.pid,
            process_name: caller.process_name.clone(),
        }
    }

    /// Field values in [`LOG_COLUMNS`] order.
    pub fn fields(&self) -> [String; 7] {
        [
            self.time.to_rfc3339_opts(SecondsFormat::Micros, false),
            self.direction.to_string(),
            self.offset.to_string(),
            self.length.to_string(),
            self.file_size.to_string(),
            self.pid.to_string(),
            self.process_name.clone(),
        ]
    }

    /// Encoded CSV line for this row.
    pub fn encode(&self) -> Vec<u8> {
        csv::encode_record(self.fields())
    }

    /// Parse a decoded record back into a row.
    pub fn from_record(record: &CsvRecord) -> Result<Self, AccessLogError> {
        Ok(Self {
            time: parse_column(record, "Time", |s| {
                DateTime::parse_from_rfc3339(s)
                    .ok()
                    .map(|t| t.with_timezone(&Utc))
            })?,
            direction: parse_column(record, "AccessDirection", |s| s.parse().ok())?,
            offset: parse_column(record, "Offset", |s| s.parse().ok())?,
            length: parse_column(record, "Length", |s| s.parse().ok())?,
            file_size: parse_column(record, "Filesize", |s| s.parse().ok())?,
            pid: parse_column(record, "ProcessID", |s| s.parse().ok())?,
            process_name: column(record, "ProcessName")?.to_string(),
        })
    }

    /// Label used to group rows by originating process.
    pub fn process_label(&self) -> String {
        format!("{} (pid {})", self.process_name, self.pid)
    }
}

fn column<'a>(record: &'a CsvRecord, name: &'static str) -> Result<&'a str, AccessLogError> {
    record
        .get(name)
        .map(String::as_str)
        .ok_or(AccessLogError::MissingColumn(name))
}

fn parse_column<T>(
    record: &CsvRecord,
    name: &'static str,
    parse: impl FnOnce(&str) -> Option<T>,
) -> Result<T, AccessLogError> {
    let raw = column(record, name)?;
    parse(raw).ok_or_else(|| AccessLogError::InvalidField {
        column: name,
        value: raw.to_string(),
    })
}

/// Encoded header row written once per log.
pub fn header_bytes() -> Vec<u8> {
    csv::encode_record(LOG_COLUMNS)
}

/// Process-wide map from base path to its encoded CSV log.
///
/// Entries only ever grow: a header on first open, then one row per
/// completed real read or write.
pub struct AccessLogStore<R: RawMutex = parking_lot::RawMutex> {
    logs: Mutex<R, HashMap<String, Vec<u8>>>,
}

impl<R: RawMutex> std::fmt::Debug for AccessLogStore<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessLogStore")
            .field("logs", &"<locked>")
            .finish()
    }
}

impl<R: RawMutex> Default for AccessLogStore<R> {
    fn default() -> Self {
        Self {
            logs: Mutex::new(HashMap::new()),
        }
    }
}

impl AccessLogStore {
    /// Create an empty store with the default lock.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<R: RawMutex> AccessLogStore<R> {
    /// Insert the header row for `base` unless a log already exists.
    pub fn ensure_header(&self, base: &str) {
        let mut logs = self.logs.lock();
        if !logs.contains_key(base) {
            logs.insert(base.to_string(), header_bytes());
        }
    }

    /// Append one encoded row to the log for `base`.
    pub fn append(&self, base: &str, row: &LogRow) -> Result<(), AccessLogError> {
        let encoded = row.encode();
        let mut logs = self.logs.lock();
        let log = logs
            .get_mut(base)
            .ok_or_else(|| AccessLogError::MissingEntry(base.to_string()))?;
        log.extend_from_slice(&encoded);
        Ok(())
    }

    /// Copy of `[offset, offset + len)` clipped to the log's length.
    ///
    /// Out-of-range offsets and unknown paths yield an empty slice.
    pub fn read_slice(&self, base: &str, offset: u64, len: usize) -> Vec<u8> {
        let logs = self.logs.lock();
        let Some(log) = logs.get(base) else {
            return Vec::new();
        };
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(log.len());
        let end = start.saturating_add(len).min(log.len());
        log[start..end].to_vec()
    }

    /// Decoded text of the whole log, for parsing.
    pub fn snapshot_text(&self, base: &str) -> Option<String> {
        let bytes = self.logs.lock().get(base).cloned()?;
        Some(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Current byte length of the log for `base`.
    pub fn len(&self, base: &str) -> Option<u64> {
        self.logs.lock().get(base).map(|log| log.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn row(offset: u64, length: u64) -> LogRow {
        LogRow::now(
            AccessDirection::Read,
            offset,
            length,
            1024,
            &CallerInfo::new(42, "cat"),
        )
    }

    #[test]
    fn test_ensure_header_is_idempotent() {
        let store = AccessLogStore::new();
        store.ensure_header("/a");
        store.append("/a", &row(0, 1)).unwrap();
        let len = store.len("/a").unwrap();

        store.ensure_header("/a");
        assert_eq!(store.len("/a"), Some(len));
        assert_eq!(
            store.read_slice("/a", 0, header_bytes().len()),
            header_bytes()
        );
    }

    #[test]
    fn test_append_without_header_fails() {
        let store = AccessLogStore::new();
        let err = store.append("/missing", &row(0, 1)).unwrap_err();
        assert_eq!(err, AccessLogError::MissingEntry("/missing".into()));
        assert_eq!(store.len("/missing"), None);
    }

    #[test]
    fn test_append_keeps_prefix() {
        let store = AccessLogStore::new();
        store.ensure_header("/a");

        for i in 0..5 {
            let before = store.snapshot_text("/a").unwrap();
            store.append("/a", &row(i * 10, 10)).unwrap();
            let after = store.snapshot_text("/a").unwrap();
            assert!(after.len() > before.len());
            assert!(after.starts_with(&before));
        }
    }

    #[test]
    fn test_read_slice_clips() {
        let store = AccessLogStore::new();
        store.ensure_header("/a");
        let len = store.len("/a").unwrap();

        assert_eq!(store.read_slice("/a", len, 100), Vec::<u8>::new());
        assert_eq!(store.read_slice("/a", u64::MAX, 100), Vec::<u8>::new());
        assert_eq!(store.read_slice("/a", len - 3, 100).len(), 3);
        assert_eq!(store.read_slice("/unknown", 0, 100), Vec::<u8>::new());
    }

    #[test]
    fn test_row_round_trip_through_csv() {
        let original = LogRow::now(
            AccessDirection::Write,
            4096,
            512,
            8192,
            &CallerInfo::new(7, "dd"),
        );
        let mut text = header_bytes();
        text.extend(original.encode());

        let records = csv::decode(std::str::from_utf8(&text).unwrap()).unwrap();
        let parsed = LogRow::from_record(&records[0]).unwrap();
        // Timestamps are written with microsecond precision.
        assert_eq!(parsed.time.timestamp_micros(), original.time.timestamp_micros());
        assert_eq!(parsed.direction, AccessDirection::Write);
        assert_eq!(parsed.offset, 4096);
        assert_eq!(parsed.length, 512);
        assert_eq!(parsed.file_size, 8192);
        assert_eq!(parsed.process_label(), "dd (pid 7)");
    }

    #[test]
    fn test_time_is_utc_iso8601() {
        let fields = row(0, 1).fields();
        assert!(fields[0].ends_with("+00:00"), "{}", fields[0]);
        assert!(fields[0].contains('T'));
        assert_eq!(fields[1], "read");
    }

    #[test]
    fn test_from_record_rejects_bad_values() {
        let mut record: CsvRecord = LOG_COLUMNS
            .iter()
            .zip(row(0, 1).fields())
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        record.insert("Length".into(), "lots".into());
        assert_eq!(
            LogRow::from_record(&record).unwrap_err(),
            AccessLogError::InvalidField {
                column: "Length",
                value: "lots".into()
            }
        );

        record.insert("Length".into(), "1".into());
        record.shift_remove("Filesize");
        assert_eq!(
            LogRow::from_record(&record).unwrap_err(),
            AccessLogError::MissingColumn("Filesize")
        );
    }

    #[test]
    fn test_concurrent_appends_keep_one_entry() {
        let store = Arc::new(AccessLogStore::new());
        store.ensure_header("/shared");

        let threads: Vec<_> = (0..8)
            .map(|t| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    store.ensure_header("/shared");
                    for i in 0..50 {
                        store.append("/shared", &row(t * 1000 + i, 1)).unwrap();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        let text = store.snapshot_text("/shared").unwrap();
        let records = csv::decode(&text).unwrap();
        assert_eq!(records.len(), 8 * 50);
    }

    #[test]
    fn test_injected_fair_mutex() {
        let store: AccessLogStore<parking_lot::RawFairMutex> = AccessLogStore::default();
        store.ensure_header("/fair");
        store.append("/fair", &row(0, 1)).unwrap();
        assert!(store.len("/fair").unwrap() > header_bytes().len() as u64);
    }
}

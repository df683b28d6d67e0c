//! Identity of the process behind a filesystem request.

use std::fs;

/// Name recorded when the process table has no entry for the caller.
pub const UNKNOWN_PROCESS: &str = "unknown";

/// The process that issued a read or write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerInfo {
    /// Process id from the request context.
    pub pid: u32,
    /// Short command name from the host process table.
    pub process_name: String,
}

impl CallerInfo {
    /// Create caller info from known values.
    pub fn new(pid: u32, process_name: impl Into<String>) -> Self {
        Self {
            pid,
            process_name: process_name.into(),
        }
    }

    /// Look up the command name for `pid` in `/proc`.
    ///
    /// Short-lived callers may be gone by the time we look; they are
    /// recorded as [`UNKNOWN_PROCESS`] instead of failing their I/O.
    pub fn from_pid(pid: u32) -> Self {
        let process_name = match fs::read_to_string(format!("/proc/{pid}/comm")) {
            Ok(comm) => comm.trim().to_string(),
            Err(e) => {
                tracing::debug!(pid, error = %e, "process name lookup failed");
                UNKNOWN_PROCESS.to_string()
            }
        };
        Self { pid, process_name }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_self() {
        let caller = CallerInfo::from_pid(std::process::id());
        assert_eq!(caller.pid, std::process::id());
        assert!(!caller.process_name.is_empty());
        assert_ne!(caller.process_name, UNKNOWN_PROCESS);
        assert!(!caller.process_name.ends_with('\n'));
    }

    #[test]
    fn test_lookup_missing_pid() {
        // pid_max never reaches u32::MAX
        let caller = CallerInfo::from_pid(u32::MAX);
        assert_eq!(caller.process_name, UNKNOWN_PROCESS);
    }
}

//! Append-only JSON-Lines audit trails
//!
//! One JSON object per line; consumers (dashboards, offline analysis)
//! tail these files for observability. Appends are flushed per record —
//! audit volume is low (one line per throttled decision, probation
//! transition, or healing cycle) and a torn tail after a crash must not
//! cost more than the final line.

use crate::errors::{CoreError, CoreResult};
use parking_lot::Mutex;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

/// Append-only writer for one audit file
#[derive(Debug)]
pub struct JsonlAudit {
    path: PathBuf,
    write_guard: Mutex<()>,
}

impl JsonlAudit {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_guard: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Append one record as a single JSON line
    pub fn append<T: Serialize>(&self, record: &T) -> CoreResult<()> {
        let line = serde_json::to_string(record)?;

        let _guard = self.write_guard.lock();
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| CoreError::io(dir, e))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| CoreError::io(&self.path, e))?;
        writeln!(file, "{}", line).map_err(|e| CoreError::io(&self.path, e))?;
        file.flush().map_err(|e| CoreError::io(&self.path, e))?;
        Ok(())
    }

    /// Read the last `n` parseable records (dashboard helper)
    ///
    /// Unparseable lines (e.g. a torn tail from a crash) are skipped.
    pub fn tail(&self, n: usize) -> Vec<serde_json::Value> {
        let Ok(file) = std::fs::File::open(&self.path) else {
            return Vec::new();
        };

        let records: Vec<serde_json::Value> = BufReader::new(file)
            .lines()
            .filter_map(|line| line.ok())
            .filter_map(|line| serde_json::from_str(&line).ok())
            .collect();

        let skip = records.len().saturating_sub(n);
        records.into_iter().skip(skip).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;
    use std::sync::atomic::{AtomicU64, Ordering};

    static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

    fn temp_audit() -> (JsonlAudit, PathBuf) {
        let id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir().join(format!(
            "warden_audit_test_{}_{}",
            std::process::id(),
            id
        ));
        let _ = std::fs::remove_dir_all(&dir);
        (JsonlAudit::new(dir.join("audit.jsonl")), dir)
    }

    #[derive(Serialize)]
    struct Record {
        symbol: String,
        value: u32,
    }

    #[test]
    fn test_append_one_object_per_line() {
        let (audit, dir) = temp_audit();
        for i in 0..3 {
            audit
                .append(&Record {
                    symbol: "BTCUSDT".to_string(),
                    value: i,
                })
                .unwrap();
        }

        let raw = std::fs::read_to_string(audit.path()).unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 3);
        for line in lines {
            serde_json::from_str::<serde_json::Value>(line).unwrap();
        }
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_tail_returns_newest_records() {
        let (audit, dir) = temp_audit();
        for i in 0..5 {
            audit
                .append(&Record {
                    symbol: format!("SYM{}", i),
                    value: i,
                })
                .unwrap();
        }

        let tail = audit.tail(2);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0]["symbol"], "SYM3");
        assert_eq!(tail[1]["symbol"], "SYM4");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_tail_skips_torn_lines() {
        let (audit, dir) = temp_audit();
        audit
            .append(&Record {
                symbol: "GOOD".to_string(),
                value: 1,
            })
            .unwrap();
        // Simulated crash mid-append
        let mut file = OpenOptions::new()
            .append(true)
            .open(audit.path())
            .unwrap();
        write!(file, "{{\"symbol\": \"TORN").unwrap();

        let tail = audit.tail(10);
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0]["symbol"], "GOOD");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_tail_of_missing_file_is_empty() {
        let (audit, dir) = temp_audit();
        assert!(audit.tail(10).is_empty());
        let _ = std::fs::remove_dir_all(&dir);
    }
}

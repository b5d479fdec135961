/// File sink for log output
///
/// Appends to a daily log file (`warden_YYYY-MM-DD.log`) under the
/// configured log directory. Writes are buffered through a mutex-guarded
/// handle; flush() is called during shutdown so the tail is not lost.

use super::config::get_logger_config;
use chrono::Local;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

struct FileSink {
    writer: BufWriter<File>,
    day: String,
}

static FILE_SINK: Lazy<Mutex<Option<FileSink>>> = Lazy::new(|| Mutex::new(None));

fn log_file_path(dir: &PathBuf, day: &str) -> PathBuf {
    dir.join(format!("warden_{}.log", day))
}

/// Append one line to the daily log file
///
/// No-op when no log directory is configured. Rolls over to a new file
/// when the local date changes.
pub fn write_to_file(line: &str) {
    let Some(dir) = get_logger_config().log_dir else {
        return;
    };

    let today = Local::now().format("%Y-%m-%d").to_string();
    let mut sink = FILE_SINK.lock();

    let needs_reopen = match sink.as_ref() {
        Some(s) => s.day != today,
        None => true,
    };

    if needs_reopen {
        if create_dir_all(&dir).is_err() {
            return;
        }
        let path = log_file_path(&dir, &today);
        match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => {
                *sink = Some(FileSink {
                    writer: BufWriter::new(file),
                    day: today,
                });
            }
            Err(_) => {
                return;
            }
        }
    }

    if let Some(s) = sink.as_mut() {
        let _ = writeln!(s.writer, "{}", line);
    }
}

/// Flush pending log writes to disk
pub fn flush_file_logging() {
    if let Some(s) = FILE_SINK.lock().as_mut() {
        let _ = s.writer.flush();
    }
}

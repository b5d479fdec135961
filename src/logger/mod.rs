//! Structured logging for the warden core
//!
//! Provides a small, ergonomic logging API:
//! - Standard log levels (Error/Warning/Info/Debug/Verbose)
//! - Per-module debug control via --debug-<module> flags
//! - Dual output: colored console + daily file persistence
//!
//! ## Usage
//!
//! ```rust
//! use warden::logger::{self, LogTag};
//!
//! logger::info(LogTag::Store, "Ledger written");
//! logger::warning(LogTag::RateLimit, "Window 90% full");
//! logger::debug(LogTag::Healing, "Check details: ..."); // Only with --debug-healing
//! ```
//!
//! ## Initialization
//!
//! Call once at startup, before any logging occurs:
//! ```rust
//! warden::logger::init(&std::env::args().collect::<Vec<_>>(), None);
//! ```

mod config;
mod core;
mod file;
mod format;
mod levels;
mod tags;

pub use config::{get_logger_config, set_logger_config, update_logger_config, LoggerConfig};
pub use levels::LogLevel;
pub use tags::LogTag;

use std::path::PathBuf;

/// Initialize the logger system
///
/// Parses command-line arguments for debug/verbosity flags and configures
/// the optional file sink. Must be called before starting services.
pub fn init(args: &[String], log_dir: Option<PathBuf>) {
    config::init_from_args(args);
    if log_dir.is_some() {
        config::update_logger_config(|c| {
            c.log_dir = log_dir;
        });
    }
}

/// Log at ERROR level (always shown, critical issues)
pub fn error(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Error, message);
}

/// Log at WARNING level (important issues)
pub fn warning(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Warning, message);
}

/// Log at INFO level (standard operations)
pub fn info(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Info, message);
}

/// Log at DEBUG level (detailed diagnostics, gated by --debug-<module>)
pub fn debug(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Debug, message);
}

/// Log at VERBOSE level (very detailed tracing, gated by --verbose)
pub fn verbose(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Verbose, message);
}

/// Force flush all pending log writes
///
/// Call this during shutdown to ensure all logs are written to disk.
pub fn flush() {
    file::flush_file_logging();
}

//! Log formatting and output with ANSI colors
//!
//! Handles:
//! - Colorized console output with aligned tag and level columns
//! - Dual output (console + file)
//! - Broken pipe handling for piped commands

use super::file::write_to_file;
use super::tags::LogTag;
use chrono::Local;
use colored::*;
use std::io::{stdout, ErrorKind, Write};

/// Column widths for alignment
const TAG_WIDTH: usize = 10;
const LEVEL_WIDTH: usize = 8;

/// Format and output a log message to console and file
pub fn format_and_log(tag: LogTag, level: &str, message: &str) {
    let now = Local::now();
    let time = now.format("%H:%M:%S").to_string();

    let console_line = format!(
        "{} [{}] [{}] {}",
        time.dimmed(),
        format_tag(&tag),
        format_level(level),
        message
    );
    print_stdout_safe(&console_line);

    let timestamp = now.format("%Y-%m-%d %H:%M:%S").to_string();
    let file_line = format!(
        "{} [{}] [{}] {}",
        timestamp,
        tag.to_plain_string(),
        level,
        message
    );
    write_to_file(&file_line);
}

/// Format a tag with its component color
fn format_tag(tag: &LogTag) -> ColoredString {
    let padded = format!("{:<width$}", tag.to_plain_string(), width = TAG_WIDTH);
    match tag {
        LogTag::Store => padded.bright_blue().bold(),
        LogTag::Ledger => padded.bright_cyan().bold(),
        LogTag::Cache => padded.bright_white().bold(),
        LogTag::RateLimit => padded.bright_magenta().bold(),
        LogTag::Throttle => padded.bright_green().bold(),
        LogTag::Probation => padded.bright_red().bold(),
        LogTag::Healing => padded.bright_yellow().bold(),
        LogTag::Config => padded.cyan().bold(),
        LogTag::System => padded.yellow().bold(),
    }
}

/// Format a level string with severity color
fn format_level(level: &str) -> ColoredString {
    let padded = format!("{:<width$}", level, width = LEVEL_WIDTH);
    match level {
        "ERROR" | "CRITICAL" => padded.bright_red().bold(),
        "WARNING" => padded.yellow(),
        "SUCCESS" | "HEALED" => padded.bright_green(),
        "DEBUG" | "VERBOSE" => padded.dimmed(),
        _ => padded.normal(),
    }
}

/// Print to stdout, swallowing broken-pipe errors (e.g. `warden | head`)
fn print_stdout_safe(line: &str) {
    let mut out = stdout();
    if let Err(e) = writeln!(out, "{}", line) {
        if e.kind() != ErrorKind::BrokenPipe {
            eprintln!("{}", line);
        }
    }
}

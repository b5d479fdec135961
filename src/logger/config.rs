/// Logger configuration with per-module debug gating
///
/// The config is initialized once from command-line arguments and can be
/// updated at runtime (tests override it to silence output or force
/// debug levels without touching process arguments).

use super::levels::LogLevel;
use super::tags::LogTag;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::path::PathBuf;

/// Runtime logger configuration
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Minimum level threshold (messages above are dropped)
    pub min_level: LogLevel,
    /// Tags with --debug-<module> enabled
    pub debug_tags: HashSet<String>,
    /// Tags with --verbose-<module> enabled
    pub verbose_tags: HashSet<String>,
    /// If non-empty, only these tags are logged
    pub enabled_tags: HashSet<String>,
    /// Directory for daily log files (None = console only)
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            min_level: LogLevel::Info,
            debug_tags: HashSet::new(),
            verbose_tags: HashSet::new(),
            enabled_tags: HashSet::new(),
            log_dir: None,
        }
    }
}

static LOGGER_CONFIG: Lazy<RwLock<LoggerConfig>> = Lazy::new(|| RwLock::new(LoggerConfig::default()));

/// Get a snapshot of the current logger configuration
pub fn get_logger_config() -> LoggerConfig {
    LOGGER_CONFIG.read().clone()
}

/// Replace the logger configuration wholesale
pub fn set_logger_config(config: LoggerConfig) {
    *LOGGER_CONFIG.write() = config;
}

/// Update the logger configuration in place
pub fn update_logger_config(f: impl FnOnce(&mut LoggerConfig)) {
    f(&mut LOGGER_CONFIG.write());
}

/// Initialize configuration from command-line arguments
///
/// Recognized flags:
/// - `--quiet`            raise threshold to Warning
/// - `--verbose`          lower threshold to Verbose
/// - `--debug-<module>`   enable debug logs for one tag
/// - `--verbose-<module>` enable verbose logs for one tag
pub fn init_from_args(args: &[String]) {
    let mut config = LoggerConfig::default();

    for arg in args {
        if arg == "--quiet" {
            config.min_level = LogLevel::Warning;
        } else if arg == "--verbose" {
            config.min_level = LogLevel::Verbose;
        } else if let Some(module) = arg.strip_prefix("--debug-") {
            config.debug_tags.insert(module.to_string());
        } else if let Some(module) = arg.strip_prefix("--verbose-") {
            config.verbose_tags.insert(module.to_string());
        }
    }

    set_logger_config(config);
}

/// Check whether debug logging is enabled for a tag
pub fn is_debug_enabled_for_tag(tag: &LogTag) -> bool {
    LOGGER_CONFIG.read().debug_tags.contains(&tag.to_debug_key())
}

/// Check whether verbose logging is enabled for a tag
pub fn is_verbose_enabled_for_tag(tag: &LogTag) -> bool {
    LOGGER_CONFIG.read().verbose_tags.contains(&tag.to_debug_key())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_flag_parsing() {
        init_from_args(&["--debug-store".to_string(), "--debug-healing".to_string()]);
        assert!(is_debug_enabled_for_tag(&LogTag::Store));
        assert!(is_debug_enabled_for_tag(&LogTag::Healing));
        assert!(!is_debug_enabled_for_tag(&LogTag::Cache));
        set_logger_config(LoggerConfig::default());
    }

    #[test]
    fn test_quiet_raises_threshold() {
        let mut config = LoggerConfig::default();
        config.min_level = LogLevel::Warning;
        assert!(LogLevel::Info > config.min_level);
    }
}

//! Centralized path resolution for warden
//!
//! All file and directory paths are resolved through this module so every
//! component agrees on where durable state lives.
//!
//! ## Directory Structure
//!
//! ```text
//! ~/Warden/
//! ├── data/
//! │   ├── config.toml
//! │   ├── positions_futures.json
//! │   ├── throttle_stats.json
//! │   ├── probation_state.json
//! │   ├── *.lock (sibling lock markers)
//! │   ├── backups/
//! │   └── heartbeats/
//! ├── logs/
//! │   ├── warden_*.log
//! │   ├── throttle_audit.jsonl
//! │   ├── probation_audit.jsonl
//! │   └── healing_audit.jsonl
//! ```

use once_cell::sync::OnceCell;
use std::path::{Path, PathBuf};

static BASE_DIRECTORY: OnceCell<PathBuf> = OnceCell::new();

/// Resolves the default base directory for all warden data
///
/// Uses platform-specific application data locations:
/// - macOS: ~/Library/Application Support/Warden
/// - Windows: %LOCALAPPDATA%\Warden
/// - Linux: $XDG_DATA_HOME/Warden (fallback ~/.local/share/Warden)
fn resolve_base_directory() -> PathBuf {
    const APP_DIR: &str = "Warden";

    if let Some(dir) = dirs::data_local_dir() {
        return dir.join(APP_DIR);
    }

    if let Some(dir) = dirs::data_dir() {
        return dir.join(APP_DIR);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(APP_DIR);
    }

    PathBuf::from(APP_DIR)
}

/// Override the base directory (from --data-dir or tests)
///
/// Must be called before the first path accessor; later calls are ignored.
pub fn set_base_directory(path: PathBuf) {
    let _ = BASE_DIRECTORY.set(path);
}

/// Returns the base directory for all warden data
pub fn get_base_directory() -> PathBuf {
    BASE_DIRECTORY.get_or_init(resolve_base_directory).clone()
}

/// Returns the data directory (durable state files)
pub fn get_data_directory() -> PathBuf {
    get_base_directory().join("data")
}

/// Returns the logs directory (daily logs + JSONL audit trails)
pub fn get_logs_directory() -> PathBuf {
    get_base_directory().join("logs")
}

/// Returns the backups directory for repaired/rotated state files
pub fn get_backups_directory() -> PathBuf {
    get_data_directory().join("backups")
}

/// Returns the heartbeat directory (one touch file per producer)
pub fn get_heartbeats_directory() -> PathBuf {
    get_data_directory().join("heartbeats")
}

// =============================================================================
// STATE FILE PATHS
// =============================================================================

/// Returns the main configuration file path
pub fn get_config_path() -> PathBuf {
    get_data_directory().join("config.toml")
}

/// Returns the position ledger path.
/// The file name is part of the external contract: dashboards and training
/// scripts parse it directly.
pub fn get_ledger_path() -> PathBuf {
    get_data_directory().join("positions_futures.json")
}

/// Returns the persisted throttle statistics path
pub fn get_throttle_stats_path() -> PathBuf {
    get_data_directory().join("throttle_stats.json")
}

/// Returns the persisted probation records path
pub fn get_probation_state_path() -> PathBuf {
    get_data_directory().join("probation_state.json")
}

// =============================================================================
// AUDIT LOG PATHS (append-only JSON Lines)
// =============================================================================

/// Returns the throttle decision audit log path
pub fn get_throttle_audit_path() -> PathBuf {
    get_logs_directory().join("throttle_audit.jsonl")
}

/// Returns the probation transition audit log path
pub fn get_probation_audit_path() -> PathBuf {
    get_logs_directory().join("probation_audit.jsonl")
}

/// Returns the healing cycle audit log path
pub fn get_healing_audit_path() -> PathBuf {
    get_logs_directory().join("healing_audit.jsonl")
}

// =============================================================================
// LOCK AND HEARTBEAT HELPERS
// =============================================================================

/// Returns the sibling lock marker for a state file (`<target>.lock`)
///
/// Lock files are zero-length markers, created lazily and never deleted.
pub fn lock_path_for(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    target.with_file_name(name)
}

/// Returns the heartbeat file for a named producer
pub fn heartbeat_path_for(producer: &str) -> PathBuf {
    get_heartbeats_directory().join(format!("{}.heartbeat", producer))
}

// =============================================================================
// DIRECTORY CREATION
// =============================================================================

/// Ensures all required directories exist
///
/// Creates the base directory and all subdirectories needed for operation.
/// Called early in startup and re-checked by the healing operator.
pub fn ensure_all_directories() -> Result<(), String> {
    let dirs_to_create = vec![
        ("base", get_base_directory()),
        ("data", get_data_directory()),
        ("logs", get_logs_directory()),
        ("backups", get_backups_directory()),
        ("heartbeats", get_heartbeats_directory()),
    ];

    for (name, dir) in dirs_to_create {
        if !dir.exists() {
            std::fs::create_dir_all(&dir).map_err(|e| {
                format!(
                    "Failed to create {} directory at {}: {}",
                    name,
                    dir.display(),
                    e
                )
            })?;
        }
    }

    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_path_is_sibling() {
        let target = PathBuf::from("/tmp/warden/data/positions_futures.json");
        let lock = lock_path_for(&target);
        assert_eq!(lock.parent(), target.parent());
        assert_eq!(
            lock.file_name().unwrap(),
            "positions_futures.json.lock"
        );
    }

    #[test]
    fn test_state_paths_in_data_dir() {
        let data = get_data_directory();
        assert!(get_ledger_path().starts_with(&data));
        assert!(get_throttle_stats_path().starts_with(&data));
        assert!(get_probation_state_path().starts_with(&data));
    }

    #[test]
    fn test_audit_paths_in_logs_dir() {
        let logs = get_logs_directory();
        assert!(get_throttle_audit_path().starts_with(&logs));
        assert!(get_probation_audit_path().starts_with(&logs));
        assert!(get_healing_audit_path().starts_with(&logs));
    }

    #[test]
    fn test_ledger_file_name_contract() {
        assert_eq!(
            get_ledger_path().file_name().unwrap(),
            "positions_futures.json"
        );
    }
}

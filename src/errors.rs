/// Error taxonomy for the warden core
///
/// Low-level components degrade instead of crashing: lock timeouts and
/// corrupted state are recoverable, and the call sites decide the fallback
/// explicitly. Only the healing operator classifies failures as critical.

use std::path::PathBuf;
use thiserror::Error;

/// Which kind of file lock was being acquired when an error occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

impl std::fmt::Display for LockMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockMode::Shared => write!(f, "shared"),
            LockMode::Exclusive => write!(f, "exclusive"),
        }
    }
}

/// Which recovery strategy repaired a corrupted state file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairStrategy {
    Backup,
    SubstringExtraction,
    Default,
}

impl std::fmt::Display for RepairStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepairStrategy::Backup => write!(f, "backup"),
            RepairStrategy::SubstringExtraction => write!(f, "substring_extraction"),
            RepairStrategy::Default => write!(f, "default"),
        }
    }
}

#[derive(Debug, Error)]
pub enum CoreError {
    /// Recoverable: reads fall back to defaults, writes surface a retryable error
    #[error("timed out acquiring {mode} lock on {path} after {waited_ms}ms")]
    LockTimeout {
        path: PathBuf,
        mode: LockMode,
        waited_ms: u64,
    },

    /// A state file failed to parse and no repair path produced valid content
    #[error("corrupted state in {path}: {detail}")]
    CorruptedState { path: PathBuf, detail: String },

    /// A structural invariant does not hold (e.g. ledger missing required keys)
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl CoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CoreError::Io {
            path: path.into(),
            source,
        }
    }

    /// Lock timeouts are the one failure callers routinely absorb
    pub fn is_lock_timeout(&self) -> bool {
        matches!(self, CoreError::LockTimeout { .. })
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

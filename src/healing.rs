//! Self-healing background operator
//!
//! One daemon loop on a fixed period that re-validates the invariants of
//! every other component and repairs what it can: missing directories and
//! files are created, stale heartbeats refreshed, a malformed ledger
//! repaired through the store's recovery chain, and registered components
//! asked to run their own self-checks. No check failure ever escapes the
//! loop; failures are reported through the alert sink and the cycle moves
//! on.
//!
//! Monitoring reads a tri-color status: RED when a critical component
//! failed the last cycle, YELLOW when a non-critical one failed or no
//! cycle has completed recently, GREEN otherwise. Finding problems and
//! fixing them in the same cycle is green.

use crate::audit::JsonlAudit;
use crate::config::HealingConfig;
use crate::errors::CoreResult;
use crate::ledger::LedgerStore;
use crate::logger::{self, LogTag};
use crate::paths;
use crate::shutdown::Shutdown;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

// ============================================================================
// CHECK AND STATUS TYPES
// ============================================================================

/// Result of one idempotent check inside a healing cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub healed: bool,
    pub failed: bool,
    pub actions: Vec<String>,
}

impl CheckOutcome {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn healed(action: impl Into<String>) -> Self {
        Self {
            healed: true,
            failed: false,
            actions: vec![action.into()],
        }
    }

    pub fn failed(action: impl Into<String>) -> Self {
        Self {
            healed: false,
            failed: true,
            actions: vec![action.into()],
        }
    }

    fn push(&mut self, action: impl Into<String>) {
        self.actions.push(action.into());
    }
}

/// Self-check hook a subsystem exposes to the healing operator
pub trait SelfCheck: Send + Sync {
    /// Stable component name, matched against `critical_components`
    fn name(&self) -> &str;
    fn self_check(&self) -> CoreResult<CheckOutcome>;
}

/// Tri-color health status exposed to monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthColor {
    #[serde(rename = "green")]
    Green,
    #[serde(rename = "yellow")]
    Yellow,
    #[serde(rename = "red")]
    Red,
}

impl std::fmt::Display for HealthColor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthColor::Green => write!(f, "green"),
            HealthColor::Yellow => write!(f, "yellow"),
            HealthColor::Red => write!(f, "red"),
        }
    }
}

/// Status snapshot polled by dashboards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub self_healing: HealthColor,
}

/// One named check inside a cycle result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckReport {
    pub name: String,
    #[serde(flatten)]
    pub outcome: CheckOutcome,
}

/// Aggregate outcome of one healing cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealingCycleResult {
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    pub status: HealthColor,
    pub healed_count: usize,
    pub failed_count: usize,
    pub checks: Vec<CheckReport>,
}

// ============================================================================
// ALERT SINK
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertSeverity {
    Warning,
    Critical,
}

/// Escalation channel for failures the operator could not repair
pub trait AlertSink: Send + Sync {
    fn alert(&self, severity: AlertSeverity, component: &str, message: &str);
}

/// Default sink: alerts land in the log
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn alert(&self, severity: AlertSeverity, component: &str, message: &str) {
        match severity {
            AlertSeverity::Critical => logger::error(
                LogTag::Healing,
                &format!("CRITICAL [{}]: {}", component, message),
            ),
            AlertSeverity::Warning => {
                logger::warning(LogTag::Healing, &format!("[{}]: {}", component, message))
            }
        }
    }
}

// ============================================================================
// OPERATOR
// ============================================================================

/// Filesystem surface the operator watches over
///
/// Injected rather than resolved internally so tests can point the
/// operator at a scratch directory.
#[derive(Debug, Clone)]
pub struct HealingPaths {
    /// Directories that must exist
    pub directories: Vec<PathBuf>,
    /// Append-only files created empty when missing
    pub touch_files: Vec<PathBuf>,
    /// Directory scanned for `*.heartbeat` producer files
    pub heartbeats_dir: PathBuf,
}

impl HealingPaths {
    /// The standard layout under the application base directory
    pub fn resolve() -> Self {
        Self {
            directories: vec![
                paths::get_data_directory(),
                paths::get_logs_directory(),
                paths::get_backups_directory(),
                paths::get_heartbeats_directory(),
            ],
            touch_files: vec![
                paths::get_throttle_audit_path(),
                paths::get_probation_audit_path(),
                paths::get_healing_audit_path(),
            ],
            heartbeats_dir: paths::get_heartbeats_directory(),
        }
    }
}

struct LastCycle {
    completed: Instant,
    status: HealthColor,
}

/// The self-healing daemon
pub struct HealingOperator {
    config: HealingConfig,
    paths: HealingPaths,
    ledger: LedgerStore,
    components: Mutex<Vec<Arc<dyn SelfCheck>>>,
    alert_sink: Arc<dyn AlertSink>,
    audit: JsonlAudit,
    last_cycle: Mutex<Option<LastCycle>>,
}

impl HealingOperator {
    pub fn new(
        config: HealingConfig,
        paths: HealingPaths,
        ledger: LedgerStore,
        alert_sink: Arc<dyn AlertSink>,
        audit_path: PathBuf,
    ) -> Self {
        Self {
            config,
            paths,
            ledger,
            components: Mutex::new(Vec::new()),
            alert_sink,
            audit: JsonlAudit::new(audit_path),
            last_cycle: Mutex::new(None),
        }
    }

    /// Register a subsystem self-check, run at the end of every cycle
    pub fn register_component(&self, component: Arc<dyn SelfCheck>) {
        self.components.lock().push(component);
    }

    /// Current tri-color status for monitoring
    pub fn get_status(&self) -> HealthStatus {
        let last = self.last_cycle.lock();
        let color = match last.as_ref() {
            None => HealthColor::Yellow,
            Some(cycle) if cycle.status == HealthColor::Red => HealthColor::Red,
            Some(cycle)
                if cycle.completed.elapsed()
                    >= Duration::from_secs(self.config.cycle_stale_secs) =>
            {
                HealthColor::Yellow
            }
            Some(cycle) => cycle.status,
        };
        HealthStatus {
            self_healing: color,
        }
    }

    /// Run one full healing cycle
    ///
    /// Checks run in a fixed order; each is independent and idempotent,
    /// and a failing check never prevents the remaining ones.
    pub fn run_cycle(&self) -> HealingCycleResult {
        let started = Instant::now();
        let timestamp = Utc::now();
        let mut checks = Vec::new();

        checks.push(CheckReport {
            name: "file_integrity".to_string(),
            outcome: self.check_file_integrity(),
        });
        checks.push(CheckReport {
            name: "heartbeats".to_string(),
            outcome: self.check_heartbeats(),
        });
        checks.push(CheckReport {
            name: "ledger_integrity".to_string(),
            outcome: self.check_ledger(),
        });

        let components: Vec<Arc<dyn SelfCheck>> = self.components.lock().clone();
        for component in components {
            let outcome = match component.self_check() {
                Ok(outcome) => outcome,
                Err(e) => CheckOutcome::failed(format!("self-check error: {}", e)),
            };
            checks.push(CheckReport {
                name: component.name().to_string(),
                outcome,
            });
        }

        for check in checks.iter().filter(|c| c.outcome.failed) {
            let severity = if self.is_critical(&check.name) {
                AlertSeverity::Critical
            } else {
                AlertSeverity::Warning
            };
            self.alert_sink
                .alert(severity, &check.name, &check.outcome.actions.join("; "));
        }

        let healed_count = checks.iter().filter(|c| c.outcome.healed).count();
        let failed_count = checks.iter().filter(|c| c.outcome.failed).count();
        let status = if checks
            .iter()
            .any(|c| c.outcome.failed && self.is_critical(&c.name))
        {
            HealthColor::Red
        } else if failed_count > 0 {
            HealthColor::Yellow
        } else {
            HealthColor::Green
        };

        let result = HealingCycleResult {
            timestamp,
            duration_ms: started.elapsed().as_millis() as u64,
            status,
            healed_count,
            failed_count,
            checks,
        };

        *self.last_cycle.lock() = Some(LastCycle {
            completed: Instant::now(),
            status,
        });

        if let Err(e) = self.audit.append(&result) {
            logger::warning(
                LogTag::Healing,
                &format!("Failed to append healing audit record: {}", e),
            );
        }
        logger::info(
            LogTag::Healing,
            &format!(
                "Cycle complete in {}ms: {} ({} healed, {} failed)",
                result.duration_ms, status, healed_count, failed_count
            ),
        );
        result
    }

    /// Background loop on the configured period
    ///
    /// One cycle runs immediately on startup so the status leaves yellow
    /// without waiting a full interval; the task stops on `shutdown`.
    pub fn spawn(self: &Arc<Self>, shutdown: Shutdown) -> tokio::task::JoinHandle<()> {
        let operator = Arc::clone(self);
        let interval = Duration::from_secs(operator.config.cycle_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        operator.run_cycle();
                    }
                    _ = shutdown.wait() => {
                        logger::info(LogTag::Healing, "Healing loop stopped");
                        return;
                    }
                }
            }
        })
    }

    fn is_critical(&self, name: &str) -> bool {
        self.config.critical_components.iter().any(|c| c == name)
    }

    // =========================================================================
    // BUILT-IN CHECKS
    // =========================================================================

    /// Required directories and append-only files exist
    fn check_file_integrity(&self) -> CheckOutcome {
        let mut outcome = CheckOutcome::ok();
        for dir in &self.paths.directories {
            if dir.exists() {
                continue;
            }
            match std::fs::create_dir_all(dir) {
                Ok(()) => {
                    outcome.healed = true;
                    outcome.push(format!("created directory {}", dir.display()));
                }
                Err(e) => {
                    outcome.failed = true;
                    outcome.push(format!("cannot create {}: {}", dir.display(), e));
                }
            }
        }
        for file in &self.paths.touch_files {
            if file.exists() {
                continue;
            }
            match std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(file)
            {
                Ok(_) => {
                    outcome.healed = true;
                    outcome.push(format!("created file {}", file.display()));
                }
                Err(e) => {
                    outcome.failed = true;
                    outcome.push(format!("cannot create {}: {}", file.display(), e));
                }
            }
        }
        outcome
    }

    /// Refresh heartbeat files nobody has written to recently
    ///
    /// Producers that are alive but quiet would otherwise be reported dead
    /// by downstream health checks. Only existing files are touched.
    fn check_heartbeats(&self) -> CheckOutcome {
        let mut outcome = CheckOutcome::ok();
        let Ok(entries) = std::fs::read_dir(&self.paths.heartbeats_dir) else {
            return outcome;
        };
        let stale_after = Duration::from_secs(self.config.heartbeat_stale_secs);

        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("heartbeat") {
                continue;
            }
            let stale = entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| SystemTime::now().duration_since(modified).ok())
                .map(|age| age >= stale_after)
                .unwrap_or(true);
            if !stale {
                continue;
            }
            match std::fs::write(&path, Utc::now().to_rfc3339()) {
                Ok(()) => {
                    outcome.healed = true;
                    outcome.push(format!("refreshed stale heartbeat {}", path.display()));
                }
                Err(e) => {
                    outcome.failed = true;
                    outcome.push(format!("cannot refresh {}: {}", path.display(), e));
                }
            }
        }
        outcome
    }

    /// The ledger parses and carries both position arrays
    ///
    /// A malformed file goes through the store's repair chain (backup,
    /// substring extraction, empty default) and is rewritten in valid
    /// shape.
    fn check_ledger(&self) -> CheckOutcome {
        let path = self.ledger.path().clone();
        if !path.exists() {
            return match self.ledger.save(&Default::default()) {
                Ok(()) => CheckOutcome::healed(format!("created empty ledger {}", path.display())),
                Err(e) => CheckOutcome::failed(format!("cannot create ledger: {}", e)),
            };
        }

        let shape_ok = std::fs::read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str::<serde_json::Value>(&raw).ok())
            .map(|value| {
                value["open_positions"].is_array() && value["closed_positions"].is_array()
            })
            .unwrap_or(false);
        if shape_ok {
            return CheckOutcome::ok();
        }

        let repaired = self.ledger.load();
        match self.ledger.save(&repaired) {
            Ok(()) => CheckOutcome::healed(format!(
                "repaired ledger shape ({} open, {} closed retained)",
                repaired.open_positions.len(),
                repaired.closed_positions.len()
            )),
            Err(e) => CheckOutcome::failed(format!("ledger repair failed: {}", e)),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::store::AtomicStore;
    use std::sync::atomic::{AtomicU64, Ordering};

    static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

    struct CollectingSink {
        alerts: Mutex<Vec<(AlertSeverity, String)>>,
    }

    impl CollectingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                alerts: Mutex::new(Vec::new()),
            })
        }
    }

    impl AlertSink for CollectingSink {
        fn alert(&self, severity: AlertSeverity, component: &str, _message: &str) {
            self.alerts.lock().push((severity, component.to_string()));
        }
    }

    struct FixedCheck {
        name: String,
        outcome: CheckOutcome,
    }

    impl SelfCheck for FixedCheck {
        fn name(&self) -> &str {
            &self.name
        }
        fn self_check(&self) -> CoreResult<CheckOutcome> {
            Ok(self.outcome.clone())
        }
    }

    struct ErroringCheck;

    impl SelfCheck for ErroringCheck {
        fn name(&self) -> &str {
            "erroring"
        }
        fn self_check(&self) -> CoreResult<CheckOutcome> {
            Err(crate::errors::CoreError::Configuration(
                "broken".to_string(),
            ))
        }
    }

    fn temp_dir() -> PathBuf {
        let id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir().join(format!(
            "warden_healing_test_{}_{}",
            std::process::id(),
            id
        ));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    fn operator_in(dir: &PathBuf, sink: Arc<dyn AlertSink>) -> HealingOperator {
        let store = AtomicStore::new(StoreConfig::default(), dir.join("data/backups"));
        let ledger = LedgerStore::new(store, dir.join("data/positions_futures.json"));
        let paths = HealingPaths {
            directories: vec![dir.join("data"), dir.join("logs"), dir.join("data/heartbeats")],
            touch_files: vec![dir.join("logs/throttle_audit.jsonl")],
            heartbeats_dir: dir.join("data/heartbeats"),
        };
        HealingOperator::new(
            HealingConfig::default(),
            paths,
            ledger,
            sink,
            dir.join("logs/healing_audit.jsonl"),
        )
    }

    #[test]
    fn test_first_cycle_creates_missing_surface() {
        let dir = temp_dir();
        let operator = operator_in(&dir, CollectingSink::new());

        let result = operator.run_cycle();
        assert_eq!(result.status, HealthColor::Green);
        assert!(result.healed_count >= 2, "got {:?}", result);
        assert!(dir.join("data/heartbeats").is_dir());
        assert!(dir.join("logs/throttle_audit.jsonl").exists());
        assert!(dir.join("data/positions_futures.json").exists());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_second_cycle_is_idempotent() {
        let dir = temp_dir();
        let operator = operator_in(&dir, CollectingSink::new());
        operator.run_cycle();

        let result = operator.run_cycle();
        assert_eq!(result.status, HealthColor::Green);
        assert_eq!(result.healed_count, 0, "got {:?}", result);
        assert_eq!(result.failed_count, 0);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_corrupted_ledger_repaired_in_cycle() {
        let dir = temp_dir();
        let operator = operator_in(&dir, CollectingSink::new());
        operator.run_cycle();

        std::fs::write(dir.join("data/positions_futures.json"), "{\"open_pos").unwrap();
        let result = operator.run_cycle();
        // Healed in the same cycle counts as green
        assert_eq!(result.status, HealthColor::Green);
        let ledger_check = result
            .checks
            .iter()
            .find(|c| c.name == "ledger_integrity")
            .unwrap();
        assert!(ledger_check.outcome.healed);

        let raw = std::fs::read_to_string(dir.join("data/positions_futures.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert!(value["open_positions"].is_array());
        assert!(value["closed_positions"].is_array());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_stale_heartbeat_refreshed() {
        let dir = temp_dir();
        let sink = CollectingSink::new();
        let store = AtomicStore::new(StoreConfig::default(), dir.join("data/backups"));
        let ledger = LedgerStore::new(store, dir.join("data/positions_futures.json"));
        let paths = HealingPaths {
            directories: vec![dir.join("data"), dir.join("data/heartbeats")],
            touch_files: vec![],
            heartbeats_dir: dir.join("data/heartbeats"),
        };
        // Zero staleness threshold: every heartbeat is due for a refresh
        let config = HealingConfig {
            heartbeat_stale_secs: 0,
            ..HealingConfig::default()
        };
        let operator = HealingOperator::new(
            config,
            paths,
            ledger,
            sink,
            dir.join("healing_audit.jsonl"),
        );

        std::fs::create_dir_all(dir.join("data/heartbeats")).unwrap();
        let heartbeat = dir.join("data/heartbeats/scanner.heartbeat");
        std::fs::write(&heartbeat, "old").unwrap();

        let result = operator.run_cycle();
        let check = result.checks.iter().find(|c| c.name == "heartbeats").unwrap();
        assert!(check.outcome.healed);
        let refreshed = std::fs::read_to_string(&heartbeat).unwrap();
        assert_ne!(refreshed, "old");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_critical_component_failure_turns_red() {
        let dir = temp_dir();
        let sink = CollectingSink::new();
        let operator = operator_in(&dir, sink.clone());
        operator.register_component(Arc::new(FixedCheck {
            name: "trade_execution".to_string(),
            outcome: CheckOutcome::failed("order path unreachable"),
        }));

        let result = operator.run_cycle();
        assert_eq!(result.status, HealthColor::Red);
        assert_eq!(operator.get_status().self_healing, HealthColor::Red);

        let alerts = sink.alerts.lock();
        assert!(alerts
            .iter()
            .any(|(sev, name)| *sev == AlertSeverity::Critical && name == "trade_execution"));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_noncritical_failure_turns_yellow() {
        let dir = temp_dir();
        let sink = CollectingSink::new();
        let operator = operator_in(&dir, sink.clone());
        operator.register_component(Arc::new(FixedCheck {
            name: "intelligence_poller".to_string(),
            outcome: CheckOutcome::failed("feed stale"),
        }));

        let result = operator.run_cycle();
        assert_eq!(result.status, HealthColor::Yellow);
        assert_eq!(operator.get_status().self_healing, HealthColor::Yellow);

        let alerts = sink.alerts.lock();
        assert!(alerts
            .iter()
            .any(|(sev, name)| *sev == AlertSeverity::Warning && name == "intelligence_poller"));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_erroring_check_does_not_stop_cycle() {
        let dir = temp_dir();
        let operator = operator_in(&dir, CollectingSink::new());
        operator.register_component(Arc::new(ErroringCheck));
        operator.register_component(Arc::new(FixedCheck {
            name: "after_error".to_string(),
            outcome: CheckOutcome::ok(),
        }));

        let result = operator.run_cycle();
        let erroring = result.checks.iter().find(|c| c.name == "erroring").unwrap();
        assert!(erroring.outcome.failed);
        assert!(result.checks.iter().any(|c| c.name == "after_error"));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_status_yellow_before_first_cycle_and_when_stale() {
        let dir = temp_dir();
        let sink = CollectingSink::new();
        let store = AtomicStore::new(StoreConfig::default(), dir.join("data/backups"));
        let ledger = LedgerStore::new(store, dir.join("data/positions_futures.json"));
        let paths = HealingPaths {
            directories: vec![dir.join("data")],
            touch_files: vec![],
            heartbeats_dir: dir.join("data/heartbeats"),
        };
        // Zero freshness window: a completed cycle is immediately stale
        let config = HealingConfig {
            cycle_stale_secs: 0,
            ..HealingConfig::default()
        };
        let operator = HealingOperator::new(
            config,
            paths,
            ledger,
            sink,
            dir.join("healing_audit.jsonl"),
        );

        assert_eq!(operator.get_status().self_healing, HealthColor::Yellow);
        operator.run_cycle();
        assert_eq!(operator.get_status().self_healing, HealthColor::Yellow);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_cycle_appends_audit_record() {
        let dir = temp_dir();
        let operator = operator_in(&dir, CollectingSink::new());
        operator.run_cycle();
        operator.run_cycle();

        let raw = std::fs::read_to_string(dir.join("logs/healing_audit.jsonl")).unwrap();
        let lines: Vec<serde_json::Value> = raw
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["status"], "green");
        assert!(lines[0]["checks"].is_array());
        let _ = std::fs::remove_dir_all(&dir);
    }
}

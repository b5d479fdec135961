//! Correlation-aware position sizing throttle
//!
//! Sits between signal generation and order execution: every proposed
//! position size passes through `check_throttle`, which reduces it when
//! the new position would concentrate risk in symbols that move together.
//! Reductions are multiplicative factors from a fixed ladder; when several
//! rules fire, the most restrictive factor wins. Reduced sizes are raised
//! back to a configured floor so the throttle resizes positions but never
//! vetoes them outright.
//!
//! Decisions are pure with respect to their inputs (open positions and
//! portfolio value are passed in, not fetched), which keeps every rule
//! testable without touching the ledger.

pub mod clusters;

pub use clusters::{ClusterHeuristic, ClusterMap, CorrelationSource, UNCLUSTERED};

use crate::audit::JsonlAudit;
use crate::config::ThrottleConfig;
use crate::errors::CoreResult;
use crate::ledger::{Position, Side};
use crate::logger::{self, LogTag};
use crate::store::AtomicStore;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use crate::shutdown::Shutdown;
use std::path::PathBuf;
use std::sync::Arc;

/// Top-level keys a structurally valid stats file must carry
pub const THROTTLE_STATS_KEYS: &[&str] = &["total_checks", "throttled_count"];

// ============================================================================
// DECISION AND STATS TYPES
// ============================================================================

/// Outcome of one sizing check
#[derive(Debug, Clone, PartialEq)]
pub struct ThrottleResult {
    pub original_size_usd: f64,
    pub throttled_size_usd: f64,
    /// Multiplicative factor applied before the floor (1.0 = untouched)
    pub reduction_factor: f64,
    pub was_throttled: bool,
    pub cluster: String,
    /// The rule that produced the winning factor, when one fired
    pub reason: Option<String>,
}

/// Cumulative throttle statistics, persisted across restarts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleStats {
    pub total_checks: u64,
    pub throttled_count: u64,
    pub total_reduction_usd: f64,
    pub by_cluster: HashMap<String, u64>,
    pub by_reason: HashMap<String, u64>,
}

/// One line in the throttle audit trail
#[derive(Debug, Serialize)]
struct ThrottleAuditRecord<'a> {
    timestamp: chrono::DateTime<Utc>,
    symbol: &'a str,
    side: Side,
    cluster: &'a str,
    original_size_usd: f64,
    throttled_size_usd: f64,
    reduction_factor: f64,
    reason: &'a str,
    avg_correlation: f64,
    cluster_exposure_usd: f64,
}

// ============================================================================
// THROTTLE
// ============================================================================

/// Rule set rebuilt together on refresh so a decision never mixes an old
/// cluster map with new thresholds.
struct ThrottleRules {
    config: ThrottleConfig,
    clusters: ClusterMap,
    correlation: Arc<dyn CorrelationSource>,
}

impl ThrottleRules {
    fn from_config(config: ThrottleConfig) -> Self {
        let clusters = ClusterMap::from_config(&config.clusters);
        let correlation = Arc::new(ClusterHeuristic::new(
            clusters.clone(),
            config.same_cluster_correlation,
            config.cross_cluster_correlation,
        ));
        Self {
            config,
            clusters,
            correlation,
        }
    }
}

/// Correlation-aware sizing throttle with persisted statistics
pub struct CorrelationThrottle {
    rules: RwLock<ThrottleRules>,
    stats: Mutex<ThrottleStats>,
    store: AtomicStore,
    stats_path: PathBuf,
    audit: JsonlAudit,
}

impl CorrelationThrottle {
    /// Build the throttle, loading persisted stats from the store
    pub fn new(
        config: ThrottleConfig,
        store: AtomicStore,
        stats_path: PathBuf,
        audit_path: PathBuf,
    ) -> Self {
        let stats = store.read(&stats_path, THROTTLE_STATS_KEYS, ThrottleStats::default());
        Self {
            rules: RwLock::new(ThrottleRules::from_config(config)),
            stats: Mutex::new(stats),
            store,
            stats_path,
            audit: JsonlAudit::new(audit_path),
        }
    }

    /// Swap in a different correlation estimator (e.g. a return-series one)
    pub fn set_correlation_source(&self, source: Arc<dyn CorrelationSource>) {
        self.rules.write().correlation = source;
    }

    /// Reload rules from fresh configuration and stats from disk
    ///
    /// Replaces cluster definitions, thresholds and the heuristic source in
    /// one step. In-memory stat counters are overwritten by the persisted
    /// snapshot.
    pub fn refresh(&self, config: ThrottleConfig) {
        *self.rules.write() = ThrottleRules::from_config(config);
        *self.stats.lock() =
            self.store
                .read(&self.stats_path, THROTTLE_STATS_KEYS, ThrottleStats::default());
        logger::info(LogTag::Throttle, "Throttle rules and stats refreshed");
    }

    /// Decide the admissible size for a proposed position
    ///
    /// Evaluates the correlation ladder, the per-cluster position count and
    /// the cluster exposure ladder against the caller-supplied open
    /// positions; the most restrictive factor wins. A reduced size below
    /// the floor is raised back to the floor when the original request was
    /// at or above it.
    pub fn check_throttle(
        &self,
        symbol: &str,
        side: Side,
        proposed_size_usd: f64,
        open_positions: &[Position],
        portfolio_value_usd: f64,
    ) -> ThrottleResult {
        let rules = self.rules.read();
        let config = &rules.config;
        let cluster = rules.clusters.cluster_of(symbol).to_string();

        let avg_correlation = if open_positions.is_empty() {
            0.0
        } else {
            open_positions
                .iter()
                .map(|p| rules.correlation.correlation(symbol, &p.symbol))
                .sum::<f64>()
                / open_positions.len() as f64
        };

        let cluster_positions: Vec<&Position> = open_positions
            .iter()
            .filter(|p| rules.clusters.cluster_of(&p.symbol) == cluster)
            .collect();
        let cluster_exposure_usd: f64 = cluster_positions.iter().map(|p| p.size_usd).sum();

        let exposure_limit = portfolio_value_usd * config.max_cluster_exposure_pct;
        let exposure_ratio = if exposure_limit > 0.0 {
            cluster_exposure_usd / exposure_limit
        } else if cluster_exposure_usd > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        let mut candidates: Vec<(f64, &'static str)> = Vec::new();
        if avg_correlation > config.extreme_correlation_threshold {
            candidates.push((0.3, "extreme_correlation"));
        } else if avg_correlation > config.high_correlation_threshold {
            candidates.push((0.5, "high_correlation"));
        }
        if cluster_positions.len() >= config.max_positions_per_cluster {
            candidates.push((0.3, "cluster_position_limit"));
        }
        if exposure_ratio >= 1.0 {
            candidates.push((0.1, "cluster_exposure_full"));
        } else if exposure_ratio >= 0.8 {
            candidates.push((0.3, "cluster_exposure_high"));
        } else if exposure_ratio >= 0.6 {
            candidates.push((0.5, "cluster_exposure_elevated"));
        }

        let (reduction_factor, reason) = candidates
            .into_iter()
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(factor, reason)| (factor, Some(reason)))
            .unwrap_or((1.0, None));

        let mut throttled_size_usd = proposed_size_usd * reduction_factor;
        // Resize, never veto: requests at or above the floor stay tradeable
        if proposed_size_usd >= config.min_position_floor_usd
            && throttled_size_usd < config.min_position_floor_usd
        {
            throttled_size_usd = config.min_position_floor_usd;
        }
        let was_throttled = throttled_size_usd < proposed_size_usd;

        let result = ThrottleResult {
            original_size_usd: proposed_size_usd,
            throttled_size_usd,
            reduction_factor,
            was_throttled,
            cluster: cluster.clone(),
            reason: reason.map(|r| r.to_string()),
        };

        self.record_decision(symbol, side, &result, avg_correlation, cluster_exposure_usd);
        result
    }

    fn record_decision(
        &self,
        symbol: &str,
        side: Side,
        result: &ThrottleResult,
        avg_correlation: f64,
        cluster_exposure_usd: f64,
    ) {
        {
            let mut stats = self.stats.lock();
            stats.total_checks += 1;
            if result.was_throttled {
                stats.throttled_count += 1;
                stats.total_reduction_usd +=
                    result.original_size_usd - result.throttled_size_usd;
                *stats.by_cluster.entry(result.cluster.clone()).or_insert(0) += 1;
                if let Some(reason) = &result.reason {
                    *stats.by_reason.entry(reason.clone()).or_insert(0) += 1;
                }
            }
        }

        if !result.was_throttled {
            return;
        }

        let reason = result.reason.as_deref().unwrap_or("unknown");
        logger::info(
            LogTag::Throttle,
            &format!(
                "{} {}: size {:.2} -> {:.2} USD ({}, cluster {})",
                symbol,
                side,
                result.original_size_usd,
                result.throttled_size_usd,
                reason,
                result.cluster
            ),
        );

        let record = ThrottleAuditRecord {
            timestamp: Utc::now(),
            symbol,
            side,
            cluster: &result.cluster,
            original_size_usd: result.original_size_usd,
            throttled_size_usd: result.throttled_size_usd,
            reduction_factor: result.reduction_factor,
            reason,
            avg_correlation,
            cluster_exposure_usd,
        };
        if let Err(e) = self.audit.append(&record) {
            logger::warning(
                LogTag::Throttle,
                &format!("Failed to append throttle audit record: {}", e),
            );
        }
    }

    /// Snapshot of the in-memory counters
    pub fn stats(&self) -> ThrottleStats {
        self.stats.lock().clone()
    }

    /// Persist the current counters through the atomic store
    pub fn flush_stats(&self) -> CoreResult<()> {
        let snapshot = self.stats.lock().clone();
        self.store.write(&self.stats_path, &snapshot)?;
        logger::debug(
            LogTag::Throttle,
            &format!(
                "Flushed throttle stats ({} checks, {} throttled)",
                snapshot.total_checks, snapshot.throttled_count
            ),
        );
        Ok(())
    }

    /// Background task persisting stats on the configured interval
    ///
    /// Runs until `shutdown` is notified; flushes one final time on the way
    /// out so counters survive a clean stop.
    pub fn spawn_stats_flush(
        self: &Arc<Self>,
        shutdown: Shutdown,
    ) -> tokio::task::JoinHandle<()> {
        let throttle = Arc::clone(self);
        let interval_secs = throttle.rules.read().config.stats_flush_interval_secs;
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_secs(interval_secs.max(1)));
            // The first tick fires immediately; skip it
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = throttle.flush_stats() {
                            logger::warning(
                                LogTag::Throttle,
                                &format!("Periodic stats flush failed: {}", e),
                            );
                        }
                    }
                    _ = shutdown.wait() => {
                        if let Err(e) = throttle.flush_stats() {
                            logger::warning(
                                LogTag::Throttle,
                                &format!("Final stats flush failed: {}", e),
                            );
                        }
                        logger::info(LogTag::Throttle, "Stats flush task stopped");
                        return;
                    }
                }
            }
        })
    }
}

impl crate::healing::SelfCheck for CorrelationThrottle {
    fn name(&self) -> &str {
        "throttle_stats"
    }

    /// The persisted stats file exists and parses; rewrite it when not
    fn self_check(&self) -> CoreResult<crate::healing::CheckOutcome> {
        let parseable = std::fs::read_to_string(&self.stats_path)
            .ok()
            .map(|raw| serde_json::from_str::<ThrottleStats>(&raw).is_ok())
            .unwrap_or(false);
        if parseable {
            return Ok(crate::healing::CheckOutcome::ok());
        }
        self.flush_stats()?;
        Ok(crate::healing::CheckOutcome::healed(format!(
            "rewrote throttle stats at {}",
            self.stats_path.display()
        )))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use std::sync::atomic::{AtomicU64, Ordering};

    static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

    fn temp_throttle() -> (CorrelationThrottle, PathBuf) {
        let id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir().join(format!(
            "warden_throttle_test_{}_{}",
            std::process::id(),
            id
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let store = AtomicStore::new(StoreConfig::default(), dir.join("backups"));
        let throttle = CorrelationThrottle::new(
            ThrottleConfig::default(),
            store,
            dir.join("throttle_stats.json"),
            dir.join("throttle_audit.jsonl"),
        );
        (throttle, dir)
    }

    fn open(symbol: &str, size_usd: f64) -> Position {
        Position {
            symbol: symbol.to_string(),
            side: Side::Long,
            size_usd,
            entry_price: 100.0,
            leverage: 3,
            strategy: "momentum".to_string(),
            opened_at: Utc::now(),
        }
    }

    #[test]
    fn test_no_open_positions_passes_untouched() {
        let (throttle, dir) = temp_throttle();
        let result = throttle.check_throttle("BTCUSDT", Side::Long, 500.0, &[], 10_000.0);
        assert!(!result.was_throttled);
        assert_eq!(result.reduction_factor, 1.0);
        assert_eq!(result.throttled_size_usd, 500.0);
        assert!(result.reason.is_none());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_crowded_cluster_reduces_size() {
        // Cluster exposure 250 of a 300 USD limit (30% of 1000) puts the
        // ratio in the high band, so the proposed 100 shrinks to 30.
        let (throttle, dir) = temp_throttle();
        let positions = [open("BTCUSDT", 150.0), open("ETHUSDT", 100.0)];
        let result =
            throttle.check_throttle("SOLUSDT", Side::Long, 100.0, &positions, 1_000.0);

        assert!(result.was_throttled);
        assert!(result.reduction_factor <= 0.5);
        assert_eq!(result.cluster, "btc-correlated");
        assert_eq!(result.reason.as_deref(), Some("cluster_exposure_high"));
        assert!((result.throttled_size_usd - 30.0).abs() < 1e-9);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_unrelated_cluster_not_throttled() {
        let (throttle, dir) = temp_throttle();
        let positions = [open("BTCUSDT", 150.0), open("ETHUSDT", 100.0)];
        let result =
            throttle.check_throttle("DOGEUSDT", Side::Long, 100.0, &positions, 1_000.0);

        assert!(!result.was_throttled);
        assert_eq!(result.cluster, "meme");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_extreme_correlation_beats_milder_rules() {
        let (throttle, dir) = temp_throttle();
        let map = ClusterMap::from_config(&ThrottleConfig::default().clusters);
        throttle.set_correlation_source(Arc::new(
            ClusterHeuristic::new(map, 0.7, 0.4).with_pair("SOLUSDT", "BTCUSDT", 0.99),
        ));

        let positions = [open("BTCUSDT", 100.0)];
        let result =
            throttle.check_throttle("SOLUSDT", Side::Long, 1_000.0, &positions, 100_000.0);

        assert_eq!(result.reason.as_deref(), Some("extreme_correlation"));
        assert_eq!(result.reduction_factor, 0.3);
        assert!((result.throttled_size_usd - 300.0).abs() < 1e-9);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_position_count_limit_fires() {
        let (throttle, dir) = temp_throttle();
        // Ten open meme positions, each tiny so exposure rules stay quiet
        let positions: Vec<Position> = (0..10).map(|_| open("DOGEUSDT", 1.0)).collect();
        let result =
            throttle.check_throttle("PEPEUSDT", Side::Long, 100.0, &positions, 1_000_000.0);

        assert!(result.was_throttled);
        assert_eq!(result.reason.as_deref(), Some("cluster_position_limit"));
        assert_eq!(result.reduction_factor, 0.3);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_floor_raises_reduced_size() {
        // Exposure at the full limit gives factor 0.1; 1000 * 0.1 = 100 is
        // below the 200 floor, so the size comes back as exactly 200.
        let (throttle, dir) = temp_throttle();
        let positions = [open("BTCUSDT", 300.0)];
        let result =
            throttle.check_throttle("SOLUSDT", Side::Long, 1_000.0, &positions, 1_000.0);

        assert_eq!(result.reduction_factor, 0.1);
        assert_eq!(result.throttled_size_usd, 200.0);
        assert!(result.was_throttled);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_floor_not_applied_below_floor_requests() {
        let (throttle, dir) = temp_throttle();
        let positions = [open("BTCUSDT", 300.0)];
        let result =
            throttle.check_throttle("SOLUSDT", Side::Long, 100.0, &positions, 1_000.0);

        // A 100 USD request was already under the floor: plain reduction
        assert!((result.throttled_size_usd - 10.0).abs() < 1e-9);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_result_size_never_exceeds_proposal() {
        let (throttle, dir) = temp_throttle();
        let positions = [open("BTCUSDT", 500.0), open("DOGEUSDT", 200.0)];
        for proposed in [50.0, 150.0, 200.0, 250.0, 5_000.0] {
            let result =
                throttle.check_throttle("SOLUSDT", Side::Long, proposed, &positions, 2_000.0);
            assert!(result.throttled_size_usd <= proposed);
            assert!(result.throttled_size_usd > 0.0);
        }
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_stats_accumulate_and_persist() {
        let (throttle, dir) = temp_throttle();
        let positions = [open("BTCUSDT", 150.0), open("ETHUSDT", 100.0)];
        throttle.check_throttle("SOLUSDT", Side::Long, 100.0, &positions, 1_000.0);
        throttle.check_throttle("DOGEUSDT", Side::Long, 100.0, &positions, 1_000.0);

        let stats = throttle.stats();
        assert_eq!(stats.total_checks, 2);
        assert_eq!(stats.throttled_count, 1);
        assert!((stats.total_reduction_usd - 70.0).abs() < 1e-9);
        assert_eq!(stats.by_cluster.get("btc-correlated"), Some(&1));
        assert_eq!(stats.by_reason.get("cluster_exposure_high"), Some(&1));

        throttle.flush_stats().unwrap();
        let raw = std::fs::read_to_string(dir.join("throttle_stats.json")).unwrap();
        let persisted: ThrottleStats = serde_json::from_str(&raw).unwrap();
        assert_eq!(persisted, stats);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_throttled_decision_appends_audit_line() {
        let (throttle, dir) = temp_throttle();
        let positions = [open("BTCUSDT", 150.0), open("ETHUSDT", 100.0)];
        throttle.check_throttle("SOLUSDT", Side::Long, 100.0, &positions, 1_000.0);
        // Unthrottled checks do not generate audit lines
        throttle.check_throttle("DOGEUSDT", Side::Long, 100.0, &positions, 1_000.0);

        let raw = std::fs::read_to_string(dir.join("throttle_audit.jsonl")).unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 1);
        let record: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(record["symbol"], "SOLUSDT");
        assert_eq!(record["reason"], "cluster_exposure_high");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_refresh_reloads_persisted_stats() {
        let (throttle, dir) = temp_throttle();
        let positions = [open("BTCUSDT", 150.0), open("ETHUSDT", 100.0)];
        throttle.check_throttle("SOLUSDT", Side::Long, 100.0, &positions, 1_000.0);
        throttle.flush_stats().unwrap();

        // Counters advance in memory only, then refresh restores the snapshot
        throttle.check_throttle("SOLUSDT", Side::Long, 100.0, &positions, 1_000.0);
        assert_eq!(throttle.stats().total_checks, 2);

        throttle.refresh(ThrottleConfig::default());
        assert_eq!(throttle.stats().total_checks, 1);
        let _ = std::fs::remove_dir_all(&dir);
    }
}

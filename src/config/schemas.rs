/// Configuration schemas - all config structures defined once with defaults
///
/// Each struct is defined using the config_struct! macro which provides:
/// - Single-source definition (no repetition)
/// - Embedded defaults
/// - Type safety
/// - Serde support
use crate::config_struct;
use std::collections::HashMap;

// ============================================================================
// ATOMIC STORE CONFIGURATION
// ============================================================================

config_struct! {
    /// Durable JSON store configuration
    pub struct StoreConfig {
        /// Maximum time to wait for a file lock before giving up (seconds)
        lock_timeout_secs: u64 = 10,

        /// Poll interval while waiting for a contended lock (milliseconds)
        lock_poll_interval_ms: u64 = 25,

        /// Number of timestamped backups retained per state file
        backup_count: usize = 3,
    }
}

// ============================================================================
// CACHE CONFIGURATION
// ============================================================================

config_struct! {
    /// Bounded market-data cache configuration
    pub struct CacheConfig {
        /// Maximum number of entries before LRU eviction kicks in
        max_entries: usize = 500,

        /// Default TTL applied when the caller does not pass one (seconds)
        default_ttl_secs: u64 = 300,
    }
}

// ============================================================================
// RATE LIMITER CONFIGURATION
// ============================================================================

config_struct! {
    /// Rolling-window rate limit for one API venue
    pub struct RateLimitConfig {
        /// Hard ceiling of calls per rolling window
        max_calls: usize = 1200,

        /// Rolling window length (seconds)
        window_seconds: f64 = 60.0,

        /// Minimum spacing between consecutive calls (seconds)
        min_delay_seconds: f64 = 0.1,
    }
}

/// Per-venue rate limit table
///
/// The venue name is a sparse association so it stays a map; everything
/// under it is typed.
pub fn default_venues() -> HashMap<String, RateLimitConfig> {
    let mut venues = HashMap::new();
    venues.insert(
        "exchange".to_string(),
        RateLimitConfig {
            max_calls: 1200,
            window_seconds: 60.0,
            min_delay_seconds: 0.1,
        },
    );
    venues.insert(
        "market_data".to_string(),
        RateLimitConfig {
            max_calls: 120,
            window_seconds: 60.0,
            min_delay_seconds: 0.5,
        },
    );
    venues
}

config_struct! {
    /// Rate limiter section: one rolling-window limiter per venue
    pub struct RateLimiterConfig {
        venues: HashMap<String, RateLimitConfig> = default_venues(),
    }
}

// ============================================================================
// CORRELATION THROTTLE CONFIGURATION
// ============================================================================

/// Default symbol clusters assumed to move together
///
/// Symbol -> cluster stays a map lookup at the edge; unknown symbols fall
/// into the "uncorrelated" cluster.
pub fn default_clusters() -> HashMap<String, Vec<String>> {
    let mut clusters = HashMap::new();
    clusters.insert(
        "btc-correlated".to_string(),
        vec![
            "BTCUSDT".to_string(),
            "ETHUSDT".to_string(),
            "SOLUSDT".to_string(),
            "BNBUSDT".to_string(),
            "AVAXUSDT".to_string(),
        ],
    );
    clusters.insert(
        "meme".to_string(),
        vec![
            "DOGEUSDT".to_string(),
            "SHIBUSDT".to_string(),
            "PEPEUSDT".to_string(),
            "WIFUSDT".to_string(),
        ],
    );
    clusters.insert(
        "stable-alt".to_string(),
        vec![
            "XRPUSDT".to_string(),
            "ADAUSDT".to_string(),
            "LTCUSDT".to_string(),
            "DOTUSDT".to_string(),
        ],
    );
    clusters
}

config_struct! {
    /// Correlation-aware position sizing throttle configuration
    pub struct ThrottleConfig {
        /// Named clusters of symbols assumed correlated
        clusters: HashMap<String, Vec<String>> = default_clusters(),

        /// Pairwise correlation above this is treated as extreme
        extreme_correlation_threshold: f64 = 0.98,

        /// Pairwise correlation above this is treated as high
        high_correlation_threshold: f64 = 0.95,

        /// Fallback correlation for two symbols in the same cluster
        same_cluster_correlation: f64 = 0.7,

        /// Fallback correlation for symbols in different clusters
        cross_cluster_correlation: f64 = 0.4,

        /// Maximum simultaneous positions per cluster before hard reduction
        max_positions_per_cluster: usize = 10,

        /// Maximum share of portfolio value allowed in one cluster
        max_cluster_exposure_pct: f64 = 0.30,

        /// Reduced sizes are raised back to this floor (USD), never to zero
        min_position_floor_usd: f64 = 200.0,

        /// How often accumulated throttle stats are persisted (seconds)
        stats_flush_interval_secs: u64 = 300,
    }
}

// ============================================================================
// PROBATION CONFIGURATION
// ============================================================================

config_struct! {
    /// Per-symbol probation thresholds
    pub struct ProbationConfig {
        /// Window of closed trades examined when deciding entry (hours)
        lookback_hours: i64 = 48,

        /// Minimum closed trades before any probation decision
        min_trades: usize = 5,

        /// Cumulative P&L percent below this enters probation
        max_loss_pct: f64 = -2.0,

        /// Consecutive losing trades at or above this enters probation
        max_loss_count: usize = 3,

        /// Win rate below this (with >= min_trades) enters probation
        min_win_rate: f64 = 0.30,

        /// Hours that must elapse before recovery is even evaluated
        recovery_period_hours: i64 = 24,

        /// Minimum trades during probation to qualify for recovery
        recovery_min_trades: usize = 3,

        /// Win rate during probation required for recovery
        recovery_min_win_rate: f64 = 0.50,
    }
}

// ============================================================================
// HEALING OPERATOR CONFIGURATION
// ============================================================================

config_struct! {
    /// Self-healing daemon configuration
    pub struct HealingConfig {
        /// Seconds between healing cycles
        cycle_interval_secs: u64 = 60,

        /// Heartbeat files older than this are refreshed (seconds)
        heartbeat_stale_secs: u64 = 600,

        /// Status turns yellow when no cycle completed within this window (seconds)
        cycle_stale_secs: u64 = 150,

        /// Component names whose failure turns the status red.
        /// Configuration, not an enum: the monitored set is expected to grow.
        critical_components: Vec<String> = vec![
            "ledger_integrity".to_string(),
            "file_integrity".to_string(),
            "trade_execution".to_string(),
        ],
    }
}

// ============================================================================
// TOP-LEVEL CONFIGURATION
// ============================================================================

config_struct! {
    /// Complete warden configuration, one section per component
    pub struct Configs {
        store: StoreConfig = StoreConfig::default(),
        cache: CacheConfig = CacheConfig::default(),
        rate_limiter: RateLimiterConfig = RateLimiterConfig::default(),
        throttle: ThrottleConfig = ThrottleConfig::default(),
        probation: ProbationConfig = ProbationConfig::default(),
        healing: HealingConfig = HealingConfig::default(),
    }
}

//! Typed configuration with embedded defaults
//!
//! All thresholds and intervals used by the core live here as typed
//! structs (see `schemas.rs`). A TOML file can override any subset of
//! fields; everything else keeps its documented default. Validation runs
//! at load time so a bad file fails fast instead of surfacing as odd
//! behavior hours later.

mod schemas;

pub mod macros;

pub use schemas::{
    default_clusters, default_venues, CacheConfig, Configs, HealingConfig, ProbationConfig,
    RateLimitConfig, RateLimiterConfig, StoreConfig, ThrottleConfig,
};

use crate::errors::{CoreError, CoreResult};
use crate::logger::{self, LogTag};
use std::path::Path;

impl Configs {
    /// Load configuration from a TOML file, falling back to defaults
    /// when the file does not exist.
    pub fn load(path: &Path) -> CoreResult<Self> {
        if !path.exists() {
            logger::info(
                LogTag::Config,
                &format!("No config file at {}, using defaults", path.display()),
            );
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(|e| CoreError::io(path, e))?;
        let configs: Configs = toml::from_str(&raw)
            .map_err(|e| CoreError::Configuration(format!("{}: {}", path.display(), e)))?;
        configs.validate()?;

        logger::info(
            LogTag::Config,
            &format!("Loaded configuration from {}", path.display()),
        );
        Ok(configs)
    }

    /// Validate cross-field constraints that serde cannot express
    pub fn validate(&self) -> CoreResult<()> {
        for (venue, limit) in &self.rate_limiter.venues {
            if limit.max_calls == 0 {
                return Err(CoreError::Configuration(format!(
                    "rate_limiter.venues.{}: max_calls must be > 0",
                    venue
                )));
            }
            if limit.window_seconds <= 0.0 {
                return Err(CoreError::Configuration(format!(
                    "rate_limiter.venues.{}: window_seconds must be > 0",
                    venue
                )));
            }
            if limit.min_delay_seconds < 0.0 {
                return Err(CoreError::Configuration(format!(
                    "rate_limiter.venues.{}: min_delay_seconds must be >= 0",
                    venue
                )));
            }
        }

        if !(0.0..=1.0).contains(&self.throttle.max_cluster_exposure_pct) {
            return Err(CoreError::Configuration(
                "throttle.max_cluster_exposure_pct must be within [0, 1]".to_string(),
            ));
        }
        if self.throttle.high_correlation_threshold > self.throttle.extreme_correlation_threshold {
            return Err(CoreError::Configuration(
                "throttle.high_correlation_threshold must not exceed the extreme threshold"
                    .to_string(),
            ));
        }

        // A symbol in two clusters would make exposure accounting ambiguous
        let mut seen = std::collections::HashSet::new();
        for (cluster, symbols) in &self.throttle.clusters {
            for symbol in symbols {
                if !seen.insert(symbol.clone()) {
                    return Err(CoreError::Configuration(format!(
                        "symbol {} appears in more than one cluster (last: {})",
                        symbol, cluster
                    )));
                }
            }
        }

        if !(0.0..=1.0).contains(&self.probation.min_win_rate)
            || !(0.0..=1.0).contains(&self.probation.recovery_min_win_rate)
        {
            return Err(CoreError::Configuration(
                "probation win rates must be within [0, 1]".to_string(),
            ));
        }

        if self.healing.cycle_interval_secs == 0 {
            return Err(CoreError::Configuration(
                "healing.cycle_interval_secs must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

//! Top-level application context
//!
//! Every service is built once here and handed down by reference.
//! Collaborators (signal evaluation, execution, dashboards) receive the
//! context instead of reaching for process globals, so unit tests can
//! stand up a full context against a scratch directory with no state
//! leaking between them.

use crate::cache::{BoundedCache, OhlcvSeries};
use crate::config::Configs;
use crate::errors::{CoreError, CoreResult};
use crate::healing::{HealingOperator, HealingPaths, LogAlertSink};
use crate::ledger::LedgerStore;
use crate::paths;
use crate::probation::ProbationStateMachine;
use crate::rate_limiter::RateLimiters;
use crate::shutdown::Shutdown;
use crate::store::AtomicStore;
use crate::throttle::CorrelationThrottle;
use std::sync::Arc;

/// The wired service graph for one warden instance
pub struct AppContext {
    pub configs: Configs,
    pub store: AtomicStore,
    pub ledger: LedgerStore,
    pub ohlcv_cache: Arc<BoundedCache<OhlcvSeries>>,
    pub rate_limiters: RateLimiters,
    pub throttle: Arc<CorrelationThrottle>,
    pub probation: Arc<ProbationStateMachine>,
    pub healing: Arc<HealingOperator>,
}

impl AppContext {
    /// Build all services against the standard directory layout
    ///
    /// The throttle and probation self-checks are registered with the
    /// healing operator so every cycle re-validates their persisted state.
    pub fn build(configs: Configs) -> CoreResult<Self> {
        paths::ensure_all_directories().map_err(CoreError::Configuration)?;

        let store = AtomicStore::new(configs.store.clone(), paths::get_backups_directory());
        let ledger = LedgerStore::new(store.clone(), paths::get_ledger_path());
        let ohlcv_cache = Arc::new(BoundedCache::new(configs.cache.clone()));
        let rate_limiters = RateLimiters::from_config(&configs.rate_limiter);

        let throttle = Arc::new(CorrelationThrottle::new(
            configs.throttle.clone(),
            store.clone(),
            paths::get_throttle_stats_path(),
            paths::get_throttle_audit_path(),
        ));
        let probation = Arc::new(ProbationStateMachine::new(
            configs.probation.clone(),
            store.clone(),
            paths::get_probation_state_path(),
            paths::get_probation_audit_path(),
        ));

        let healing = Arc::new(HealingOperator::new(
            configs.healing.clone(),
            HealingPaths::resolve(),
            ledger.clone(),
            Arc::new(LogAlertSink),
            paths::get_healing_audit_path(),
        ));
        healing.register_component(throttle.clone());
        healing.register_component(probation.clone());

        Ok(Self {
            configs,
            store,
            ledger,
            ohlcv_cache,
            rate_limiters,
            throttle,
            probation,
            healing,
        })
    }

    /// Start the background daemons: the healing loop, the periodic
    /// throttle stats flush, and this process's own heartbeat. All stop
    /// on `shutdown`.
    pub fn start(&self, shutdown: &Shutdown) -> Vec<tokio::task::JoinHandle<()>> {
        vec![
            self.healing.spawn(shutdown.clone()),
            self.throttle.spawn_stats_flush(shutdown.clone()),
            spawn_heartbeat("warden", shutdown.clone()),
        ]
    }
}

/// Periodically touch this process's heartbeat file so the healing
/// operator (and external watchdogs) can tell a hung process from a
/// quiet one.
fn spawn_heartbeat(producer: &str, shutdown: Shutdown) -> tokio::task::JoinHandle<()> {
    let path = paths::heartbeat_path_for(producer);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = std::fs::write(&path, chrono::Utc::now().to_rfc3339()) {
                        crate::logger::warning(
                            crate::logger::LogTag::System,
                            &format!("Failed to write heartbeat {}: {}", path.display(), e),
                        );
                    }
                }
                _ = shutdown.wait() => return,
            }
        }
    })
}

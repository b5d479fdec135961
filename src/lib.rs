//! Warden: operational safety core for an always-on trading bot
//!
//! The crate provides the admission-control and self-healing layer that
//! sits between trading strategy code and the outside world:
//!
//! - [`store`] — atomic, lock-protected JSON persistence with corruption
//!   repair
//! - [`ledger`] — the durable position ledger built on the store
//! - [`cache`] — bounded TTL + LRU cache for derived market data
//! - [`rate_limiter`] — per-venue rolling-window admission for API calls
//! - [`throttle`] — correlation-aware position sizing
//! - [`probation`] — per-symbol performance circuit breaker
//! - [`healing`] — background invariant re-validation and repair
//!
//! Services are wired once into an [`context::AppContext`] and passed to
//! collaborators by reference.

pub mod arguments;
pub mod audit;
pub mod cache;
pub mod config;
pub mod context;
pub mod errors;
pub mod healing;
pub mod ledger;
pub mod logger;
pub mod paths;
pub mod probation;
pub mod rate_limiter;
pub mod shutdown;
pub mod store;
pub mod throttle;

pub use cache::{BoundedCache, CacheKey, Candle, OhlcvSeries};
pub use config::Configs;
pub use context::AppContext;
pub use errors::{CoreError, CoreResult};
pub use healing::{HealingOperator, HealthColor, HealthStatus};
pub use ledger::{ClosedPosition, Ledger, LedgerStore, Position, Side};
pub use probation::{ProbationState, ProbationStateMachine};
pub use rate_limiter::{RateLimiter, RateLimiters};
pub use store::AtomicStore;
pub use throttle::{CorrelationThrottle, ThrottleResult};

//! Rolling-window admission gate for outbound API calls
//!
//! Enforces two independent guarantees at once: a hard ceiling of
//! `max_calls` per rolling `window_seconds`, and a minimum inter-call
//! spacing of `min_delay_seconds` that smooths bursts even when under
//! the ceiling.
//!
//! `acquire` never fails — it blocks the calling task until a slot is
//! available, then records the call. One limiter instance is shared per
//! venue (via `RateLimiters`) so the ceiling is venue-global, not
//! per-caller. The window itself sits behind a plain mutex that is never
//! held across an await.

use crate::config::{RateLimitConfig, RateLimiterConfig};
use crate::logger::{self, LogTag};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Observability snapshot for one venue limiter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiterStats {
    pub calls_in_window: usize,
    pub remaining_calls: usize,
}

/// Rolling-window rate limiter for a single venue
#[derive(Debug)]
pub struct RateLimiter {
    venue: String,
    config: RateLimitConfig,
    window: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(venue: impl Into<String>, config: RateLimitConfig) -> Self {
        Self {
            venue: venue.into(),
            config,
            window: Mutex::new(VecDeque::new()),
        }
    }

    pub fn venue(&self) -> &str {
        &self.venue
    }

    /// Block until a call slot is available, then record the call
    ///
    /// Prunes timestamps older than the window, then sleeps for whichever
    /// constraint is unmet: min-delay spacing since the last call, or the
    /// oldest entry leaving a full window. Re-checks after every sleep so
    /// concurrent acquirers cannot overshoot the ceiling.
    pub async fn acquire(&self) {
        let window_len = Duration::from_secs_f64(self.config.window_seconds);
        let min_delay = Duration::from_secs_f64(self.config.min_delay_seconds);

        loop {
            let wait = {
                let mut window = self.window.lock();
                let now = Instant::now();
                Self::prune(&mut window, now, window_len);

                if let Some(last) = window.back() {
                    let since_last = now.duration_since(*last);
                    if since_last < min_delay {
                        Some(min_delay - since_last)
                    } else if window.len() >= self.config.max_calls {
                        // Sleep until the oldest call exits the rolling window
                        let oldest = window.front().copied();
                        oldest.map(|t| window_len.saturating_sub(now.duration_since(t)))
                    } else {
                        window.push_back(now);
                        None
                    }
                } else {
                    window.push_back(now);
                    None
                }
            };

            match wait {
                Some(delay) if !delay.is_zero() => {
                    logger::verbose(
                        LogTag::RateLimit,
                        &format!("{}: waiting {:?} for a call slot", self.venue, delay),
                    );
                    tokio::time::sleep(delay).await;
                }
                Some(_) => {
                    // Zero wait: the constraint cleared between checks
                    tokio::task::yield_now().await;
                }
                None => return,
            }
        }
    }

    /// Current window occupancy for observability
    pub fn stats(&self) -> RateLimiterStats {
        let window_len = Duration::from_secs_f64(self.config.window_seconds);
        let mut window = self.window.lock();
        Self::prune(&mut window, Instant::now(), window_len);
        let calls_in_window = window.len();
        RateLimiterStats {
            calls_in_window,
            remaining_calls: self.config.max_calls.saturating_sub(calls_in_window),
        }
    }

    fn prune(window: &mut VecDeque<Instant>, now: Instant, window_len: Duration) {
        while let Some(front) = window.front() {
            if now.duration_since(*front) >= window_len {
                window.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Per-venue limiter registry, built once from configuration and shared
/// by reference.
///
/// Constructor-injected by the application context so call sites never
/// reach for process-global state.
#[derive(Debug, Clone)]
pub struct RateLimiters {
    limiters: HashMap<String, Arc<RateLimiter>>,
}

impl RateLimiters {
    pub fn from_config(config: &RateLimiterConfig) -> Self {
        let limiters = config
            .venues
            .iter()
            .map(|(venue, limit)| {
                (
                    venue.clone(),
                    Arc::new(RateLimiter::new(venue.clone(), limit.clone())),
                )
            })
            .collect();
        Self { limiters }
    }

    /// The shared limiter for a venue, if configured
    pub fn get(&self, venue: &str) -> Option<Arc<RateLimiter>> {
        self.limiters.get(venue).cloned()
    }

    pub fn venues(&self) -> impl Iterator<Item = &str> {
        self.limiters.keys().map(|s| s.as_str())
    }
}

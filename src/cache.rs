//! Bounded TTL + LRU cache for expensive derived market data
//!
//! Keyed by (symbol, timeframe, limit) — the identity of one OHLCV
//! request. Values are stored behind `Arc` and handed out by reference
//! (read-only contract); `get_cloned` gives a private copy when the
//! caller needs to mutate.
//!
//! `get` sweeps expired entries before lookup so memory does not grow
//! unbounded between explicit evictions; inserting past capacity evicts
//! the least-recently-accessed entry (by last access, not insertion
//! order). One mutex guards both the entry map and the access times.

use crate::config::CacheConfig;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One OHLCV bar as fetched from the market-data venue
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// The series shape strategy code reads from the cache
pub type OhlcvSeries = Vec<Candle>;

/// Identity of one cached series
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub symbol: String,
    pub timeframe: String,
    pub limit: usize,
}

impl CacheKey {
    pub fn new(symbol: impl Into<String>, timeframe: impl Into<String>, limit: usize) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe: timeframe.into(),
            limit,
        }
    }
}

struct CacheEntry<V> {
    value: Arc<V>,
    expires_at: Instant,
    last_access: Instant,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Cache statistics snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub total: usize,
    pub valid: usize,
    pub expired: usize,
}

/// Capacity-bounded TTL cache with LRU eviction
pub struct BoundedCache<V> {
    entries: Mutex<HashMap<CacheKey, CacheEntry<V>>>,
    config: CacheConfig,
}

impl<V> BoundedCache<V> {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Look up a key, refreshing its LRU position
    ///
    /// Expired entries anywhere in the map are dropped first, so no
    /// caller ever observes a value past its TTL.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<V>> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        entries.retain(|_, entry| !entry.is_expired(now));

        let entry = entries.get_mut(key)?;
        entry.last_access = now;
        Some(Arc::clone(&entry.value))
    }

    /// Insert or refresh an entry
    ///
    /// `ttl` of None uses the configured default. When the cache is at
    /// capacity, the least-recently-accessed entry is evicted.
    pub fn set(&self, key: CacheKey, value: V, ttl: Option<Duration>) {
        let now = Instant::now();
        let ttl = ttl.unwrap_or_else(|| Duration::from_secs(self.config.default_ttl_secs));
        let mut entries = self.entries.lock();

        entries.retain(|_, entry| !entry.is_expired(now));

        if !entries.contains_key(&key) && entries.len() >= self.config.max_entries {
            let lru_key = entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_access)
                .map(|(k, _)| k.clone());
            if let Some(lru_key) = lru_key {
                entries.remove(&lru_key);
            }
        }

        entries.insert(
            key,
            CacheEntry {
                value: Arc::new(value),
                expires_at: now + ttl,
                last_access: now,
            },
        );
    }

    /// Current statistics (expired = present but past TTL, i.e. not yet swept)
    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let entries = self.entries.lock();
        let total = entries.len();
        let expired = entries
            .values()
            .filter(|entry| entry.is_expired(now))
            .count();
        CacheStats {
            total,
            valid: total - expired,
            expired,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl<V: Clone> BoundedCache<V> {
    /// Copy-on-read variant for callers that need to mutate the value
    pub fn get_cloned(&self, key: &CacheKey) -> Option<V> {
        self.get(key).map(|value| (*value).clone())
    }
}

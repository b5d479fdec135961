//! Position ledger data model and durable access
//!
//! The ledger file (`positions_futures.json`) is the single piece of
//! mutable shared state with multiple writers (execution path, healing
//! operator). Its schema is an external contract: dashboards and training
//! scripts parse the file directly, so both top-level keys are always
//! present as arrays after any successful write.

use crate::errors::CoreResult;
use crate::store::AtomicStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level keys a structurally valid ledger must carry
pub const LEDGER_KEYS: &[&str] = &["open_positions", "closed_positions"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    #[serde(rename = "LONG")]
    Long,
    #[serde(rename = "SHORT")]
    Short,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Long => write!(f, "LONG"),
            Side::Short => write!(f, "SHORT"),
        }
    }
}

/// An open futures position
///
/// The store guarantees the container's structural integrity only; field
/// validity belongs to whichever collaborator opened the position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: Side,
    pub size_usd: f64,
    pub entry_price: f64,
    pub leverage: u32,
    pub strategy: String,
    pub opened_at: DateTime<Utc>,
}

/// A closed position with exit details
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedPosition {
    pub symbol: String,
    pub side: Side,
    pub size_usd: f64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub leverage: u32,
    pub strategy: String,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    pub pnl_pct: f64,
}

/// The durable record of open/closed trading positions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ledger {
    pub open_positions: Vec<Position>,
    pub closed_positions: Vec<ClosedPosition>,
}

impl ClosedPosition {
    pub fn is_win(&self) -> bool {
        self.pnl_pct > 0.0
    }
}

/// Typed access to the ledger file through the atomic store
#[derive(Debug, Clone)]
pub struct LedgerStore {
    store: AtomicStore,
    path: PathBuf,
}

impl LedgerStore {
    pub fn new(store: AtomicStore, path: PathBuf) -> Self {
        Self { store, path }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Load the ledger, degrading to an empty one on any recoverable
    /// failure (missing file, lock timeout, unrepairable corruption).
    pub fn load(&self) -> Ledger {
        self.store.read(&self.path, LEDGER_KEYS, Ledger::default())
    }

    /// Persist a full ledger snapshot
    pub fn save(&self, ledger: &Ledger) -> CoreResult<()> {
        self.store.write(&self.path, ledger)
    }

    /// Mutate the ledger under one exclusive lock
    pub fn update<R>(&self, f: impl FnOnce(&mut Ledger) -> R) -> CoreResult<R> {
        self.store
            .with_lock(&self.path, LEDGER_KEYS, Ledger::default(), f)
    }

    /// Append an open position
    pub fn open_position(&self, position: Position) -> CoreResult<()> {
        self.update(|ledger| ledger.open_positions.push(position))
    }

    /// Move the first open position for `symbol` into closed_positions
    ///
    /// Returns the closed record, or None when no open position matched.
    pub fn close_position(
        &self,
        symbol: &str,
        exit_price: f64,
        closed_at: DateTime<Utc>,
    ) -> CoreResult<Option<ClosedPosition>> {
        self.update(|ledger| {
            let idx = ledger
                .open_positions
                .iter()
                .position(|p| p.symbol == symbol)?;
            let open = ledger.open_positions.remove(idx);

            let direction = match open.side {
                Side::Long => 1.0,
                Side::Short => -1.0,
            };
            let pnl_pct = if open.entry_price != 0.0 {
                direction * (exit_price - open.entry_price) / open.entry_price * 100.0
            } else {
                0.0
            };

            let closed = ClosedPosition {
                symbol: open.symbol,
                side: open.side,
                size_usd: open.size_usd,
                entry_price: open.entry_price,
                exit_price,
                leverage: open.leverage,
                strategy: open.strategy,
                opened_at: open.opened_at,
                closed_at,
                pnl_pct,
            };
            ledger.closed_positions.push(closed.clone());
            Some(closed)
        })
    }

    /// Closed positions for one symbol newer than the cutoff
    pub fn closed_positions_since(
        &self,
        symbol: &str,
        cutoff: DateTime<Utc>,
    ) -> Vec<ClosedPosition> {
        self.load()
            .closed_positions
            .into_iter()
            .filter(|p| p.symbol == symbol && p.closed_at >= cutoff)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use std::sync::atomic::{AtomicU64, Ordering};

    static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

    fn temp_ledger() -> (LedgerStore, PathBuf) {
        let id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir().join(format!(
            "warden_ledger_test_{}_{}",
            std::process::id(),
            id
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let store = AtomicStore::new(StoreConfig::default(), dir.join("backups"));
        let ledger = LedgerStore::new(store, dir.join("positions_futures.json"));
        (ledger, dir)
    }

    fn sample_position(symbol: &str) -> Position {
        Position {
            symbol: symbol.to_string(),
            side: Side::Long,
            size_usd: 500.0,
            entry_price: 100.0,
            leverage: 3,
            strategy: "momentum".to_string(),
            opened_at: Utc::now(),
        }
    }

    #[test]
    fn test_missing_ledger_loads_empty() {
        let (ledger, dir) = temp_ledger();
        let loaded = ledger.load();
        assert!(loaded.open_positions.is_empty());
        assert!(loaded.closed_positions.is_empty());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_schema_keys_always_present_on_disk() {
        let (ledger, dir) = temp_ledger();
        ledger.save(&Ledger::default()).unwrap();

        let raw = std::fs::read_to_string(ledger.path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert!(value["open_positions"].is_array());
        assert!(value["closed_positions"].is_array());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_open_then_close_moves_position() {
        let (ledger, dir) = temp_ledger();
        ledger.open_position(sample_position("BTCUSDT")).unwrap();

        let closed = ledger
            .close_position("BTCUSDT", 110.0, Utc::now())
            .unwrap()
            .unwrap();
        assert!((closed.pnl_pct - 10.0).abs() < 1e-9);
        assert!(closed.is_win());

        let loaded = ledger.load();
        assert!(loaded.open_positions.is_empty());
        assert_eq!(loaded.closed_positions.len(), 1);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_short_pnl_sign_flipped() {
        let (ledger, dir) = temp_ledger();
        let mut position = sample_position("ETHUSDT");
        position.side = Side::Short;
        ledger.open_position(position).unwrap();

        let closed = ledger
            .close_position("ETHUSDT", 90.0, Utc::now())
            .unwrap()
            .unwrap();
        assert!((closed.pnl_pct - 10.0).abs() < 1e-9);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_close_unknown_symbol_is_none() {
        let (ledger, dir) = temp_ledger();
        let closed = ledger.close_position("NOPEUSDT", 1.0, Utc::now()).unwrap();
        assert!(closed.is_none());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_side_serializes_to_contract_strings() {
        let json = serde_json::to_string(&Side::Long).unwrap();
        assert_eq!(json, "\"LONG\"");
        let side: Side = serde_json::from_str("\"SHORT\"").unwrap();
        assert_eq!(side, Side::Short);
    }
}

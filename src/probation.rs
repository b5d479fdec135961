//! Per-symbol probation state machine
//!
//! A circuit breaker for individual trading symbols: a symbol whose recent
//! closed trades perform badly is placed on probation, and the signal
//! admission path asks `should_block_symbol` before evaluating any new
//! trade for it. Symbols cycle ACTIVE -> PROBATION -> ACTIVE indefinitely;
//! records are never deleted, so a symbol's probation history survives
//! restarts.
//!
//! Evaluation is pure over its inputs: the caller passes the closed trades
//! and the evaluation time, so every transition rule is testable with a
//! mocked clock. Transitions persist the full book through the atomic
//! store and append one line to the probation audit trail.

use crate::audit::JsonlAudit;
use crate::config::ProbationConfig;
use crate::errors::CoreResult;
use crate::ledger::ClosedPosition;
use crate::logger::{self, LogTag};
use crate::store::AtomicStore;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Top-level keys a structurally valid probation file must carry
pub const PROBATION_STATE_KEYS: &[&str] = &["symbols"];

// ============================================================================
// RECORD TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProbationState {
    #[serde(rename = "ACTIVE")]
    Active,
    #[serde(rename = "PROBATION")]
    Probation,
}

impl std::fmt::Display for ProbationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbationState::Active => write!(f, "ACTIVE"),
            ProbationState::Probation => write!(f, "PROBATION"),
        }
    }
}

/// Performance metrics over one evaluation window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    pub trades: usize,
    pub wins: usize,
    pub win_rate: f64,
    pub cumulative_pnl_pct: f64,
    /// Losing streak counted backwards from the most recent trade
    pub consecutive_losses: usize,
}

/// Lifetime probation record for one symbol, created on first violation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbationRecord {
    pub state: ProbationState,
    pub entered_at: Option<DateTime<Utc>>,
    pub reason: Option<String>,
    pub performance_at_entry: Option<PerformanceSnapshot>,
    pub recovered_at: Option<DateTime<Utc>>,
    /// How many times this symbol has entered probation overall
    pub times_on_probation: u32,
}

/// The persisted book of per-symbol records
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbationBook {
    pub symbols: HashMap<String, ProbationRecord>,
}

/// One line in the probation audit trail
#[derive(Debug, Serialize)]
struct ProbationAuditRecord<'a> {
    timestamp: DateTime<Utc>,
    symbol: &'a str,
    from: ProbationState,
    to: ProbationState,
    reason: &'a str,
    performance: &'a PerformanceSnapshot,
}

// ============================================================================
// STATE MACHINE
// ============================================================================

/// Admission gate driven by recent per-symbol P&L
pub struct ProbationStateMachine {
    config: ProbationConfig,
    book: Mutex<ProbationBook>,
    store: AtomicStore,
    state_path: PathBuf,
    audit: JsonlAudit,
}

impl ProbationStateMachine {
    /// Build the machine, loading the persisted book from the store
    pub fn new(
        config: ProbationConfig,
        store: AtomicStore,
        state_path: PathBuf,
        audit_path: PathBuf,
    ) -> Self {
        let book = store.read(&state_path, PROBATION_STATE_KEYS, ProbationBook::default());
        Self {
            config,
            book: Mutex::new(book),
            store,
            state_path,
            audit: JsonlAudit::new(audit_path),
        }
    }

    /// Admission question for the signal path. Pure read: never evaluates
    /// or transitions.
    pub fn should_block_symbol(&self, symbol: &str) -> (bool, String) {
        let book = self.book.lock();
        match book.symbols.get(symbol) {
            Some(record) if record.state == ProbationState::Probation => {
                let reason = record
                    .reason
                    .clone()
                    .unwrap_or_else(|| "on_probation".to_string());
                (true, reason)
            }
            _ => (false, "active".to_string()),
        }
    }

    /// Current record for a symbol, if it ever entered probation
    pub fn record(&self, symbol: &str) -> Option<ProbationRecord> {
        self.book.lock().symbols.get(symbol).cloned()
    }

    /// Snapshot of the whole book (dashboard helper)
    pub fn book(&self) -> ProbationBook {
        self.book.lock().clone()
    }

    /// Evaluate one symbol against its closed trades at time `now`
    ///
    /// `closed_positions` may contain other symbols; only matching entries
    /// count. Entry looks at the lookback window, recovery at the trades
    /// closed since probation began. Returns the state after evaluation.
    pub fn evaluate(
        &self,
        symbol: &str,
        closed_positions: &[ClosedPosition],
        now: DateTime<Utc>,
    ) -> CoreResult<ProbationState> {
        let current = self
            .book
            .lock()
            .symbols
            .get(symbol)
            .map(|r| r.state)
            .unwrap_or(ProbationState::Active);

        match current {
            ProbationState::Active => self.evaluate_entry(symbol, closed_positions, now),
            ProbationState::Probation => self.evaluate_recovery(symbol, closed_positions, now),
        }
    }

    fn evaluate_entry(
        &self,
        symbol: &str,
        closed_positions: &[ClosedPosition],
        now: DateTime<Utc>,
    ) -> CoreResult<ProbationState> {
        let cutoff = now - Duration::hours(self.config.lookback_hours);
        let window: Vec<&ClosedPosition> = closed_positions
            .iter()
            .filter(|p| p.symbol == symbol && p.closed_at >= cutoff)
            .collect();

        if window.len() < self.config.min_trades {
            return Ok(ProbationState::Active);
        }

        let snapshot = Self::measure(&window);
        let mut reasons: Vec<&'static str> = Vec::new();
        if snapshot.cumulative_pnl_pct < self.config.max_loss_pct {
            reasons.push("excessive_loss");
        }
        if snapshot.consecutive_losses >= self.config.max_loss_count {
            reasons.push("consecutive_losses");
        }
        if snapshot.win_rate < self.config.min_win_rate {
            reasons.push("low_win_rate");
        }

        if reasons.is_empty() {
            return Ok(ProbationState::Active);
        }
        let reason = reasons.join(",");
        self.transition(symbol, ProbationState::Probation, &reason, snapshot, now)?;
        Ok(ProbationState::Probation)
    }

    fn evaluate_recovery(
        &self,
        symbol: &str,
        closed_positions: &[ClosedPosition],
        now: DateTime<Utc>,
    ) -> CoreResult<ProbationState> {
        let entered_at = self
            .book
            .lock()
            .symbols
            .get(symbol)
            .and_then(|r| r.entered_at);
        let Some(entered_at) = entered_at else {
            // Shape violation; the healing operator resets such records
            return Ok(ProbationState::Probation);
        };

        // Recovery is not even considered before the waiting period ends
        if now - entered_at < Duration::hours(self.config.recovery_period_hours) {
            return Ok(ProbationState::Probation);
        }

        let during: Vec<&ClosedPosition> = closed_positions
            .iter()
            .filter(|p| p.symbol == symbol && p.closed_at >= entered_at)
            .collect();
        if during.len() < self.config.recovery_min_trades {
            return Ok(ProbationState::Probation);
        }

        let snapshot = Self::measure(&during);
        if snapshot.win_rate < self.config.recovery_min_win_rate {
            return Ok(ProbationState::Probation);
        }

        self.transition(symbol, ProbationState::Active, "recovered", snapshot, now)?;
        Ok(ProbationState::Active)
    }

    fn measure(trades: &[&ClosedPosition]) -> PerformanceSnapshot {
        let mut sorted: Vec<&&ClosedPosition> = trades.iter().collect();
        sorted.sort_by_key(|p| p.closed_at);

        let wins = sorted.iter().filter(|p| p.is_win()).count();
        let cumulative_pnl_pct: f64 = sorted.iter().map(|p| p.pnl_pct).sum();
        let consecutive_losses = sorted.iter().rev().take_while(|p| !p.is_win()).count();

        PerformanceSnapshot {
            trades: sorted.len(),
            wins,
            win_rate: if sorted.is_empty() {
                0.0
            } else {
                wins as f64 / sorted.len() as f64
            },
            cumulative_pnl_pct,
            consecutive_losses,
        }
    }

    /// Apply a transition: mutate the book, persist it, audit it
    fn transition(
        &self,
        symbol: &str,
        to: ProbationState,
        reason: &str,
        snapshot: PerformanceSnapshot,
        now: DateTime<Utc>,
    ) -> CoreResult<()> {
        let (from, book_snapshot) = {
            let mut book = self.book.lock();
            let record = book
                .symbols
                .entry(symbol.to_string())
                .or_insert(ProbationRecord {
                    state: ProbationState::Active,
                    entered_at: None,
                    reason: None,
                    performance_at_entry: None,
                    recovered_at: None,
                    times_on_probation: 0,
                });
            let from = record.state;
            record.state = to;
            match to {
                ProbationState::Probation => {
                    record.entered_at = Some(now);
                    record.reason = Some(reason.to_string());
                    record.performance_at_entry = Some(snapshot.clone());
                    record.recovered_at = None;
                    record.times_on_probation += 1;
                }
                ProbationState::Active => {
                    record.recovered_at = Some(now);
                }
            }
            (from, book.clone())
        };

        self.store.write(&self.state_path, &book_snapshot)?;

        logger::info(
            LogTag::Probation,
            &format!(
                "{}: {} -> {} ({}, {} trades, win rate {:.0}%)",
                symbol,
                from,
                to,
                reason,
                snapshot.trades,
                snapshot.win_rate * 100.0
            ),
        );
        let audit_record = ProbationAuditRecord {
            timestamp: now,
            symbol,
            from,
            to,
            reason,
            performance: &snapshot,
        };
        if let Err(e) = self.audit.append(&audit_record) {
            logger::warning(
                LogTag::Probation,
                &format!("Failed to append probation audit record: {}", e),
            );
        }
        Ok(())
    }

    /// Repair hook for the healing operator
    ///
    /// A PROBATION record without an entry time can never recover; such
    /// records are reset to ACTIVE and the repaired book is persisted.
    /// Returns the symbols that were repaired.
    pub fn repair_invalid_records(&self) -> CoreResult<Vec<String>> {
        let (repaired, book_snapshot) = {
            let mut book = self.book.lock();
            let mut repaired = Vec::new();
            for (symbol, record) in book.symbols.iter_mut() {
                if record.state == ProbationState::Probation && record.entered_at.is_none() {
                    record.state = ProbationState::Active;
                    record.reason = None;
                    repaired.push(symbol.clone());
                }
            }
            if repaired.is_empty() {
                return Ok(repaired);
            }
            (repaired, book.clone())
        };

        self.store.write(&self.state_path, &book_snapshot)?;
        logger::warning(
            LogTag::Probation,
            &format!("Reset {} malformed probation record(s)", repaired.len()),
        );
        Ok(repaired)
    }
}

impl crate::healing::SelfCheck for ProbationStateMachine {
    fn name(&self) -> &str {
        "probation_records"
    }

    fn self_check(&self) -> CoreResult<crate::healing::CheckOutcome> {
        let repaired = self.repair_invalid_records()?;
        if repaired.is_empty() {
            Ok(crate::healing::CheckOutcome::ok())
        } else {
            Ok(crate::healing::CheckOutcome::healed(format!(
                "reset malformed records: {}",
                repaired.join(", ")
            )))
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

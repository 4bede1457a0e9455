use crate::error::{EngineError, Result};
use crate::event_matcher::EventKey;
use crate::quote::OutcomeSide;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};
use uuid::Uuid;

/// Amounts are tracked in whole cents so that reserve/release pairs restore
/// the exact previous figures.
fn to_cents(amount: f64) -> i64 {
    (amount * 100.0).round() as i64
}

fn from_cents(cents: i64) -> f64 {
    cents as f64 / 100.0
}

/// A confirmed, not yet settled position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommittedPosition {
    pub event_key: EventKey,
    pub outcome_side: OutcomeSide,
    pub stake: f64,
}

/// Persisted bankroll state, read at startup and written after settlements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankrollSnapshot {
    pub bankroll: f64,
    #[serde(default)]
    pub committed: Vec<CommittedPosition>,
    pub updated_at: DateTime<Utc>,
}

impl BankrollSnapshot {
    pub fn new(bankroll: f64) -> Self {
        Self {
            bankroll,
            committed: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // write-then-rename so a crash never leaves a truncated snapshot
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(self)?)?;
        std::fs::rename(tmp, path)?;
        Ok(())
    }
}

/// Consistent read of the ledger taken under one lock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExposureView {
    pub bankroll: f64,
    pub total_committed: f64,
    pub event_committed: f64,
    pub in_flight: usize,
}

impl ExposureView {
    pub fn uncommitted(&self) -> f64 {
        (self.bankroll - self.total_committed).max(0.0)
    }
}

/// Caps applied when a reservation is made, as fractions of bankroll.
#[derive(Debug, Clone, Copy)]
pub struct ExposureLimits {
    pub max_event_fraction: f64,
    pub max_aggregate_fraction: f64,
}

#[derive(Debug, Clone)]
struct Reservation {
    event_key: EventKey,
    outcome_side: OutcomeSide,
    cents: i64,
}

#[derive(Debug, Default)]
struct LedgerState {
    bankroll_cents: i64,
    total_committed_cents: i64,
    event_committed_cents: HashMap<EventKey, i64>,
    confirmed_cents: HashMap<(EventKey, OutcomeSide), i64>,
    reserved: HashMap<Uuid, Reservation>,
}

impl LedgerState {
    fn add_event(&mut self, key: &EventKey, cents: i64) {
        self.total_committed_cents += cents;
        let entry = self.event_committed_cents.entry(key.clone()).or_insert(0);
        *entry += cents;
        if *entry == 0 {
            self.event_committed_cents.remove(key);
        }
    }

    fn view(&self, key: Option<&EventKey>) -> ExposureView {
        ExposureView {
            bankroll: from_cents(self.bankroll_cents),
            total_committed: from_cents(self.total_committed_cents),
            event_committed: key
                .and_then(|k| self.event_committed_cents.get(k))
                .copied()
                .map(from_cents)
                .unwrap_or(0.0),
            in_flight: self.reserved.len(),
        }
    }
}

/// Process-wide capital accounting.
///
/// Reads are public. Mutations are crate-private and only the execution gate
/// calls them; every mutation happens under the single internal lock.
#[derive(Debug)]
pub struct ExposureLedger {
    state: Mutex<LedgerState>,
}

impl ExposureLedger {
    pub fn new(bankroll: f64) -> Self {
        Self::from_snapshot(BankrollSnapshot::new(bankroll))
    }

    pub fn from_snapshot(snapshot: BankrollSnapshot) -> Self {
        let mut state = LedgerState {
            bankroll_cents: to_cents(snapshot.bankroll),
            ..LedgerState::default()
        };
        for position in &snapshot.committed {
            let cents = to_cents(position.stake);
            *state
                .confirmed_cents
                .entry((position.event_key.clone(), position.outcome_side))
                .or_insert(0) += cents;
            state.add_event(&position.event_key, cents);
        }
        info!(
            "📒 Ledger initialised: bankroll ${:.2}, {} open positions (${:.2} committed)",
            snapshot.bankroll,
            snapshot.committed.len(),
            from_cents(state.total_committed_cents)
        );
        Self {
            state: Mutex::new(state),
        }
    }

    /// Bankroll plus confirmed positions. In-flight reservations are left out;
    /// see `ArbitrageEngine::report_unresolved_intents`.
    pub fn snapshot(&self) -> BankrollSnapshot {
        let state = self.state.lock();
        let mut committed: Vec<_> = state
            .confirmed_cents
            .iter()
            .map(|((event_key, outcome_side), cents)| CommittedPosition {
                event_key: event_key.clone(),
                outcome_side: *outcome_side,
                stake: from_cents(*cents),
            })
            .collect();
        committed.sort_by(|a, b| {
            (&a.event_key, a.outcome_side).cmp(&(&b.event_key, b.outcome_side))
        });
        BankrollSnapshot {
            bankroll: from_cents(state.bankroll_cents),
            committed,
            updated_at: Utc::now(),
        }
    }

    pub fn view(&self) -> ExposureView {
        self.state.lock().view(None)
    }

    pub fn view_for(&self, event_key: &EventKey) -> ExposureView {
        self.state.lock().view(Some(event_key))
    }

    pub fn bankroll(&self) -> f64 {
        self.view().bankroll
    }

    pub fn total_committed(&self) -> f64 {
        self.view().total_committed
    }

    pub fn event_committed(&self, event_key: &EventKey) -> f64 {
        self.view_for(event_key).event_committed
    }

    pub fn in_flight(&self) -> usize {
        self.view().in_flight
    }

    /// Reserve capital for a new intent. Caps are re-checked under the lock so
    /// concurrent reservations can never jointly breach them.
    pub(crate) fn reserve(
        &self,
        intent_id: Uuid,
        event_key: &EventKey,
        outcome_side: OutcomeSide,
        amount: f64,
        limits: ExposureLimits,
    ) -> Result<()> {
        let cents = to_cents(amount);
        let mut state = self.state.lock();

        let bankroll = state.bankroll_cents as f64;
        let event_cap = (bankroll * limits.max_event_fraction).floor() as i64;
        let aggregate_cap =
            ((bankroll * limits.max_aggregate_fraction).floor() as i64).min(state.bankroll_cents);
        let event_committed = state.event_committed_cents.get(event_key).copied().unwrap_or(0);

        let event_room = event_cap - event_committed;
        let aggregate_room = aggregate_cap - state.total_committed_cents;
        if cents <= 0 || cents > event_room || cents > aggregate_room {
            return Err(EngineError::ExposureCapExceeded {
                event_key: event_key.to_string(),
                room: from_cents(event_room.min(aggregate_room).max(0)),
                requested: amount,
            });
        }

        state.add_event(event_key, cents);
        state.reserved.insert(
            intent_id,
            Reservation {
                event_key: event_key.clone(),
                outcome_side,
                cents,
            },
        );
        Ok(())
    }

    /// Return a reservation to the pool. Returns the released amount.
    pub(crate) fn release(&self, intent_id: Uuid) -> Option<f64> {
        let mut state = self.state.lock();
        let reservation = state.reserved.remove(&intent_id)?;
        state.add_event(&reservation.event_key, -reservation.cents);
        Some(from_cents(reservation.cents))
    }

    /// Turn a reservation into a confirmed position. A partial fill commits the
    /// filled amount and releases the rest. Returns the committed amount.
    pub(crate) fn commit(&self, intent_id: Uuid, filled: f64) -> Option<f64> {
        let mut state = self.state.lock();
        let reservation = state.reserved.remove(&intent_id)?;

        let mut filled_cents = to_cents(filled).max(0);
        if filled_cents > reservation.cents {
            warn!(
                "Fill ${:.2} exceeds reservation ${:.2} for {}; committing the reservation",
                filled,
                from_cents(reservation.cents),
                intent_id
            );
            filled_cents = reservation.cents;
        }

        let unfilled = reservation.cents - filled_cents;
        if unfilled > 0 {
            state.add_event(&reservation.event_key, -unfilled);
        }
        if filled_cents > 0 {
            *state
                .confirmed_cents
                .entry((reservation.event_key.clone(), reservation.outcome_side))
                .or_insert(0) += filled_cents;
        }
        Some(from_cents(filled_cents))
    }

    /// Book a fill that arrived after its reservation was already released.
    /// Caps are not checked: the exposure exists whether we like it or not.
    pub(crate) fn commit_unreserved(
        &self,
        event_key: &EventKey,
        outcome_side: OutcomeSide,
        filled: f64,
    ) {
        let cents = to_cents(filled).max(0);
        let mut state = self.state.lock();
        state.add_event(event_key, cents);
        *state
            .confirmed_cents
            .entry((event_key.clone(), outcome_side))
            .or_insert(0) += cents;
    }

    /// Close a confirmed position. `payout` is the total returned by the
    /// venue (0 on a loss). Returns the realised profit.
    pub(crate) fn settle(
        &self,
        event_key: &EventKey,
        outcome_side: OutcomeSide,
        payout: f64,
    ) -> Option<f64> {
        let mut state = self.state.lock();
        let stake_cents = state.confirmed_cents.remove(&(event_key.clone(), outcome_side))?;
        state.add_event(event_key, -stake_cents);

        let profit_cents = to_cents(payout) - stake_cents;
        state.bankroll_cents += profit_cents;
        Some(from_cents(profit_cents))
    }
}

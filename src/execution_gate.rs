use crate::edge_calculator::EdgeAssessment;
use crate::error::{EngineError, Result};
use crate::event_matcher::EventKey;
use crate::exposure_ledger::{ExposureLedger, ExposureLimits};
use crate::quote::{OutcomeSide, RawPrice, Venue};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Lifecycle of one intent. `Idle` is the absence of a Pending intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentState {
    Pending,
    Confirmed,
    Cancelled,
    Expired,
}

impl fmt::Display for IntentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IntentState::Pending => "pending",
            IntentState::Confirmed => "confirmed",
            IntentState::Cancelled => "cancelled",
            IntentState::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// A proposed order handed to the execution collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderIntent {
    pub intent_id: Uuid,
    pub event_key: EventKey,
    pub venue: Venue,
    /// Canonical side (as the sportsbook phrases it).
    pub outcome_side: OutcomeSide,
    /// Side as the executing venue phrases it, e.g. `Yes` on a contract.
    pub contract_side: OutcomeSide,
    /// Executing book/exchange and its local event id.
    pub source: String,
    pub venue_event_id: String,
    pub stake_amount: f64,
    pub limit_price: RawPrice,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub filled_stake: f64,
    pub fill_price: RawPrice,
    #[serde(default)]
    pub order_id: Option<String>,
}

/// Exactly one of these is expected per emitted intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExecutionOutcome {
    Confirmed(Fill),
    Rejected(String),
    TimedOut,
}

/// Everything that can move an intent or a position after emission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GateSignal {
    Execution { intent_id: Uuid, outcome: ExecutionOutcome },
    /// Manual override or venue-side rejection outside the normal callback.
    Cancel { intent_id: Uuid, reason: String },
    /// Game resolved; `payout` is what the venue returned (0 on a loss).
    Settle {
        event_key: EventKey,
        outcome_side: OutcomeSide,
        payout: f64,
    },
}

/// Result of applying a signal.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Intent {
        intent: OrderIntent,
        to: IntentState,
        /// Committed amount for Confirmed, released amount otherwise.
        amount: f64,
    },
    Settled {
        event_key: EventKey,
        outcome_side: OutcomeSide,
        profit: f64,
    },
}

#[derive(Debug, Default)]
struct GateBook {
    pending: HashMap<(EventKey, OutcomeSide), Uuid>,
    intents: HashMap<Uuid, OrderIntent>,
    /// Intents expired locally, kept so a late fill can still be booked.
    expired: HashMap<Uuid, OrderIntent>,
}

/// Final go/no-go before an order leaves the engine, and the only writer of
/// the exposure ledger.
pub struct ExecutionGate {
    ledger: Arc<ExposureLedger>,
    limits: ExposureLimits,
    staleness_window: Duration,
    intent_timeout: Duration,
    book: Mutex<GateBook>,
}

impl ExecutionGate {
    pub fn new(
        ledger: Arc<ExposureLedger>,
        limits: ExposureLimits,
        staleness_window: Duration,
        intent_timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            limits,
            staleness_window,
            intent_timeout,
            book: Mutex::new(GateBook::default()),
        }
    }

    pub fn ledger(&self) -> &Arc<ExposureLedger> {
        &self.ledger
    }

    pub fn has_pending(&self, event_key: &EventKey, outcome_side: OutcomeSide) -> bool {
        self.book.lock().pending.contains_key(&(event_key.clone(), outcome_side))
    }

    pub fn pending_intents(&self) -> Vec<OrderIntent> {
        let mut intents: Vec<_> = self.book.lock().intents.values().cloned().collect();
        intents.sort_by_key(|i| i.created_at);
        intents
    }

    /// Idle -> Pending. Re-checks freshness at decision time, enforces one
    /// in-flight intent per (event, side) and reserves the stake, all under
    /// the gate lock.
    pub fn try_emit(
        &self,
        assessment: &EdgeAssessment,
        stake: f64,
        now: DateTime<Utc>,
    ) -> Result<OrderIntent> {
        let pair = &assessment.pair;
        let key = (pair.event_key.clone(), pair.outcome_side);
        let mut book = self.book.lock();

        if !pair.is_fresh(now, self.staleness_window) {
            return Err(EngineError::StaleData {
                event_key: pair.event_key.to_string(),
                age_secs: pair.staleness(now).num_seconds(),
                window_secs: self.staleness_window.num_seconds(),
            });
        }

        if let Some(existing) = book.pending.get(&key) {
            return Err(EngineError::DuplicateIntent {
                event_key: pair.event_key.to_string(),
                outcome_side: pair.outcome_side,
                existing: *existing,
            });
        }

        let execution = assessment.execution_quote();
        let intent = OrderIntent {
            intent_id: Uuid::new_v4(),
            event_key: pair.event_key.clone(),
            venue: assessment.execution_venue(),
            outcome_side: pair.outcome_side,
            contract_side: execution.outcome_side,
            source: execution.quote.source.clone(),
            venue_event_id: execution.quote.event_id.clone(),
            stake_amount: stake,
            limit_price: execution.quote.raw_price,
            created_at: now,
            expires_at: now + self.intent_timeout,
        };

        self.ledger
            .reserve(intent.intent_id, &intent.event_key, intent.outcome_side, stake, self.limits)?;
        book.pending.insert(key, intent.intent_id);
        book.intents.insert(intent.intent_id, intent.clone());

        info!(
            "📝 Intent {} pending: {} {} on {} ${:.2} @ {}",
            intent.intent_id,
            intent.event_key,
            intent.outcome_side,
            intent.source,
            intent.stake_amount,
            intent.limit_price
        );
        Ok(intent)
    }

    /// Move a Pending intent to a terminal state, releasing or committing its
    /// reservation.
    fn finish(
        &self,
        book: &mut GateBook,
        intent_id: Uuid,
        to: IntentState,
        filled: f64,
    ) -> Result<Transition> {
        let intent = book.intents.remove(&intent_id).ok_or(EngineError::UnknownIntent(intent_id))?;
        book.pending.remove(&(intent.event_key.clone(), intent.outcome_side));

        let amount = match to {
            IntentState::Confirmed => self.ledger.commit(intent_id, filled),
            _ => self.ledger.release(intent_id),
        }
        .unwrap_or_else(|| {
            error!("Ledger had no reservation for intent {}", intent_id);
            0.0
        });

        if to == IntentState::Expired {
            book.expired.insert(intent_id, intent.clone());
        }
        Ok(Transition::Intent { intent, to, amount })
    }

    pub fn apply(&self, signal: GateSignal) -> Result<Transition> {
        let mut book = self.book.lock();
        match signal {
            GateSignal::Execution {
                intent_id,
                outcome: ExecutionOutcome::Confirmed(fill),
            } => {
                if let Some(intent) = book.expired.remove(&intent_id) {
                    // filled after we gave up on it: the exposure is real, book it
                    error!(
                        "Late fill for expired intent {} (${:.2} on {}), booking it anyway",
                        intent_id, fill.filled_stake, intent.event_key
                    );
                    self.ledger.commit_unreserved(
                        &intent.event_key,
                        intent.outcome_side,
                        fill.filled_stake,
                    );
                    return Ok(Transition::Intent {
                        intent,
                        to: IntentState::Confirmed,
                        amount: fill.filled_stake,
                    });
                }
                let transition =
                    self.finish(&mut book, intent_id, IntentState::Confirmed, fill.filled_stake)?;
                info!(
                    "✅ Intent {} confirmed: filled ${:.2} @ {}",
                    intent_id, fill.filled_stake, fill.fill_price
                );
                Ok(transition)
            }
            GateSignal::Execution {
                intent_id,
                outcome: ExecutionOutcome::Rejected(reason),
            } => {
                let transition = self.finish(&mut book, intent_id, IntentState::Cancelled, 0.0)?;
                warn!("Intent {} rejected by venue: {}", intent_id, reason);
                Ok(transition)
            }
            GateSignal::Execution {
                intent_id,
                outcome: ExecutionOutcome::TimedOut,
            } => {
                let transition = self.finish(&mut book, intent_id, IntentState::Expired, 0.0)?;
                warn!("{}", EngineError::ExecutionTimeout { intent_id });
                Ok(transition)
            }
            GateSignal::Cancel { intent_id, reason } => {
                let transition = self.finish(&mut book, intent_id, IntentState::Cancelled, 0.0)?;
                info!("Intent {} cancelled: {}", intent_id, reason);
                Ok(transition)
            }
            GateSignal::Settle {
                event_key,
                outcome_side,
                payout,
            } => {
                let profit = self
                    .ledger
                    .settle(&event_key, outcome_side, payout)
                    .ok_or_else(|| EngineError::UnknownPosition {
                        event_key: event_key.to_string(),
                        outcome_side,
                    })?;
                info!(
                    "💰 Position settled: {} {} - Profit: ${:.2}",
                    event_key, outcome_side, profit
                );
                Ok(Transition::Settled {
                    event_key,
                    outcome_side,
                    profit,
                })
            }
        }
    }

    /// Pending -> Expired for every intent past its deadline.
    pub fn expire_overdue(&self, now: DateTime<Utc>) -> Vec<Transition> {
        let mut book = self.book.lock();
        let overdue: Vec<Uuid> = book
            .intents
            .values()
            .filter(|intent| intent.expires_at <= now)
            .map(|intent| intent.intent_id)
            .collect();

        // forget expired intents nobody has reported on for a day
        let horizon = now - Duration::days(1);
        book.expired.retain(|_, intent| intent.expires_at > horizon);

        overdue
            .into_iter()
            .filter_map(|intent_id| {
                let transition = self.finish(&mut book, intent_id, IntentState::Expired, 0.0).ok()?;
                warn!("{}", EngineError::ExecutionTimeout { intent_id });
                Some(transition)
            })
            .collect()
    }
}

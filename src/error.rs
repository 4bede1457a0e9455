use crate::quote::{OutcomeSide, Venue};
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by the decision engine.
///
/// Everything except [`EngineError::DuplicateIntent`] is local to one quote or
/// one pair and is handled by skipping it for the current tick.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid {venue} price {price}: {reason}")]
    InvalidPrice {
        venue: Venue,
        price: String,
        reason: String,
    },

    #[error("stale data for {event_key}: {age_secs}s apart/old, window is {window_secs}s")]
    StaleData {
        event_key: String,
        age_secs: i64,
        window_secs: i64,
    },

    #[error("edge {edge_fraction:.4} does not clear the minimum")]
    EdgeBelowThreshold { edge_fraction: f64 },

    #[error("edge {edge_fraction:.4} has no positive expected value at the {venue} price")]
    NoExecutableValue { edge_fraction: f64, venue: Venue },

    #[error("exposure cap exceeded for {event_key}: room {room:.2} below requested {requested:.2}")]
    ExposureCapExceeded {
        event_key: String,
        room: f64,
        requested: f64,
    },

    #[error("wager too small: {stake:.2} below minimum stake {min_stake:.2}")]
    WagerTooSmall { stake: f64, min_stake: f64 },

    #[error("duplicate intent: {event_key}/{outcome_side} already has a pending intent {existing}")]
    DuplicateIntent {
        event_key: String,
        outcome_side: OutcomeSide,
        existing: Uuid,
    },

    #[error("intent {intent_id} expired without an execution callback")]
    ExecutionTimeout { intent_id: Uuid },

    #[error("unknown or already terminal intent {0}")]
    UnknownIntent(Uuid),

    #[error("no confirmed position for {event_key}/{outcome_side}")]
    UnknownPosition {
        event_key: String,
        outcome_side: OutcomeSide,
    },

    #[error("event {0} is halted pending operator review")]
    EventHalted(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    /// Only a broken at-most-one-in-flight invariant escalates to the operator.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::DuplicateIntent { .. })
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_duplicate_intent_is_fatal() {
        let dup = EngineError::DuplicateIntent {
            event_key: "celtics|knicks|2025-01-09T00:00".into(),
            outcome_side: OutcomeSide::Home,
            existing: Uuid::new_v4(),
        };
        assert!(dup.is_fatal());

        let stale = EngineError::StaleData {
            event_key: "x".into(),
            age_secs: 1200,
            window_secs: 600,
        };
        assert!(!stale.is_fatal());
        assert!(!EngineError::ExecutionTimeout { intent_id: Uuid::new_v4() }.is_fatal());
    }
}

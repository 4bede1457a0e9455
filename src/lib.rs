// Core modules
pub mod config;
pub mod edge_calculator;
pub mod engine;
pub mod error;
pub mod event_matcher;
pub mod execution_gate;
pub mod exposure_ledger;
pub mod odds_normalizer;
pub mod paper_executor;
pub mod position_sizer;
pub mod quote;
pub mod quote_book;
pub mod wager_log;

// Re-exports
pub use config::EngineConfig;
pub use edge_calculator::{Direction, EdgeAssessment, EdgeCalculator, EdgePolicy};
pub use engine::{ArbitrageEngine, SkipReason, TickReport};
pub use error::{EngineError, Result};
pub use event_matcher::{EventKey, EventMatcher, MatchedPair, TeamAliases};
pub use execution_gate::{
    ExecutionGate, ExecutionOutcome, Fill, GateSignal, IntentState, OrderIntent, Transition,
};
pub use exposure_ledger::{BankrollSnapshot, ExposureLedger, ExposureView};
pub use odds_normalizer::OddsNormalizer;
pub use paper_executor::PaperExecutor;
pub use position_sizer::{FixedFraction, FractionalKelly, PositionSizer, SizingPolicy};
pub use quote::{EventMeta, NormalizedQuote, OddsQuote, OutcomeSide, RawPrice, Venue};
pub use quote_book::{QuoteBatch, QuoteBook, QuoteSnapshot};
pub use wager_log::{WagerLog, WagerRecord, WagerStatus};

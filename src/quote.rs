use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Venue {
    PredictionMarket,
    Sportsbook,
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Venue::PredictionMarket => write!(f, "prediction_market"),
            Venue::Sportsbook => write!(f, "sportsbook"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeSide {
    Home,
    Away,
    Over,
    Under,
    Yes,
    No,
}

impl fmt::Display for OutcomeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OutcomeSide::Home => "home",
            OutcomeSide::Away => "away",
            OutcomeSide::Over => "over",
            OutcomeSide::Under => "under",
            OutcomeSide::Yes => "yes",
            OutcomeSide::No => "no",
        };
        f.write_str(s)
    }
}

/// Venue-specific price encodings. Each tag has exactly one normalization rule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum RawPrice {
    /// Moneyline odds, e.g. -122 or +150.
    American(i32),
    /// European odds, stake included, e.g. 1.82.
    Decimal(f64),
    /// Prediction-market share price in dollars, 0 < p < 1.
    SharePrice(f64),
}

impl fmt::Display for RawPrice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawPrice::American(o) if *o > 0 => write!(f, "+{}", o),
            RawPrice::American(o) => write!(f, "{}", o),
            RawPrice::Decimal(d) => write!(f, "{:.3}", d),
            RawPrice::SharePrice(p) => write!(f, "{:.0}¢", p * 100.0),
        }
    }
}

/// Loosely structured identity of the real-world game, as each venue reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMeta {
    pub home_team: String,
    pub away_team: String,
    pub start_time: DateTime<Utc>,
}

impl EventMeta {
    pub fn new(
        home_team: impl Into<String>,
        away_team: impl Into<String>,
        start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            home_team: home_team.into(),
            away_team: away_team.into(),
            start_time,
        }
    }
}

/// A single captured price. Immutable once captured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OddsQuote {
    pub venue: Venue,
    /// Book or exchange that produced the quote (e.g. "draftkings").
    pub source: String,
    /// Venue-local identifier, not comparable across venues.
    pub event_id: String,
    pub meta: EventMeta,
    pub outcome_side: OutcomeSide,
    /// Participant a Yes/No contract refers to.
    #[serde(default)]
    pub team: Option<String>,
    /// Total or spread line; `None` for moneylines.
    #[serde(default)]
    pub line: Option<f64>,
    pub raw_price: RawPrice,
    pub observed_at: DateTime<Utc>,
}

impl OddsQuote {
    pub fn new(
        venue: Venue,
        source: impl Into<String>,
        event_id: impl Into<String>,
        meta: EventMeta,
        outcome_side: OutcomeSide,
        raw_price: RawPrice,
        observed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            venue,
            source: source.into(),
            event_id: event_id.into(),
            meta,
            outcome_side,
            team: None,
            line: None,
            raw_price,
            observed_at,
        }
    }

    pub fn with_team(mut self, team: impl Into<String>) -> Self {
        self.team = Some(team.into());
        self
    }

    pub fn with_line(mut self, line: f64) -> Self {
        self.line = Some(line);
        self
    }
}

/// Quote converted to the common probability representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedQuote {
    pub venue: Venue,
    pub outcome_side: OutcomeSide,
    /// Diagnostics only. Strictly inside (0, 1).
    pub implied_probability: f64,
    /// The figure every downstream component uses.
    pub fee_adjusted_probability: f64,
    pub observed_at: DateTime<Utc>,
    pub quote: OddsQuote,
}

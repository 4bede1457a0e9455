use crate::event_matcher::MatchedPair;
use crate::quote::{NormalizedQuote, Venue};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which venue is undervaluing the outcome, i.e. where to buy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    BuyPredictionMarket,
    BuySportsbook,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::BuyPredictionMarket => write!(f, "buy prediction market"),
            Direction::BuySportsbook => write!(f, "buy sportsbook"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeAssessment {
    pub pair: MatchedPair,
    pub direction: Direction,
    /// Signed: positive when the prediction market is the cheap side.
    pub edge_fraction: f64,
    pub passes_threshold: bool,
    /// Probability assumed to be correct. Always the sportsbook's figure.
    pub true_probability: f64,
    /// Probability implied by the price we would trade at.
    pub execution_probability: f64,
}

impl EdgeAssessment {
    pub fn execution_venue(&self) -> Venue {
        match self.direction {
            Direction::BuyPredictionMarket => Venue::PredictionMarket,
            Direction::BuySportsbook => Venue::Sportsbook,
        }
    }

    /// True when buying at the execution price has positive expected value
    /// under the sportsbook-as-truth model.
    pub fn has_positive_value(&self) -> bool {
        self.true_probability > self.execution_probability
    }

    pub fn execution_quote(&self) -> &NormalizedQuote {
        match self.direction {
            Direction::BuyPredictionMarket => &self.pair.prediction_quote,
            Direction::BuySportsbook => &self.pair.sportsbook_quote,
        }
    }
}

/// Swappable edge formula. Returns a signed fraction: positive favours buying
/// on the prediction market, negative favours the sportsbook.
pub trait EdgePolicy: Send + Sync {
    fn edge_fraction(&self, pair: &MatchedPair) -> f64;
}

/// Plain gap between fee-adjusted probabilities, sportsbook taken as truth.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProbabilityGap;

impl EdgePolicy for ProbabilityGap {
    fn edge_fraction(&self, pair: &MatchedPair) -> f64 {
        pair.disagreement()
    }
}

/// Expected profit per unit staked on the prediction market, sportsbook taken
/// as truth: `p_book / p_prediction - 1`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpectedValue;

impl EdgePolicy for ExpectedValue {
    fn edge_fraction(&self, pair: &MatchedPair) -> f64 {
        let book = pair.sportsbook_quote.fee_adjusted_probability;
        let prediction = pair.prediction_quote.fee_adjusted_probability;
        book / prediction - 1.0
    }
}

pub struct EdgeCalculator {
    min_edge_fraction: f64,
    policy: Box<dyn EdgePolicy>,
}

impl EdgeCalculator {
    pub fn new(min_edge_fraction: f64) -> Self {
        Self {
            min_edge_fraction,
            policy: Box::new(ProbabilityGap),
        }
    }

    pub fn with_policy(mut self, policy: impl EdgePolicy + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    pub fn min_edge_fraction(&self) -> f64 {
        self.min_edge_fraction
    }

    pub fn assess(&self, pair: &MatchedPair) -> EdgeAssessment {
        let edge_fraction = self.policy.edge_fraction(pair);
        let book = pair.sportsbook_quote.fee_adjusted_probability;
        let prediction = pair.prediction_quote.fee_adjusted_probability;

        // The sportsbook stays the truth either way, so buying there is priced
        // at its own probability and carries no expected value.
        let (direction, execution_probability) = if edge_fraction >= 0.0 {
            (Direction::BuyPredictionMarket, prediction)
        } else {
            (Direction::BuySportsbook, book)
        };

        EdgeAssessment {
            pair: pair.clone(),
            direction,
            edge_fraction,
            passes_threshold: edge_fraction.abs() > self.min_edge_fraction,
            true_probability: book,
            execution_probability,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VenueFees;
    use crate::event_matcher::EventKey;
    use crate::odds_normalizer::OddsNormalizer;
    use crate::quote::{EventMeta, OddsQuote, OutcomeSide, RawPrice};
    use chrono::Utc;

    fn pair(book_odds: i32, share: f64) -> MatchedPair {
        let normalizer = OddsNormalizer::new(VenueFees {
            prediction_market: 0.02,
            sportsbook: 0.0,
        });
        let meta = EventMeta::new("Celtics", "Knicks", Utc::now());
        let now = Utc::now();
        let book = OddsQuote::new(
            Venue::Sportsbook,
            "draftkings",
            "dk",
            meta.clone(),
            OutcomeSide::Home,
            RawPrice::American(book_odds),
            now,
        );
        let pm = OddsQuote::new(
            Venue::PredictionMarket,
            "polymarket",
            "pm",
            meta,
            OutcomeSide::Yes,
            RawPrice::SharePrice(share),
            now,
        )
        .with_team("Celtics");
        MatchedPair {
            event_key: EventKey {
                teams: ["celtics".into(), "knicks".into()],
                start_bucket: now,
            },
            outcome_side: OutcomeSide::Home,
            prediction_quote: normalizer.normalize(&pm).unwrap(),
            sportsbook_quote: normalizer.normalize(&book).unwrap(),
        }
    }

    #[test]
    fn cheap_prediction_market_passes() {
        let assessment = EdgeCalculator::new(0.03).assess(&pair(-122, 0.48));
        assert_eq!(assessment.direction, Direction::BuyPredictionMarket);
        assert!((assessment.edge_fraction - 0.08).abs() < 0.005);
        assert!(assessment.passes_threshold);
        assert_eq!(assessment.execution_venue(), Venue::PredictionMarket);
        assert!(assessment.true_probability > assessment.execution_probability);
    }

    #[test]
    fn expensive_prediction_market_flips_direction() {
        let assessment = EdgeCalculator::new(0.03).assess(&pair(150, 0.55));
        assert_eq!(assessment.direction, Direction::BuySportsbook);
        assert!(assessment.edge_fraction < 0.0);
        assert!(assessment.passes_threshold);
        assert_eq!(assessment.execution_quote().venue, Venue::Sportsbook);
        let book = assessment.pair.sportsbook_quote.fee_adjusted_probability;
        assert_eq!(assessment.true_probability, book);
        assert!(!assessment.has_positive_value());
    }

    #[test]
    fn small_edge_is_not_an_error() {
        let assessment = EdgeCalculator::new(0.03).assess(&pair(-110, 0.53));
        assert!(!assessment.passes_threshold);
    }

    #[test]
    fn expected_value_policy_scales_by_execution_price() {
        let gap = EdgeCalculator::new(0.03).assess(&pair(-122, 0.48));
        let ev = EdgeCalculator::new(0.03)
            .with_policy(ExpectedValue)
            .assess(&pair(-122, 0.48));
        assert_eq!(gap.direction, ev.direction);
        let expected = gap.true_probability / gap.execution_probability - 1.0;
        assert!((ev.edge_fraction - expected).abs() < 1e-12);
    }

    #[test]
    fn expected_value_keeps_sportsbook_as_truth_when_negative() {
        let ev = EdgeCalculator::new(0.03)
            .with_policy(ExpectedValue)
            .assess(&pair(150, 0.55));
        let book = ev.pair.sportsbook_quote.fee_adjusted_probability;
        let prediction = ev.pair.prediction_quote.fee_adjusted_probability;
        assert_eq!(ev.direction, Direction::BuySportsbook);
        assert!((ev.edge_fraction - (book / prediction - 1.0)).abs() < 1e-12);
        assert!(!ev.has_positive_value());
    }
}

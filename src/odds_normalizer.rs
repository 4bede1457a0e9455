use crate::config::VenueFees;
use crate::error::{EngineError, Result};
use crate::quote::{NormalizedQuote, OddsQuote, RawPrice, Venue};

/// American odds live at or beyond +/-100; anything in between has no meaning.
fn valid_american(odds: i32) -> bool {
    odds <= -100 || odds >= 100
}

/// American odds to implied probability, no vig removal.
pub fn american_to_probability(odds: i32) -> Option<f64> {
    if !valid_american(odds) {
        return None;
    }
    let odds = odds as f64;
    if odds > 0.0 {
        Some(100.0 / (odds + 100.0))
    } else {
        Some(odds.abs() / (odds.abs() + 100.0))
    }
}

pub fn american_to_decimal(odds: i32) -> Option<f64> {
    if !valid_american(odds) {
        return None;
    }
    let odds = odds as f64;
    if odds > 0.0 {
        Some(1.0 + odds / 100.0)
    } else {
        Some(1.0 + 100.0 / odds.abs())
    }
}

pub fn decimal_to_probability(decimal: f64) -> Option<f64> {
    if !decimal.is_finite() || decimal <= 1.0 {
        return None;
    }
    Some(1.0 / decimal)
}

/// Probability back to (rounded) American odds. Favorites come out negative.
pub fn probability_to_american(probability: f64) -> Option<i32> {
    if !(probability > 0.0 && probability < 1.0) {
        return None;
    }
    let odds = if probability >= 0.5 {
        -100.0 * (probability / (1.0 - probability))
    } else {
        100.0 * ((1.0 - probability) / probability)
    };
    Some(odds.round() as i32)
}

/// Converts venue price encodings into one probability scale and applies the
/// venue fee.
#[derive(Debug, Clone)]
pub struct OddsNormalizer {
    fees: VenueFees,
}

impl OddsNormalizer {
    pub fn new(fees: VenueFees) -> Self {
        Self { fees }
    }

    pub fn normalize(&self, quote: &OddsQuote) -> Result<NormalizedQuote> {
        let implied_probability = self.implied_probability(quote.venue, quote.raw_price)?;
        let fee = self.fees.for_venue(quote.venue);
        let fee_adjusted_probability = implied_probability * (1.0 - fee);

        Ok(NormalizedQuote {
            venue: quote.venue,
            outcome_side: quote.outcome_side,
            implied_probability,
            fee_adjusted_probability,
            observed_at: quote.observed_at,
            quote: quote.clone(),
        })
    }

    fn implied_probability(&self, venue: Venue, price: RawPrice) -> Result<f64> {
        let invalid = |reason: &str| EngineError::InvalidPrice {
            venue,
            price: price.to_string(),
            reason: reason.to_string(),
        };

        let probability = match (venue, price) {
            (Venue::Sportsbook, RawPrice::American(odds)) => {
                american_to_probability(odds)
                    .ok_or_else(|| invalid("american odds must be at least +/-100"))?
            }
            (Venue::Sportsbook, RawPrice::Decimal(decimal)) => {
                decimal_to_probability(decimal)
                    .ok_or_else(|| invalid("decimal odds must exceed 1.0"))?
            }
            (Venue::PredictionMarket, RawPrice::SharePrice(share)) => share,
            _ => return Err(invalid("price encoding not used by this venue")),
        };

        // Covers share prices of 0/1 and degenerate odds that round to certainty
        if !(probability > 0.0 && probability < 1.0) || !probability.is_finite() {
            return Err(invalid("implied probability must be strictly between 0 and 1"));
        }
        Ok(probability)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quote::{EventMeta, OutcomeSide};
    use chrono::Utc;

    fn quote(venue: Venue, price: RawPrice) -> OddsQuote {
        OddsQuote::new(
            venue,
            "test",
            "evt-1",
            EventMeta::new("Celtics", "Knicks", Utc::now()),
            OutcomeSide::Home,
            price,
            Utc::now(),
        )
    }

    fn normalizer(pm_fee: f64) -> OddsNormalizer {
        OddsNormalizer::new(VenueFees {
            prediction_market: pm_fee,
            sportsbook: 0.0,
        })
    }

    #[test]
    fn american_favorite_and_underdog() {
        assert!((american_to_probability(-122).unwrap() - 122.0 / 222.0).abs() < 1e-12);
        assert!((american_to_probability(150).unwrap() - 0.4).abs() < 1e-12);
        assert_eq!(american_to_probability(0), None);
        assert_eq!(american_to_probability(-100), Some(0.5));
        assert_eq!(american_to_probability(100), Some(0.5));
        for odds in [-99, -50, -1, 1, 50, 99] {
            assert_eq!(american_to_probability(odds), None);
            assert_eq!(american_to_decimal(odds), None);
        }
    }

    #[test]
    fn decimal_and_american_agree() {
        let n = normalizer(0.0);
        for odds in [-10_000, -500, -122, -101, -100, 100, 101, 150, 333, 2_500] {
            let decimal = american_to_decimal(odds).unwrap();
            let from_american = n
                .normalize(&quote(Venue::Sportsbook, RawPrice::American(odds)))
                .unwrap();
            let from_decimal = n
                .normalize(&quote(Venue::Sportsbook, RawPrice::Decimal(decimal)))
                .unwrap();
            assert!(
                (from_american.implied_probability - from_decimal.implied_probability).abs() < 1e-9,
                "odds {} disagree",
                odds
            );
        }
    }

    #[test]
    fn probability_round_trips_through_american() {
        assert_eq!(probability_to_american(0.55), Some(-122));
        assert_eq!(probability_to_american(0.4), Some(150));
        assert_eq!(probability_to_american(0.0), None);
        assert_eq!(probability_to_american(1.0), None);
    }

    #[test]
    fn share_price_is_probability_minus_fee() {
        let q = normalizer(0.02)
            .normalize(&quote(Venue::PredictionMarket, RawPrice::SharePrice(0.48)))
            .unwrap();
        assert_eq!(q.implied_probability, 0.48);
        assert!((q.fee_adjusted_probability - 0.4704).abs() < 1e-12);
    }

    #[test]
    fn rejects_out_of_domain_prices() {
        let n = normalizer(0.02);
        let bad = [
            quote(Venue::Sportsbook, RawPrice::American(0)),
            quote(Venue::Sportsbook, RawPrice::American(-50)),
            quote(Venue::Sportsbook, RawPrice::American(50)),
            quote(Venue::Sportsbook, RawPrice::American(-1)),
            quote(Venue::Sportsbook, RawPrice::American(1)),
            quote(Venue::Sportsbook, RawPrice::Decimal(1.0)),
            quote(Venue::Sportsbook, RawPrice::Decimal(0.5)),
            quote(Venue::PredictionMarket, RawPrice::SharePrice(0.0)),
            quote(Venue::PredictionMarket, RawPrice::SharePrice(1.0)),
            quote(Venue::PredictionMarket, RawPrice::SharePrice(1.2)),
            quote(Venue::PredictionMarket, RawPrice::American(-110)),
            quote(Venue::Sportsbook, RawPrice::SharePrice(0.5)),
        ];
        for q in bad {
            assert!(
                matches!(n.normalize(&q), Err(EngineError::InvalidPrice { .. })),
                "{:?} should be rejected",
                q.raw_price
            );
        }
    }

    #[test]
    fn normalized_probability_stays_open_interval() {
        let n = normalizer(0.0);
        for odds in (-100_000..=-100).step_by(997).chain((100..=100_000).step_by(997)) {
            let q = n.normalize(&quote(Venue::Sportsbook, RawPrice::American(odds))).unwrap();
            assert!(q.implied_probability > 0.0 && q.implied_probability < 1.0);
        }
    }
}

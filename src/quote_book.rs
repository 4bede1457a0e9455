use crate::error::Result;
use crate::quote::{OddsQuote, OutcomeSide, Venue};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct QuoteSlot {
    venue: Venue,
    source: String,
    event_id: String,
    outcome_side: OutcomeSide,
    team: Option<String>,
    line_tenths: Option<i64>,
}

impl QuoteSlot {
    fn of(quote: &OddsQuote) -> Self {
        Self {
            venue: quote.venue,
            source: quote.source.clone(),
            event_id: quote.event_id.clone(),
            outcome_side: quote.outcome_side,
            team: quote.team.clone(),
            line_tenths: quote.line.map(|l| (l * 10.0).round() as i64),
        }
    }
}

/// Both venues' latest quotes as of one instant.
#[derive(Debug, Clone, Default)]
pub struct QuoteSnapshot {
    pub sportsbook: Vec<OddsQuote>,
    pub prediction: Vec<OddsQuote>,
}

impl QuoteSnapshot {
    pub fn is_empty(&self) -> bool {
        self.sportsbook.is_empty() && self.prediction.is_empty()
    }
}

/// One polling tick as delivered by the scrapers. A missing venue means that
/// scraper produced nothing this tick.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuoteBatch {
    #[serde(default)]
    pub sportsbook: Option<Vec<OddsQuote>>,
    #[serde(default)]
    pub prediction: Option<Vec<OddsQuote>>,
}

impl QuoteBatch {
    /// Read a batch from a JSON file. A missing file is an empty batch.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Latest quote per (venue, source, event, selection).
///
/// Batches from both venues for a tick are applied under one lock and
/// snapshots are taken under the same lock, so a pipeline never sees one
/// venue refreshed and the other half-applied.
#[derive(Debug, Default)]
pub struct QuoteBook {
    latest: Mutex<HashMap<QuoteSlot, OddsQuote>>,
}

impl QuoteBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one polling tick. `None` or an empty batch means no update for
    /// that venue. Returns how many slots changed.
    pub fn apply_tick(
        &self,
        sportsbook: Option<Vec<OddsQuote>>,
        prediction: Option<Vec<OddsQuote>>,
    ) -> usize {
        let mut latest = self.latest.lock();
        let mut updated = 0;

        let batches = [(Venue::Sportsbook, sportsbook), (Venue::PredictionMarket, prediction)];
        for (venue, batch) in batches {
            let Some(batch) = batch.filter(|b| !b.is_empty()) else {
                debug!("No {} update this tick", venue);
                continue;
            };
            for quote in batch {
                if quote.venue != venue {
                    debug!(
                        "Ignoring {} quote {} delivered in the {} batch",
                        quote.venue, quote.event_id, venue
                    );
                    continue;
                }
                let slot = QuoteSlot::of(&quote);
                match latest.get(&slot) {
                    Some(existing) if existing.observed_at >= quote.observed_at => {}
                    _ => {
                        latest.insert(slot, quote);
                        updated += 1;
                    }
                }
            }
        }
        updated
    }

    pub fn snapshot(&self) -> QuoteSnapshot {
        let latest = self.latest.lock();
        let mut snapshot = QuoteSnapshot::default();
        for quote in latest.values() {
            match quote.venue {
                Venue::Sportsbook => snapshot.sportsbook.push(quote.clone()),
                Venue::PredictionMarket => snapshot.prediction.push(quote.clone()),
            }
        }
        snapshot
    }

    /// Drop quotes observed before `cutoff`. Returns how many were removed.
    pub fn prune(&self, cutoff: DateTime<Utc>) -> usize {
        let mut latest = self.latest.lock();
        let before = latest.len();
        latest.retain(|_, quote| quote.observed_at >= cutoff);
        before - latest.len()
    }

    pub fn len(&self) -> usize {
        self.latest.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

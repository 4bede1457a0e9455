use crate::config::TeamAlias;
use crate::quote::{NormalizedQuote, OddsQuote, OutcomeSide};
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::OnceLock;
use tracing::debug;

fn leading_time() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^\s*\d{1,2}:\d{2}\s*[ap]m\s*").expect("valid regex"))
}

fn trailing_number() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+\d+\s*$").expect("valid regex"))
}

/// Lowercase, strip scoreboard noise (tip-off time, trailing score) and
/// collapse everything that is not alphanumeric into single spaces.
pub fn normalize_name(raw: &str) -> String {
    let cleaned = leading_time().replace(raw, "");
    let cleaned = trailing_number().replace(&cleaned, "");
    cleaned
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Maps every spelling a venue might use to one canonical team name.
#[derive(Debug, Clone)]
pub struct TeamAliases {
    lookup: BTreeMap<String, String>,
    fuzzy_threshold: f64,
}

impl TeamAliases {
    pub fn new(aliases: &[TeamAlias], fuzzy_threshold: f64) -> Self {
        let mut lookup = BTreeMap::new();
        for alias in aliases {
            let canonical = normalize_name(&alias.canonical);
            for spelling in alias.aliases.iter().chain(std::iter::once(&alias.canonical)) {
                lookup.insert(normalize_name(spelling), canonical.clone());
            }
        }
        Self {
            lookup,
            fuzzy_threshold,
        }
    }

    /// Exact alias hit first, then the closest spelling above the fuzzy
    /// threshold, else the normalized name itself.
    pub fn resolve(&self, raw: &str) -> String {
        let normalized = normalize_name(raw);
        if let Some(canonical) = self.lookup.get(&normalized) {
            return canonical.clone();
        }

        let mut best: Option<(&String, f64)> = None;
        for (spelling, canonical) in &self.lookup {
            let score = strsim::jaro_winkler(&normalized, spelling);
            if score >= self.fuzzy_threshold && best.map_or(true, |(_, s)| score > s) {
                best = Some((canonical, score));
            }
        }

        match best {
            Some((canonical, score)) => {
                debug!("Fuzzy team match: '{}' -> '{}' ({:.3})", raw, canonical, score);
                canonical.clone()
            }
            None => normalized,
        }
    }
}

/// Canonical identity of a game across venues.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventKey {
    /// Canonical team names, sorted so home/away disagreements still match.
    pub teams: [String; 2],
    pub start_bucket: DateTime<Utc>,
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-vs-{}@{}",
            self.teams[0].replace(' ', "_"),
            self.teams[1].replace(' ', "_"),
            self.start_bucket.format("%Y-%m-%dT%H:%M")
        )
    }
}

/// What a quote pays out on, independent of how the venue phrases it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum Selection {
    /// Team wins (line None) or covers the line (tenths of a point).
    Team { name: String, line: Option<i64> },
    Over(i64),
    Under(i64),
}

fn line_tenths(line: f64) -> i64 {
    (line * 10.0).round() as i64
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchedPair {
    pub event_key: EventKey,
    /// Side as phrased by the sportsbook; a Yes/No contract is mapped onto it.
    pub outcome_side: OutcomeSide,
    pub prediction_quote: NormalizedQuote,
    pub sportsbook_quote: NormalizedQuote,
}

impl MatchedPair {
    pub fn oldest_observed_at(&self) -> DateTime<Utc> {
        self.prediction_quote.observed_at.min(self.sportsbook_quote.observed_at)
    }

    pub fn observed_gap(&self) -> Duration {
        (self.prediction_quote.observed_at - self.sportsbook_quote.observed_at).abs()
    }

    /// Age of the oldest leg, or the gap between legs, whichever is larger.
    pub fn staleness(&self, now: DateTime<Utc>) -> Duration {
        (now - self.oldest_observed_at()).max(self.observed_gap())
    }

    pub fn is_fresh(&self, now: DateTime<Utc>, window: Duration) -> bool {
        self.staleness(now) <= window
    }

    /// Fee-adjusted sportsbook minus prediction-market probability.
    pub fn disagreement(&self) -> f64 {
        self.sportsbook_quote.fee_adjusted_probability
            - self.prediction_quote.fee_adjusted_probability
    }
}

pub struct EventMatcher {
    aliases: TeamAliases,
    start_time_tolerance: Duration,
    staleness_window: Duration,
}

impl EventMatcher {
    pub fn new(
        aliases: TeamAliases,
        start_time_tolerance: Duration,
        staleness_window: Duration,
    ) -> Self {
        Self {
            aliases,
            start_time_tolerance,
            staleness_window,
        }
    }

    pub fn aliases(&self) -> &TeamAliases {
        &self.aliases
    }

    /// Start time rounded to the nearest tolerance bucket.
    pub fn start_bucket(&self, start: DateTime<Utc>) -> DateTime<Utc> {
        let secs = self.start_time_tolerance.num_seconds().max(1);
        let bucket = (start.timestamp() + secs / 2).div_euclid(secs) * secs;
        DateTime::<Utc>::from_timestamp(bucket, 0).unwrap_or(start)
    }

    /// The adjacent bucket on the side `start` leans towards. Two start times
    /// a minute apart can round into different buckets.
    fn neighbour_bucket(&self, start: DateTime<Utc>) -> DateTime<Utc> {
        let bucket = self.start_bucket(start);
        if start < bucket {
            bucket - self.start_time_tolerance
        } else {
            bucket + self.start_time_tolerance
        }
    }

    pub fn event_key(&self, quote: &OddsQuote) -> EventKey {
        let mut teams = [
            self.aliases.resolve(&quote.meta.home_team),
            self.aliases.resolve(&quote.meta.away_team),
        ];
        teams.sort();
        EventKey {
            teams,
            start_bucket: self.start_bucket(quote.meta.start_time),
        }
    }

    fn selection(&self, quote: &OddsQuote) -> Option<Selection> {
        let home = self.aliases.resolve(&quote.meta.home_team);
        let away = self.aliases.resolve(&quote.meta.away_team);
        let line = quote.line.map(line_tenths);

        match quote.outcome_side {
            OutcomeSide::Home => Some(Selection::Team { name: home, line }),
            OutcomeSide::Away => Some(Selection::Team { name: away, line }),
            OutcomeSide::Over => Some(Selection::Over(line?)),
            OutcomeSide::Under => Some(Selection::Under(line?)),
            OutcomeSide::Yes | OutcomeSide::No => {
                let team = self.aliases.resolve(quote.team.as_deref()?);
                let other = if team == home {
                    away
                } else if team == away {
                    home
                } else {
                    return None;
                };
                if quote.outcome_side == OutcomeSide::Yes {
                    Some(Selection::Team { name: team, line })
                } else {
                    Some(Selection::Team {
                        name: other,
                        line: line.map(|l| -l),
                    })
                }
            }
        }
    }

    fn fresh(&self, quote: &NormalizedQuote, now: DateTime<Utc>) -> bool {
        now - quote.observed_at <= self.staleness_window
    }

    /// Pair each prediction-market quote with the sportsbook quote for the same
    /// game and selection.
    ///
    /// Stateless: the returned iterator depends only on the inputs, so calling
    /// again with the same quotes (in any order) yields the same pairs. Quotes
    /// without a counterpart are dropped. When several books quote the same
    /// selection the one disagreeing most with the prediction market wins.
    pub fn match_quotes<'a>(
        &'a self,
        sportsbook_quotes: &'a [NormalizedQuote],
        prediction_quotes: &'a [NormalizedQuote],
        now: DateTime<Utc>,
    ) -> impl Iterator<Item = MatchedPair> + 'a {
        let mut book_index: BTreeMap<(EventKey, Selection), Vec<&'a NormalizedQuote>> =
            BTreeMap::new();
        for quote in sportsbook_quotes {
            if !self.fresh(quote, now) {
                debug!(
                    "Dropping stale sportsbook quote {} ({})",
                    quote.quote.event_id, quote.quote.source
                );
                continue;
            }
            match self.selection(&quote.quote) {
                Some(selection) => book_index
                    .entry((self.event_key(&quote.quote), selection))
                    .or_default()
                    .push(quote),
                None => debug!("Sportsbook quote {} has no usable selection", quote.quote.event_id),
            }
        }

        let prediction_keys: BTreeSet<(EventKey, Selection)> = prediction_quotes
            .iter()
            .filter_map(|q| {
                let key = self.event_key(&q.quote);
                let selection = self.selection(&q.quote)?;
                let neighbour = EventKey {
                    start_bucket: self.neighbour_bucket(q.quote.meta.start_time),
                    ..key.clone()
                };
                Some([(key, selection.clone()), (neighbour, selection)])
            })
            .flatten()
            .collect();
        for (event_key, _) in book_index.keys().filter(|k| !prediction_keys.contains(*k)) {
            debug!("No prediction-market counterpart for {}", event_key);
        }

        prediction_quotes.iter().filter_map(move |pm| {
            if !self.fresh(pm, now) {
                debug!(
                    "Dropping stale prediction quote {} ({})",
                    pm.quote.event_id, pm.quote.source
                );
                return None;
            }
            let event_key = self.event_key(&pm.quote);
            let Some(selection) = self.selection(&pm.quote) else {
                debug!("Prediction quote {} has no usable selection", pm.quote.event_id);
                return None;
            };
            let start = pm.quote.meta.start_time;
            let neighbour = EventKey {
                start_bucket: self.neighbour_bucket(start),
                ..event_key.clone()
            };
            let own = book_index.get(&(event_key.clone(), selection.clone()));
            let near = book_index
                .get(&(neighbour, selection))
                .into_iter()
                .flatten()
                .filter(|book| {
                    (book.quote.meta.start_time - start).abs() <= self.start_time_tolerance / 2
                });
            let candidates: Vec<&NormalizedQuote> =
                own.into_iter().flatten().chain(near).copied().collect();
            if candidates.is_empty() {
                debug!("No sportsbook counterpart for {} {}", event_key, pm.outcome_side);
                return None;
            }

            let best = candidates
                .into_iter()
                .filter(|book| (book.observed_at - pm.observed_at).abs() <= self.staleness_window)
                .max_by(|a, b| {
                    let da = (a.fee_adjusted_probability - pm.fee_adjusted_probability).abs();
                    let db = (b.fee_adjusted_probability - pm.fee_adjusted_probability).abs();
                    da.partial_cmp(&db)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        // deterministic tie-break regardless of input order
                        .then_with(|| b.quote.source.cmp(&a.quote.source))
                        .then_with(|| a.observed_at.cmp(&b.observed_at))
                })?;

            Some(MatchedPair {
                event_key: self.event_key(&best.quote),
                outcome_side: best.outcome_side,
                prediction_quote: pm.clone(),
                sportsbook_quote: best.clone(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineConfig, VenueFees};
    use crate::odds_normalizer::OddsNormalizer;
    use crate::quote::{EventMeta, RawPrice, Venue};
    use chrono::TimeZone;

    fn tip_off() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 9, 0, 30, 0).unwrap()
    }

    fn matcher() -> EventMatcher {
        let config = EngineConfig::default();
        EventMatcher::new(
            TeamAliases::new(&config.team_aliases, config.fuzzy_team_threshold),
            Duration::minutes(15),
            Duration::minutes(10),
        )
    }

    fn normalize(q: OddsQuote) -> NormalizedQuote {
        OddsNormalizer::new(VenueFees::default()).normalize(&q).unwrap()
    }

    fn book(
        source: &str,
        home: &str,
        away: &str,
        side: OutcomeSide,
        odds: i32,
        at: DateTime<Utc>,
    ) -> NormalizedQuote {
        normalize(OddsQuote::new(
            Venue::Sportsbook,
            source,
            format!("{}-{}", source, home),
            EventMeta::new(home, away, tip_off()),
            side,
            RawPrice::American(odds),
            at,
        ))
    }

    fn contract(
        team: &str,
        side: OutcomeSide,
        price: f64,
        start: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> NormalizedQuote {
        normalize(
            OddsQuote::new(
                Venue::PredictionMarket,
                "polymarket",
                "nba-nyk-bos",
                EventMeta::new("BOS", "NYK", start),
                side,
                RawPrice::SharePrice(price),
                at,
            )
            .with_team(team),
        )
    }

    #[test]
    fn normalizes_scoreboard_noise() {
        assert_eq!(normalize_name("7:30PM  BOS   Celtics 102"), "bos celtics");
        assert_eq!(normalize_name("Philadelphia 76ers"), "philadelphia 76ers");
        assert_eq!(normalize_name("  Trail-Blazers "), "trail blazers");
    }

    #[test]
    fn resolves_aliases_and_near_misses() {
        let m = matcher();
        assert_eq!(m.aliases().resolve("BOS"), "celtics");
        assert_eq!(m.aliases().resolve("Boston Celtics"), "celtics");
        assert_eq!(m.aliases().resolve("Trailblazers"), "trail blazers");
        assert_eq!(m.aliases().resolve("Harlem Globetrotters"), "harlem globetrotters");
    }

    #[test]
    fn start_times_within_tolerance_share_a_bucket() {
        let m = matcher();
        let a = m.start_bucket(tip_off());
        let b = m.start_bucket(tip_off() + Duration::minutes(4));
        let c = m.start_bucket(tip_off() - Duration::minutes(5));
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_ne!(a, m.start_bucket(tip_off() + Duration::hours(3)));
    }

    #[test]
    fn start_times_straddling_a_bucket_edge_still_match() {
        let now = tip_off() - Duration::hours(1);
        let m = matcher();
        let book_at = |start: DateTime<Utc>| {
            normalize(OddsQuote::new(
                Venue::Sportsbook,
                "draftkings",
                "dk-1",
                EventMeta::new("Celtics", "Knicks", start),
                OutcomeSide::Home,
                RawPrice::American(-122),
                now,
            ))
        };
        // 00:37 rounds down to 00:30, 00:38 rounds up to 00:45
        let books = vec![book_at(tip_off() + Duration::minutes(7))];
        let start = tip_off() + Duration::minutes(8);
        let pm = vec![contract("Celtics", OutcomeSide::Yes, 0.48, start, now)];
        assert_ne!(
            m.start_bucket(books[0].quote.meta.start_time),
            m.start_bucket(pm[0].quote.meta.start_time)
        );

        let pairs: Vec<_> = m.match_quotes(&books, &pm, now).collect();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].event_key, m.event_key(&books[0].quote));

        // same neighbouring bucket, but a quarter of an hour apart
        let far = vec![book_at(tip_off() - Duration::minutes(7))];
        assert_eq!(m.match_quotes(&far, &pm, now).count(), 0);
    }

    #[test]
    fn yes_contract_matches_team_side() {
        let now = tip_off() - Duration::hours(1);
        let m = matcher();
        let books = vec![
            book("draftkings", "Celtics", "Knicks", OutcomeSide::Home, -122, now),
            book("draftkings", "Celtics", "Knicks", OutcomeSide::Away, 102, now),
        ];
        let start = tip_off() + Duration::minutes(3);
        let pm = vec![contract("Celtics", OutcomeSide::Yes, 0.48, start, now)];

        let pairs: Vec<_> = m.match_quotes(&books, &pm, now).collect();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].outcome_side, OutcomeSide::Home);
        assert_eq!(pairs[0].sportsbook_quote.quote.raw_price, RawPrice::American(-122));
    }

    #[test]
    fn no_contract_maps_to_opponent() {
        let now = tip_off() - Duration::hours(1);
        let m = matcher();
        let books = vec![
            book("draftkings", "Celtics", "Knicks", OutcomeSide::Home, -122, now),
            book("draftkings", "Celtics", "Knicks", OutcomeSide::Away, 102, now),
        ];
        let pm = vec![contract("Celtics", OutcomeSide::No, 0.52, tip_off(), now)];

        let pairs: Vec<_> = m.match_quotes(&books, &pm, now).collect();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].outcome_side, OutcomeSide::Away);
    }

    #[test]
    fn picks_most_favorable_book_not_most_recent() {
        let now = tip_off() - Duration::hours(1);
        let m = matcher();
        let books = vec![
            book("fanduel", "Celtics", "Knicks", OutcomeSide::Home, -115, now),
            book(
                "draftkings",
                "Celtics",
                "Knicks",
                OutcomeSide::Home,
                -130,
                now - Duration::minutes(2),
            ),
        ];
        let pm = vec![contract("Celtics", OutcomeSide::Yes, 0.48, tip_off(), now)];

        let pairs: Vec<_> = m.match_quotes(&books, &pm, now).collect();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].sportsbook_quote.quote.source, "draftkings");
    }

    #[test]
    fn unmatched_and_stale_quotes_are_dropped() {
        let now = tip_off() - Duration::hours(1);
        let m = matcher();
        let books = vec![book("draftkings", "Lakers", "Heat", OutcomeSide::Home, -150, now)];
        let pm = vec![
            contract("Celtics", OutcomeSide::Yes, 0.48, tip_off(), now),
            contract("Celtics", OutcomeSide::Yes, 0.48, tip_off(), now - Duration::minutes(20)),
        ];
        assert_eq!(m.match_quotes(&books, &pm, now).count(), 0);

        let books = vec![book("draftkings", "Celtics", "Knicks", OutcomeSide::Home, -122, now)];
        let observed = now - Duration::minutes(20);
        let stale_pm = vec![contract("Celtics", OutcomeSide::Yes, 0.48, tip_off(), observed)];
        assert_eq!(m.match_quotes(&books, &stale_pm, now).count(), 0);
    }

    #[test]
    fn matching_is_order_independent_and_restartable() {
        let now = tip_off() - Duration::hours(1);
        let m = matcher();
        let mut books = vec![
            book("fanduel", "Celtics", "Knicks", OutcomeSide::Home, -115, now),
            book("draftkings", "Celtics", "Knicks", OutcomeSide::Home, -130, now),
            book("draftkings", "Celtics", "Knicks", OutcomeSide::Away, 110, now),
        ];
        let mut pm = vec![
            contract("Celtics", OutcomeSide::Yes, 0.48, tip_off(), now),
            contract("Knicks", OutcomeSide::Yes, 0.50, tip_off(), now),
        ];

        let collect = |books: &[NormalizedQuote], pm: &[NormalizedQuote]| {
            let mut keys: Vec<_> = m
                .match_quotes(books, pm, now)
                .map(|p| {
                    let source = p.sportsbook_quote.quote.source.clone();
                    (p.event_key.to_string(), p.outcome_side, source)
                })
                .collect();
            keys.sort();
            keys
        };

        let first = collect(&books, &pm);
        assert_eq!(first, collect(&books, &pm));
        books.reverse();
        pm.reverse();
        assert_eq!(first, collect(&books, &pm));
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn totals_require_same_line() {
        let now = tip_off() - Duration::hours(1);
        let m = matcher();
        let over = |line: f64| {
            normalize(
                OddsQuote::new(
                    Venue::Sportsbook,
                    "draftkings",
                    "dk-1",
                    EventMeta::new("Celtics", "Knicks", tip_off()),
                    OutcomeSide::Over,
                    RawPrice::American(-110),
                    now,
                )
                .with_line(line),
            )
        };
        let pm_over = normalize(
            OddsQuote::new(
                Venue::PredictionMarket,
                "polymarket",
                "pm-1",
                EventMeta::new("Celtics", "Knicks", tip_off()),
                OutcomeSide::Over,
                RawPrice::SharePrice(0.45),
                now,
            )
            .with_line(221.5),
        );

        assert_eq!(m.match_quotes(&[over(221.5)], std::slice::from_ref(&pm_over), now).count(), 1);
        assert_eq!(m.match_quotes(&[over(219.5)], std::slice::from_ref(&pm_over), now).count(), 0);
    }
}

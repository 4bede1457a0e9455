use crate::config::{EdgePolicyConfig, EngineConfig};
use crate::edge_calculator::{EdgeAssessment, EdgeCalculator, ExpectedValue};
use crate::error::{EngineError, Result};
use crate::event_matcher::{EventKey, EventMatcher, MatchedPair, TeamAliases};
use crate::execution_gate::{ExecutionGate, GateSignal, OrderIntent, Transition};
use crate::exposure_ledger::ExposureLedger;
use crate::odds_normalizer::OddsNormalizer;
use crate::position_sizer::PositionSizer;
use crate::quote::{NormalizedQuote, OddsQuote, OutcomeSide, RawPrice};
use crate::quote_book::{QuoteBatch, QuoteBook, QuoteSnapshot};
use crate::wager_log::{WagerLog, WagerRecord, WagerStatus};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::Mutex;
use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    BelowThreshold,
    Halted,
    /// An earlier intent for this (event, side) is still awaiting its callback.
    PendingIntent,
    /// Same prices as the last intent for this (event, side).
    RepeatQuote,
    /// Another worker is already running the pipeline for this event.
    InProgress,
    /// Sizer or gate said no.
    Refused(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Skip {
    pub event_key: EventKey,
    pub outcome_side: OutcomeSide,
    pub reason: SkipReason,
}

/// What one evaluation pass saw and did.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub quotes_in: usize,
    pub invalid_quotes: usize,
    pub stale_quotes: usize,
    pub pairs_matched: usize,
    pub assessed: usize,
    pub passing: usize,
    /// Pending intents to hand to the executor.
    pub intents: Vec<OrderIntent>,
    /// Intents created and cancelled straight away in dry-run mode.
    pub dry_run_intents: Vec<OrderIntent>,
    pub skips: Vec<Skip>,
    pub halted: Vec<EventKey>,
}

impl TickReport {
    fn merge(&mut self, other: TickReport) {
        self.quotes_in += other.quotes_in;
        self.invalid_quotes += other.invalid_quotes;
        self.stale_quotes += other.stale_quotes;
        self.pairs_matched += other.pairs_matched;
        self.assessed += other.assessed;
        self.passing += other.passing;
        self.intents.extend(other.intents);
        self.dry_run_intents.extend(other.dry_run_intents);
        self.skips.extend(other.skips);
        self.halted.extend(other.halted);
    }

    fn skip(&mut self, event_key: &EventKey, outcome_side: OutcomeSide, reason: SkipReason) {
        self.skips.push(Skip {
            event_key: event_key.clone(),
            outcome_side,
            reason,
        });
    }

    pub fn skipped(&self, reason: &SkipReason) -> usize {
        self.skips.iter().filter(|s| &s.reason == reason).count()
    }
}

type QuotedPrices = (RawPrice, RawPrice);

/// Orders assessments by |edge|, then by quote identity so equal edges resolve
/// the same way whatever order the pairs arrived in.
fn wider_edge(a: &EdgeAssessment, b: &EdgeAssessment) -> Ordering {
    let identity = |x: &EdgeAssessment| {
        let (pm, book) = (&x.pair.prediction_quote.quote, &x.pair.sportsbook_quote.quote);
        (
            Reverse((pm.source.clone(), pm.event_id.clone())),
            Reverse((book.source.clone(), book.event_id.clone())),
        )
    };
    a.edge_fraction
        .abs()
        .total_cmp(&b.edge_fraction.abs())
        .then_with(|| identity(a).cmp(&identity(b)))
}

/// Marks an event as being evaluated; released on drop.
struct EventClaim<'a> {
    claims: &'a Mutex<HashSet<EventKey>>,
    event_key: EventKey,
}

impl<'a> EventClaim<'a> {
    fn acquire(claims: &'a Mutex<HashSet<EventKey>>, event_key: &EventKey) -> Option<Self> {
        if !claims.lock().insert(event_key.clone()) {
            return None;
        }
        Some(Self {
            claims,
            event_key: event_key.clone(),
        })
    }
}

impl Drop for EventClaim<'_> {
    fn drop(&mut self) {
        self.claims.lock().remove(&self.event_key);
    }
}

/// Runs the normalize -> match -> assess -> size -> gate pipeline over quote
/// snapshots and owns the bookkeeping around it.
pub struct ArbitrageEngine {
    config: EngineConfig,
    normalizer: OddsNormalizer,
    matcher: EventMatcher,
    calculator: EdgeCalculator,
    sizer: PositionSizer,
    gate: Arc<ExecutionGate>,
    quotes: QuoteBook,
    halted: Mutex<BTreeSet<EventKey>>,
    in_progress: Mutex<HashSet<EventKey>>,
    last_quoted: Mutex<HashMap<(String, OutcomeSide), QuotedPrices>>,
    wager_log: Option<WagerLog>,
    bankroll_path: Option<PathBuf>,
}

impl ArbitrageEngine {
    pub fn new(config: EngineConfig, ledger: Arc<ExposureLedger>) -> Self {
        let normalizer = OddsNormalizer::new(config.venue_fees.clone());
        let aliases = TeamAliases::new(&config.team_aliases, config.fuzzy_team_threshold);
        let matcher =
            EventMatcher::new(aliases, config.start_time_tolerance(), config.staleness_window());
        let calculator = match config.edge_policy {
            EdgePolicyConfig::ProbabilityGap => EdgeCalculator::new(config.min_edge_fraction),
            EdgePolicyConfig::ExpectedValue => {
                EdgeCalculator::new(config.min_edge_fraction).with_policy(ExpectedValue)
            }
        };
        let sizer = PositionSizer::from_config(&config);
        let gate = Arc::new(ExecutionGate::new(
            ledger,
            sizer.bankroll_config().limits(),
            config.staleness_window(),
            config.intent_timeout(),
        ));

        Self {
            config,
            normalizer,
            matcher,
            calculator,
            sizer,
            gate,
            quotes: QuoteBook::new(),
            halted: Mutex::new(BTreeSet::new()),
            in_progress: Mutex::new(HashSet::new()),
            last_quoted: Mutex::new(HashMap::new()),
            wager_log: None,
            bankroll_path: None,
        }
    }

    /// Journal intents to `log`. Prices already in the journal seed the
    /// repeat filter, so a restart does not re-fire the last wagers.
    pub fn with_wager_log(mut self, log: WagerLog) -> Self {
        match WagerLog::latest_quotes(log.path()) {
            Ok(latest) => {
                debug!(
                    "Seeded repeat filter with {} entries from {}",
                    latest.len(),
                    log.path().display()
                );
                self.last_quoted = Mutex::new(latest);
            }
            Err(e) => warn!("Could not read wager log {}: {}", log.path().display(), e),
        }
        self.wager_log = Some(log);
        self
    }

    /// Write the bankroll snapshot to `path` after settlements and on shutdown.
    pub fn with_bankroll_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.bankroll_path = Some(path.into());
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn gate(&self) -> &Arc<ExecutionGate> {
        &self.gate
    }

    pub fn ledger(&self) -> &Arc<ExposureLedger> {
        self.gate.ledger()
    }

    pub fn quote_book(&self) -> &QuoteBook {
        &self.quotes
    }

    pub fn is_halted(&self, event_key: &EventKey) -> bool {
        self.halted.lock().contains(event_key)
    }

    pub fn halted_events(&self) -> Vec<EventKey> {
        self.halted.lock().iter().cloned().collect()
    }

    /// Stop trading `event_key` until [`resume`](Self::resume) is called.
    pub fn halt(&self, event_key: &EventKey) {
        self.halted.lock().insert(event_key.clone());
    }

    /// Returns false if the event was not halted.
    pub fn resume(&self, event_key: &EventKey) -> bool {
        let resumed = self.halted.lock().remove(event_key);
        if resumed {
            info!("▶️ Trading resumed for {}", event_key);
        }
        resumed
    }

    /// Apply one polling tick to the quote book.
    pub fn ingest(&self, batch: QuoteBatch) -> usize {
        self.quotes.apply_tick(batch.sportsbook, batch.prediction)
    }

    fn normalize_all(
        &self,
        quotes: &[OddsQuote],
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) -> Vec<NormalizedQuote> {
        let window = self.config.staleness_window();
        quotes
            .iter()
            .filter_map(|quote| match self.normalizer.normalize(quote) {
                Ok(normalized) => {
                    if now - normalized.observed_at > window {
                        report.stale_quotes += 1;
                    }
                    Some(normalized)
                }
                Err(e) => {
                    warn!("Dropping quote {} from {}: {}", quote.event_id, quote.source, e);
                    report.invalid_quotes += 1;
                    None
                }
            })
            .collect()
    }

    /// Normalize and match a snapshot, grouping the pairs by event.
    fn prepare(
        &self,
        snapshot: &QuoteSnapshot,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) -> BTreeMap<EventKey, Vec<MatchedPair>> {
        report.quotes_in = snapshot.sportsbook.len() + snapshot.prediction.len();
        let sportsbook = self.normalize_all(&snapshot.sportsbook, now, report);
        let prediction = self.normalize_all(&snapshot.prediction, now, report);

        let mut by_event: BTreeMap<EventKey, Vec<MatchedPair>> = BTreeMap::new();
        for pair in self.matcher.match_quotes(&sportsbook, &prediction, now) {
            report.pairs_matched += 1;
            by_event.entry(pair.event_key.clone()).or_default().push(pair);
        }
        by_event
    }

    /// Run the decision pipeline for one event's pairs. Failures stay local
    /// to the event.
    pub fn evaluate_event(
        &self,
        event_key: EventKey,
        pairs: Vec<MatchedPair>,
        now: DateTime<Utc>,
    ) -> TickReport {
        let mut report = TickReport::default();
        if self.is_halted(&event_key) {
            debug!("{}", EngineError::EventHalted(event_key.to_string()));
            for pair in &pairs {
                report.skip(&event_key, pair.outcome_side, SkipReason::Halted);
            }
            return report;
        }

        // one worker per event; overlapping ticks back off instead of racing the gate
        let Some(_claim) = EventClaim::acquire(&self.in_progress, &event_key) else {
            debug!("{} is already being evaluated, skipping", event_key);
            for pair in &pairs {
                report.skip(&event_key, pair.outcome_side, SkipReason::InProgress);
            }
            return report;
        };

        // several contracts can land on the same side; trade the widest edge
        let mut best: BTreeMap<OutcomeSide, EdgeAssessment> = BTreeMap::new();
        for pair in &pairs {
            let assessment = self.calculator.assess(pair);
            report.assessed += 1;
            match best.get(&pair.outcome_side) {
                Some(existing) if wider_edge(existing, &assessment) != Ordering::Less => {}
                _ => {
                    best.insert(pair.outcome_side, assessment);
                }
            }
        }

        for (side, assessment) in best {
            if !assessment.passes_threshold {
                report.skip(&event_key, side, SkipReason::BelowThreshold);
                continue;
            }
            report.passing += 1;

            if self.gate.has_pending(&event_key, side) {
                report.skip(&event_key, side, SkipReason::PendingIntent);
                continue;
            }

            let repeat_key = (event_key.to_string(), side);
            let quoted = (
                assessment.pair.sportsbook_quote.quote.raw_price,
                assessment.pair.prediction_quote.quote.raw_price,
            );
            if self.last_quoted.lock().get(&repeat_key) == Some(&quoted) {
                debug!("Same prices as last wager on {} {}, skipping", event_key, side);
                report.skip(&event_key, side, SkipReason::RepeatQuote);
                continue;
            }

            let stake = match self.sizer.try_size(&assessment, self.gate.ledger()) {
                Ok(stake) => stake,
                Err(e) => {
                    debug!("No stake for {} {}: {}", event_key, side, e);
                    report.skip(&event_key, side, SkipReason::Refused(e.to_string()));
                    continue;
                }
            };

            match self.gate.try_emit(&assessment, stake, now) {
                Ok(intent) => {
                    self.last_quoted.lock().insert(repeat_key, quoted);
                    info!(
                        "🚨 Arbitrage Opportunity: {} {} - Edge: {:.2}% ({}), Stake: ${:.2}",
                        event_key,
                        side,
                        assessment.edge_fraction * 100.0,
                        assessment.direction,
                        stake
                    );
                    let status = if self.config.dry_run {
                        WagerStatus::DryRun
                    } else {
                        WagerStatus::Pending
                    };
                    self.journal(WagerRecord::new(&intent, status).with_edge(
                        assessment.edge_fraction,
                        quoted.0,
                        quoted.1,
                    ));
                    if self.config.dry_run {
                        let cancel = GateSignal::Cancel {
                            intent_id: intent.intent_id,
                            reason: "dry run".into(),
                        };
                        if let Err(e) = self.gate.apply(cancel) {
                            error!("Failed to cancel dry-run intent {}: {}", intent.intent_id, e);
                        }
                        report.dry_run_intents.push(intent);
                    } else {
                        report.intents.push(intent);
                    }
                }
                Err(e) if e.is_fatal() => {
                    self.halt(&event_key);
                    error!(
                        "🚨 OPERATOR ALERT: {} - trading halted for {} until resumed",
                        e, event_key
                    );
                    report.halted.push(event_key.clone());
                    break;
                }
                Err(e) => {
                    debug!("Gate refused {} {}: {}", event_key, side, e);
                    report.skip(&event_key, side, SkipReason::Refused(e.to_string()));
                }
            }
        }
        report
    }

    /// Evaluate a snapshot one event at a time.
    pub fn evaluate(&self, snapshot: &QuoteSnapshot, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();
        for (event_key, pairs) in self.prepare(snapshot, now, &mut report) {
            let event_report = self.evaluate_event(event_key, pairs, now);
            report.merge(event_report);
        }
        report
    }

    /// Evaluate a snapshot with one task per event.
    pub async fn evaluate_concurrently(
        self: &Arc<Self>,
        snapshot: &QuoteSnapshot,
        now: DateTime<Utc>,
    ) -> TickReport {
        let mut report = TickReport::default();
        let tasks = self.prepare(snapshot, now, &mut report).into_iter().map(|(event_key, pairs)| {
            let engine = Arc::clone(self);
            tokio::spawn(async move { engine.evaluate_event(event_key, pairs, now) })
        });

        for result in join_all(tasks).await {
            match result {
                Ok(event_report) => report.merge(event_report),
                Err(e) => error!("Event pipeline task failed: {}", e),
            }
        }
        report
    }

    /// Feed an execution callback, cancellation or settlement to the gate.
    pub fn apply_signal(&self, signal: GateSignal) -> Result<Transition> {
        let transition = self.gate.apply(signal)?;
        match &transition {
            Transition::Intent { intent, to, amount } => {
                let detail = format!("{} ${:.2}", to, amount);
                self.journal(WagerRecord::new(intent, (*to).into()).with_detail(detail));
            }
            Transition::Settled { .. } => {
                if let Err(e) = self.persist_bankroll() {
                    error!("Failed to save bankroll: {}", e);
                }
            }
        }
        Ok(transition)
    }

    /// Expire every Pending intent past its deadline.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> Vec<Transition> {
        let expired = self.gate.expire_overdue(now);
        for transition in &expired {
            if let Transition::Intent { intent, .. } = transition {
                self.journal(WagerRecord::new(intent, WagerStatus::Expired));
            }
        }
        expired
    }

    /// Pending intents are not part of the bankroll snapshot. List each one so
    /// a fill arriving after a restart can be reconciled by hand.
    pub fn report_unresolved_intents(&self) -> Vec<OrderIntent> {
        let pending = self.gate.pending_intents();
        for intent in &pending {
            warn!(
                "⚠️ Unresolved intent {} at shutdown: {} {} on {} ({}) ${:.2} @ {}",
                intent.intent_id,
                intent.event_key,
                intent.outcome_side,
                intent.source,
                intent.venue_event_id,
                intent.stake_amount,
                intent.limit_price
            );
        }
        pending
    }

    pub fn persist_bankroll(&self) -> Result<()> {
        if let Some(path) = &self.bankroll_path {
            self.ledger().snapshot().save(path)?;
            debug!("Bankroll saved to {}", path.display());
        }
        Ok(())
    }

    fn journal(&self, record: WagerRecord) {
        if let Some(log) = &self.wager_log {
            if let Err(e) = log.append(&record) {
                error!("Failed to journal intent {}: {}", record.intent_id, e);
            }
        }
    }

    fn log_report(&self, report: &TickReport, updated: usize) {
        let emitted = report.intents.len() + report.dry_run_intents.len();
        let summary = format!(
            "{} quotes ({} new, {} invalid, {} stale), {} pairs, {} passing, {} intents, {} skips",
            report.quotes_in,
            updated,
            report.invalid_quotes,
            report.stale_quotes,
            report.pairs_matched,
            report.passing,
            emitted,
            report.skips.len()
        );
        if emitted > 0 {
            info!("📊 Tick: {}", summary);
        } else {
            debug!("Tick: {}", summary);
        }
        let view = self.ledger().view();
        debug!(
            "Exposure: ${:.2} of ${:.2} committed, {} in flight",
            view.total_committed, view.bankroll, view.in_flight
        );
    }

    /// Main loop: poll quotes, sweep expiries and apply gate signals until
    /// `shutdown` resolves. Pending intents go out on `intents`.
    pub async fn run<F, Fut, S>(
        self: Arc<Self>,
        fetch_quotes: F,
        intents: mpsc::Sender<OrderIntent>,
        mut signals: mpsc::Receiver<GateSignal>,
        shutdown: S,
    ) -> Result<()>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = QuoteBatch>,
        S: Future<Output = ()>,
    {
        info!(
            "Starting engine (poll: {:?}, expiry sweep: {:?}, dry run: {})",
            self.config.poll_interval(),
            self.config.expiry_sweep_interval(),
            self.config.dry_run
        );
        let mut poll_interval = time::interval(self.config.poll_interval());
        let mut sweep_interval = time::interval(self.config.expiry_sweep_interval());
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = poll_interval.tick() => {
                    let updated = self.ingest(fetch_quotes().await);
                    let now = Utc::now();
                    self.quotes.prune(now - self.config.staleness_window());

                    let snapshot = self.quotes.snapshot();
                    let report = self.evaluate_concurrently(&snapshot, now).await;
                    self.log_report(&report, updated);

                    for intent in report.intents {
                        let intent_id = intent.intent_id;
                        if intents.send(intent).await.is_err() {
                            error!("Executor is gone, cancelling intent {}", intent_id);
                            let cancel = GateSignal::Cancel {
                                intent_id,
                                reason: "executor unavailable".into(),
                            };
                            if let Err(e) = self.apply_signal(cancel) {
                                error!("Failed to cancel intent {}: {}", intent_id, e);
                            }
                        }
                    }
                }
                _ = sweep_interval.tick() => {
                    self.sweep_expired(Utc::now());
                }
                Some(signal) = signals.recv() => {
                    if let Err(e) = self.apply_signal(signal) {
                        warn!("Ignoring gate signal: {}", e);
                    }
                }
                _ = &mut shutdown => {
                    let unresolved = self.report_unresolved_intents();
                    info!("🛑 Shutting down, {} intents still pending", unresolved.len());
                    self.persist_bankroll()?;
                    return Ok(());
                }
            }
        }
    }
}

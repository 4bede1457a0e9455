use crate::execution_gate::{ExecutionOutcome, Fill, GateSignal, OrderIntent};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Execution collaborator that never touches a venue. Every intent is filled
/// at its limit price, optionally only in part.
#[derive(Debug, Clone)]
pub struct PaperExecutor {
    fill_ratio: f64,
    latency: Duration,
}

impl Default for PaperExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl PaperExecutor {
    pub fn new() -> Self {
        Self {
            fill_ratio: 1.0,
            latency: Duration::ZERO,
        }
    }

    /// Fraction of each stake that gets filled. Zero rejects every intent.
    pub fn with_fill_ratio(mut self, ratio: f64) -> Self {
        self.fill_ratio = ratio.clamp(0.0, 1.0);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn execute(&self, intent: &OrderIntent) -> GateSignal {
        let filled_stake = (intent.stake_amount * self.fill_ratio * 100.0).floor() / 100.0;
        let outcome = if filled_stake > 0.0 {
            info!(
                "Placing paper order on {}: {} {} @ {} (amount: ${:.2})",
                intent.source,
                intent.venue_event_id,
                intent.contract_side,
                intent.limit_price,
                filled_stake
            );
            ExecutionOutcome::Confirmed(Fill {
                filled_stake,
                fill_price: intent.limit_price,
                order_id: Some(format!("paper-{}", intent.intent_id.simple())),
            })
        } else {
            ExecutionOutcome::Rejected("no paper liquidity".into())
        };
        GateSignal::Execution {
            intent_id: intent.intent_id,
            outcome,
        }
    }

    /// Consume intents until the engine hangs up, answering each on `signals`.
    pub async fn run(
        self,
        mut intents: mpsc::Receiver<OrderIntent>,
        signals: mpsc::Sender<GateSignal>,
    ) {
        while let Some(intent) = intents.recv().await {
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            if signals.send(self.execute(&intent)).await.is_err() {
                warn!("Engine stopped listening, dropping paper fill for {}", intent.intent_id);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_matcher::EventKey;
    use crate::quote::{OutcomeSide, RawPrice, Venue};
    use chrono::Utc;
    use uuid::Uuid;

    fn intent(stake: f64) -> OrderIntent {
        let now = Utc::now();
        OrderIntent {
            intent_id: Uuid::new_v4(),
            event_key: EventKey {
                teams: ["celtics".into(), "knicks".into()],
                start_bucket: now,
            },
            venue: Venue::PredictionMarket,
            outcome_side: OutcomeSide::Home,
            contract_side: OutcomeSide::Yes,
            source: "polymarket".into(),
            venue_event_id: "nba-nyk-bos".into(),
            stake_amount: stake,
            limit_price: RawPrice::SharePrice(0.48),
            created_at: now,
            expires_at: now + chrono::Duration::seconds(30),
        }
    }

    #[test]
    fn fills_at_limit_price() {
        let intent = intent(30.0);
        match PaperExecutor::new().with_fill_ratio(0.5).execute(&intent) {
            GateSignal::Execution {
                outcome: ExecutionOutcome::Confirmed(fill),
                ..
            } => {
                assert_eq!(fill.filled_stake, 15.0);
                assert_eq!(fill.fill_price, RawPrice::SharePrice(0.48));
            }
            other => panic!("unexpected signal {:?}", other),
        }
    }

    #[test]
    fn zero_fill_ratio_rejects() {
        let signal = PaperExecutor::new().with_fill_ratio(0.0).execute(&intent(10.0));
        assert!(matches!(
            signal,
            GateSignal::Execution {
                outcome: ExecutionOutcome::Rejected(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn answers_every_intent() {
        let (intent_tx, intent_rx) = mpsc::channel(8);
        let (signal_tx, mut signal_rx) = mpsc::channel(8);
        let handle = tokio::spawn(PaperExecutor::new().run(intent_rx, signal_tx));

        let sent = intent(10.0);
        intent_tx.send(sent.clone()).await.unwrap();
        drop(intent_tx);

        match signal_rx.recv().await.unwrap() {
            GateSignal::Execution { intent_id, .. } => assert_eq!(intent_id, sent.intent_id),
            other => panic!("unexpected signal {:?}", other),
        }
        handle.await.unwrap();
        assert!(signal_rx.recv().await.is_none());
    }
}

use crate::config::{EngineConfig, SizingPolicyConfig};
use crate::edge_calculator::EdgeAssessment;
use crate::error::{EngineError, Result};
use crate::exposure_ledger::{ExposureLedger, ExposureLimits};
use tracing::debug;

/// Full Kelly fraction for win probability `p` and net odds `b`
/// (profit per unit staked). Never negative.
pub fn kelly_criterion(p: f64, b: f64) -> f64 {
    if b <= 0.0 {
        return 0.0;
    }
    (p - (1.0 - p) / b).max(0.0)
}

/// Swappable sizing rule: fraction of bankroll to stake before caps.
pub trait SizingPolicy: Send + Sync {
    fn fraction(&self, assessment: &EdgeAssessment) -> f64;
}

/// Kelly on the execution price, scaled down to bound model error.
#[derive(Debug, Clone, Copy)]
pub struct FractionalKelly {
    pub multiplier: f64,
}

impl SizingPolicy for FractionalKelly {
    fn fraction(&self, assessment: &EdgeAssessment) -> f64 {
        let price = assessment.execution_probability;
        let net_odds = (1.0 - price) / price;
        kelly_criterion(assessment.true_probability, net_odds) * self.multiplier
    }
}

/// Same fraction for every passing edge.
#[derive(Debug, Clone, Copy)]
pub struct FixedFraction {
    pub fraction: f64,
}

impl SizingPolicy for FixedFraction {
    fn fraction(&self, _assessment: &EdgeAssessment) -> f64 {
        self.fraction
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BankrollConfig {
    pub max_stake_fraction_per_event: f64,
    pub max_aggregate_exposure_fraction: f64,
    pub min_stake: f64,
}

impl BankrollConfig {
    pub fn limits(&self) -> ExposureLimits {
        ExposureLimits {
            max_event_fraction: self.max_stake_fraction_per_event,
            max_aggregate_fraction: self.max_aggregate_exposure_fraction,
        }
    }
}

pub struct PositionSizer {
    config: BankrollConfig,
    policy: Box<dyn SizingPolicy>,
}

impl PositionSizer {
    pub fn new(config: BankrollConfig) -> Self {
        Self {
            config,
            policy: Box::new(FractionalKelly { multiplier: 0.25 }),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        let sizer = Self::new(BankrollConfig {
            max_stake_fraction_per_event: config.max_stake_fraction_per_event,
            max_aggregate_exposure_fraction: config.max_aggregate_exposure_fraction,
            min_stake: config.min_stake,
        });
        match config.sizing_policy {
            SizingPolicyConfig::FractionalKelly { multiplier } => {
                sizer.with_policy(FractionalKelly { multiplier })
            }
            SizingPolicyConfig::FixedFraction { fraction } => {
                sizer.with_policy(FixedFraction { fraction })
            }
        }
    }

    pub fn with_policy(mut self, policy: impl SizingPolicy + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    pub fn bankroll_config(&self) -> &BankrollConfig {
        &self.config
    }

    /// Stake for this assessment, or `None` when no trade should be made.
    pub fn size(&self, assessment: &EdgeAssessment, ledger: &ExposureLedger) -> Option<f64> {
        match self.try_size(assessment, ledger) {
            Ok(stake) => Some(stake),
            Err(e) => {
                debug!(
                    "No stake for {} {}: {}",
                    assessment.pair.event_key, assessment.pair.outcome_side, e
                );
                None
            }
        }
    }

    /// Like [`size`](Self::size) but says why a trade was refused.
    pub fn try_size(&self, assessment: &EdgeAssessment, ledger: &ExposureLedger) -> Result<f64> {
        if !assessment.passes_threshold {
            return Err(EngineError::EdgeBelowThreshold {
                edge_fraction: assessment.edge_fraction,
            });
        }

        if !assessment.has_positive_value() {
            return Err(EngineError::NoExecutableValue {
                edge_fraction: assessment.edge_fraction,
                venue: assessment.execution_venue(),
            });
        }

        let event_key = &assessment.pair.event_key;
        let view = ledger.view_for(event_key);
        let bankroll = view.bankroll;
        let per_event_cap = self.config.max_stake_fraction_per_event * bankroll;

        let event_room = per_event_cap - view.event_committed;
        let aggregate_room =
            self.config.max_aggregate_exposure_fraction * bankroll - view.total_committed;
        let room = event_room.min(aggregate_room).min(view.uncommitted());
        if room <= 0.0 || room < self.config.min_stake {
            return Err(EngineError::ExposureCapExceeded {
                event_key: event_key.to_string(),
                room: room.max(0.0),
                requested: self.config.min_stake,
            });
        }

        let wanted = self.policy.fraction(assessment).max(0.0) * bankroll;
        let stake = (wanted.min(per_event_cap).min(room) * 100.0).floor() / 100.0;
        if stake <= 0.0 || stake < self.config.min_stake {
            return Err(EngineError::WagerTooSmall {
                stake,
                min_stake: self.config.min_stake,
            });
        }
        Ok(stake)
    }
}

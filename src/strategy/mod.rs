//! Strategy engine: Kelly sizing and bet selection.

pub mod kelly;
pub mod selector;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::types::{EngineResult, Forecast};
use kelly::{KellyCalculator, KellyMetrics};
use selector::{BetScore, BetSelector};

// ---------------------------------------------------------------------------
// Decision types
// ---------------------------------------------------------------------------

/// Why a live candidate was passed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    LowConfidence,
    InsufficientEdge,
    NegativeExpectation,
    RiskTooHigh,
    BelowMinimumStake,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::LowConfidence => write!(f, "confidence below threshold"),
            SkipReason::InsufficientEdge => write!(f, "edge below threshold"),
            SkipReason::NegativeExpectation => write!(f, "non-positive expected value"),
            SkipReason::RiskTooHigh => write!(f, "risk level above limit"),
            SkipReason::BelowMinimumStake => write!(f, "stake below minimum"),
        }
    }
}

/// Stake decision for one live candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StakeRecommendation {
    pub predicted_class: usize,
    pub stake: f64,
    pub fraction: f64,
    pub confidence: f64,
    pub edge: f64,
    pub decimal_odds: f64,
    /// `edge × stake`
    pub expected_value: f64,
    /// `None` when the bet should be placed.
    pub skipped: Option<SkipReason>,
}

impl StakeRecommendation {
    pub fn should_place(&self) -> bool {
        self.skipped.is_none() && self.stake > 0.0
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Pipelines history scoring → candidate edge → Kelly gate → sizing for
/// one live forecast.
pub struct StrategyOrchestrator {
    selector: BetSelector,
}

impl StrategyOrchestrator {
    pub fn new(selector: BetSelector) -> Self {
        Self { selector }
    }

    pub fn selector(&self) -> &BetSelector {
        &self.selector
    }

    pub fn kelly(&self) -> &Arc<KellyCalculator> {
        self.selector.kelly()
    }

    /// Decide on a stake for `candidate` given the settled history.
    ///
    /// The candidate's empirical probability is the history's hit rate for
    /// its predicted class; with no history for that class the model's own
    /// confidence stands in.
    pub fn recommend(
        &self,
        history: &[Forecast],
        labels: &[usize],
        candidate: &Forecast,
        bankroll: f64,
    ) -> EngineResult<StakeRecommendation> {
        let selection = self.selector.select_bets(history, labels)?;

        let predicted_class = candidate.predicted_class();
        let confidence = candidate.confidence();
        let empirical_probability = selection
            .candidates
            .iter()
            .find(|c| c.predicted_class == predicted_class)
            .map(|c| c.empirical_probability)
            .unwrap_or(confidence);
        let implied_probability = candidate.implied_probability();

        let score = BetScore {
            index: history.len(),
            predicted_class,
            confidence,
            empirical_probability,
            implied_probability,
            decimal_odds: candidate.effective_odds(),
            edge: empirical_probability - implied_probability,
        };
        let metrics = self.selector.candidate_metrics(&score, &selection.metrics);

        let skipped = self.gate(&score, &metrics);
        let stake = match skipped {
            Some(_) => 0.0,
            None => self.kelly().get_bet_size(&metrics, bankroll),
        };
        let skipped = match skipped {
            None if stake <= 0.0 => Some(SkipReason::BelowMinimumStake),
            other => other,
        };

        match skipped {
            None => info!(
                class = predicted_class,
                edge = format!("{:.1}%", score.edge * 100.0),
                stake = format!("{stake:.2}"),
                confidence = format!("{:.0}%", confidence * 100.0),
                "Bet recommended"
            ),
            Some(reason) => debug!(
                class = predicted_class,
                edge = format!("{:.1}%", score.edge * 100.0),
                reason = %reason,
                "Bet skipped"
            ),
        }

        Ok(StakeRecommendation {
            predicted_class,
            stake,
            fraction: metrics.fraction,
            confidence,
            edge: score.edge,
            decimal_odds: score.decimal_odds,
            expected_value: score.edge * stake,
            skipped,
        })
    }

    fn gate(&self, score: &BetScore, metrics: &KellyMetrics) -> Option<SkipReason> {
        let sel = self.selector.config();
        let kelly = self.kelly().config();
        if score.confidence < sel.min_confidence || metrics.confidence < kelly.min_confidence {
            Some(SkipReason::LowConfidence)
        } else if metrics.risk_level > sel.max_risk_level || metrics.risk_level > kelly.max_risk_level {
            Some(SkipReason::RiskTooHigh)
        } else if score.edge < sel.min_edge {
            Some(SkipReason::InsufficientEdge)
        } else if !self.kelly().should_place_bet(metrics) {
            Some(SkipReason::NegativeExpectation)
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Bet selection: threshold filtering and stake attachment.
//!
//! Scores every candidate forecast by its edge over the market, keeps the
//! ones that clear the confidence/edge/risk thresholds, and sizes them
//! through the Kelly calculator.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use super::kelly::{KellyCalculator, KellyMetrics};
use crate::types::{EngineResult, Forecast};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    /// Minimum predicted-class probability for a candidate.
    pub min_confidence: f64,
    /// Minimum `empirical − implied` probability.
    pub min_edge: f64,
    /// Maximum aggregate risk level (coefficient of variation).
    pub max_risk_level: f64,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.7,
            min_edge: 0.05,
            max_risk_level: 0.3,
        }
    }
}

// ---------------------------------------------------------------------------
// Output types
// ---------------------------------------------------------------------------

/// Per-candidate scoring, kept for every candidate whether selected or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BetScore {
    pub index: usize,
    pub predicted_class: usize,
    pub confidence: f64,
    /// Hit rate of the forecasts in the batch that predicted the same class.
    pub empirical_probability: f64,
    pub implied_probability: f64,
    pub decimal_odds: f64,
    pub edge: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BetSelection {
    pub selected_bets: Vec<usize>,
    pub metrics: KellyMetrics,
    pub confidence_threshold: f64,
    pub edge_threshold: f64,
    pub candidates: Vec<BetScore>,
}

impl BetSelection {
    pub fn score(&self, index: usize) -> Option<&BetScore> {
        self.candidates.iter().find(|c| c.index == index)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BetRecommendation {
    pub bet_index: usize,
    pub stake: f64,
    pub confidence: f64,
    /// `edge × stake`
    pub expected_value: f64,
}

// ---------------------------------------------------------------------------
// Selector
// ---------------------------------------------------------------------------

pub struct BetSelector {
    config: SelectorConfig,
    kelly: Arc<KellyCalculator>,
}

impl BetSelector {
    pub fn new(config: SelectorConfig, kelly: Arc<KellyCalculator>) -> Self {
        Self { config, kelly }
    }

    pub fn config(&self) -> &SelectorConfig {
        &self.config
    }

    pub fn kelly(&self) -> &Arc<KellyCalculator> {
        &self.kelly
    }

    /// Score and filter candidates against their realized labels.
    pub fn select_bets(&self, forecasts: &[Forecast], labels: &[usize]) -> EngineResult<BetSelection> {
        let metrics = self.kelly.analyze(forecasts, labels)?;

        // Per predicted class: (hits, total).
        let mut class_record: Vec<(usize, usize)> = Vec::new();
        for (f, label) in forecasts.iter().zip(labels) {
            let class = f.predicted_class();
            if class_record.len() <= class {
                class_record.resize(class + 1, (0, 0));
            }
            class_record[class].1 += 1;
            if class == *label {
                class_record[class].0 += 1;
            }
        }

        let candidates: Vec<BetScore> = forecasts
            .iter()
            .enumerate()
            .map(|(index, f)| {
                let predicted_class = f.predicted_class();
                let (hits, total) = class_record.get(predicted_class).copied().unwrap_or((0, 0));
                let empirical_probability = if total > 0 {
                    hits as f64 / total as f64
                } else {
                    0.0
                };
                let implied_probability = f.implied_probability();
                BetScore {
                    index,
                    predicted_class,
                    confidence: f.confidence(),
                    empirical_probability,
                    implied_probability,
                    decimal_odds: f.effective_odds(),
                    edge: empirical_probability - implied_probability,
                }
            })
            .collect();

        let risk_ok = metrics.risk_level <= self.config.max_risk_level;
        let selected_bets: Vec<usize> = candidates
            .iter()
            .filter(|c| {
                risk_ok
                    && c.confidence >= self.config.min_confidence
                    && c.edge >= self.config.min_edge
            })
            .map(|c| c.index)
            .collect();

        info!(
            candidates = candidates.len(),
            selected = selected_bets.len(),
            risk_level = format!("{:.3}", metrics.risk_level),
            "Bet selection complete"
        );

        Ok(BetSelection {
            selected_bets,
            metrics,
            confidence_threshold: self.config.min_confidence,
            edge_threshold: self.config.min_edge,
            candidates,
        })
    }

    /// Size every selected bet independently and rank by
    /// `expected_value × confidence`.
    ///
    /// No joint bankroll check: the stakes may sum past the bankroll.
    pub fn get_bet_recommendations(
        &self,
        selection: &BetSelection,
        bankroll: f64,
    ) -> Vec<BetRecommendation> {
        let mut recs: Vec<BetRecommendation> = selection
            .selected_bets
            .iter()
            .filter_map(|&index| selection.score(index))
            .map(|score| {
                let metrics = self.candidate_metrics(score, &selection.metrics);
                let stake = self.kelly.get_bet_size(&metrics, bankroll);
                debug!(
                    bet_index = score.index,
                    edge = format!("{:.1}%", score.edge * 100.0),
                    fraction = format!("{:.2}%", metrics.fraction * 100.0),
                    stake = format!("{stake:.2}"),
                    "Bet sized"
                );
                BetRecommendation {
                    bet_index: score.index,
                    stake,
                    confidence: score.confidence,
                    expected_value: score.edge * stake,
                }
            })
            .collect();

        recs.sort_by(|a, b| {
            let score_a = a.expected_value * a.confidence;
            let score_b = b.expected_value * b.confidence;
            score_b
                .partial_cmp(&score_a)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        recs
    }

    /// Kelly metrics for a single candidate, sharing the batch's volatility.
    pub fn candidate_metrics(&self, score: &BetScore, aggregate: &KellyMetrics) -> KellyMetrics {
        let p = score.empirical_probability;
        let b = (score.decimal_odds - 1.0).max(0.0);
        let raw = KellyCalculator::raw_fraction(p, b);
        KellyMetrics {
            fraction: self.kelly.adjust_fraction(raw, score.confidence, aggregate.volatility),
            expected_value: p * b - (1.0 - p),
            confidence: score.confidence,
            ..aggregate.clone()
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

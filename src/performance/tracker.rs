//! Per-model performance tracking.
//!
//! Every metric is maintained incrementally: running means, Welford
//! variance for per-bet returns, a peak-to-trough scan of the `1 + ROI`
//! equity curve, and binned calibration. Each outcome appends a snapshot
//! to a bounded per-model history.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use super::calibration::Calibrator;
use super::ring::RingBuffer;
use crate::strategy::kelly::KellyCalculator;
use crate::strategy::StakeRecommendation;
use crate::types::{EngineError, EngineResult, ModelOutput, Timeframe};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Snapshots retained per model.
    pub max_history_length: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_history_length: 1000,
        }
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_predictions: u64,
    pub correct_predictions: u64,
    /// Outcomes recorded.
    pub settled_bets: u64,
    pub total_stake: f64,
    pub total_payout: f64,
    pub roi: f64,
    pub win_rate: f64,
    pub average_confidence: f64,
    pub average_odds: f64,
    pub profit_factor: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
    pub kelly_criterion: f64,
    pub expected_value: f64,
    pub calibration_score: f64,
    pub last_updated: DateTime<Utc>,
}

impl PerformanceMetrics {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            total_predictions: 0,
            correct_predictions: 0,
            settled_bets: 0,
            total_stake: 0.0,
            total_payout: 0.0,
            roi: 0.0,
            win_rate: 0.0,
            average_confidence: 0.0,
            average_odds: 0.0,
            profit_factor: 0.0,
            sharpe_ratio: 0.0,
            max_drawdown: 0.0,
            kelly_criterion: 0.0,
            expected_value: 0.0,
            calibration_score: 1.0,
            last_updated: now,
        }
    }
}

/// A metric name usable for ranking and alert thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    TotalPredictions,
    CorrectPredictions,
    TotalStake,
    TotalPayout,
    Roi,
    WinRate,
    AverageConfidence,
    AverageOdds,
    ProfitFactor,
    SharpeRatio,
    MaxDrawdown,
    KellyCriterion,
    ExpectedValue,
    CalibrationScore,
}

impl MetricKind {
    pub fn value(&self, m: &PerformanceMetrics) -> f64 {
        match self {
            MetricKind::TotalPredictions => m.total_predictions as f64,
            MetricKind::CorrectPredictions => m.correct_predictions as f64,
            MetricKind::TotalStake => m.total_stake,
            MetricKind::TotalPayout => m.total_payout,
            MetricKind::Roi => m.roi,
            MetricKind::WinRate => m.win_rate,
            MetricKind::AverageConfidence => m.average_confidence,
            MetricKind::AverageOdds => m.average_odds,
            MetricKind::ProfitFactor => m.profit_factor,
            MetricKind::SharpeRatio => m.sharpe_ratio,
            MetricKind::MaxDrawdown => m.max_drawdown,
            MetricKind::KellyCriterion => m.kelly_criterion,
            MetricKind::ExpectedValue => m.expected_value,
            MetricKind::CalibrationScore => m.calibration_score,
        }
    }

    /// Drawdown is the only metric where smaller ranks higher.
    pub fn higher_is_better(&self) -> bool {
        !matches!(self, MetricKind::MaxDrawdown)
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MetricKind::TotalPredictions => "total_predictions",
            MetricKind::CorrectPredictions => "correct_predictions",
            MetricKind::TotalStake => "total_stake",
            MetricKind::TotalPayout => "total_payout",
            MetricKind::Roi => "roi",
            MetricKind::WinRate => "win_rate",
            MetricKind::AverageConfidence => "average_confidence",
            MetricKind::AverageOdds => "average_odds",
            MetricKind::ProfitFactor => "profit_factor",
            MetricKind::SharpeRatio => "sharpe_ratio",
            MetricKind::MaxDrawdown => "max_drawdown",
            MetricKind::KellyCriterion => "kelly_criterion",
            MetricKind::ExpectedValue => "expected_value",
            MetricKind::CalibrationScore => "calibration_score",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    pub timestamp: DateTime<Utc>,
    pub metrics: PerformanceMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedModel {
    pub model_name: String,
    pub metrics: PerformanceMetrics,
}

// ---------------------------------------------------------------------------
// Per-model state
// ---------------------------------------------------------------------------

/// Welford running mean/variance.
#[derive(Debug, Clone, Default)]
struct RunningStats {
    n: u64,
    mean: f64,
    m2: f64,
}

impl RunningStats {
    fn push(&mut self, x: f64) {
        self.n += 1;
        let delta = x - self.mean;
        self.mean += delta / self.n as f64;
        self.m2 += delta * (x - self.mean);
    }

    /// Sample standard deviation; 0 below two observations.
    fn std_dev(&self) -> f64 {
        if self.n < 2 {
            0.0
        } else {
            (self.m2 / (self.n - 1) as f64).sqrt()
        }
    }
}

struct ModelState {
    metrics: PerformanceMetrics,
    history: RingBuffer<PerformanceSnapshot>,
    calibration: Calibrator,
    /// Confidences of tracked predictions awaiting an outcome, oldest first.
    pending: VecDeque<f64>,
    pending_cap: usize,
    returns: RunningStats,
    gross_profit: f64,
    gross_loss: f64,
    peak_equity: f64,
}

impl ModelState {
    fn new(capacity: usize, now: DateTime<Utc>) -> Self {
        Self {
            metrics: PerformanceMetrics::new(now),
            history: RingBuffer::new(capacity),
            calibration: Calibrator::new(),
            pending: VecDeque::new(),
            pending_cap: capacity.max(1),
            returns: RunningStats::default(),
            gross_profit: 0.0,
            gross_loss: 0.0,
            peak_equity: 1.0,
        }
    }

    fn snapshot(&mut self, timestamp: DateTime<Utc>) {
        self.metrics.last_updated = timestamp;
        self.history.push(PerformanceSnapshot {
            timestamp,
            metrics: self.metrics.clone(),
        });
    }

    fn track(&mut self, confidence: f64, timestamp: DateTime<Utc>) {
        let m = &mut self.metrics;
        m.total_predictions += 1;
        m.average_confidence += (confidence - m.average_confidence) / m.total_predictions as f64;

        if self.pending.len() >= self.pending_cap {
            self.pending.pop_front();
        }
        self.pending.push_back(confidence);
        self.snapshot(timestamp);
    }

    fn settle(&mut self, stake: f64, payout: f64, odds: f64, timestamp: DateTime<Utc>) {
        let profit = payout - stake;
        let won = profit > 0.0;

        let m = &mut self.metrics;
        m.settled_bets += 1;
        if won {
            m.correct_predictions += 1;
        }
        m.total_stake += stake;
        m.total_payout += payout;
        m.roi = ratio(m.total_payout - m.total_stake, m.total_stake);
        m.win_rate = m.correct_predictions as f64 / m.settled_bets as f64;
        m.average_odds += (odds - m.average_odds) / m.settled_bets as f64;

        if profit > 0.0 {
            self.gross_profit += profit;
        } else {
            self.gross_loss += -profit;
        }
        m.profit_factor = ratio(self.gross_profit, self.gross_loss);

        self.returns.push(ratio(profit, stake));
        m.sharpe_ratio = ratio(self.returns.mean, self.returns.std_dev());

        let equity = 1.0 + m.roi;
        self.peak_equity = self.peak_equity.max(equity);
        if self.peak_equity > 0.0 {
            m.max_drawdown = m.max_drawdown.max((self.peak_equity - equity) / self.peak_equity);
        }

        let b = (m.average_odds - 1.0).max(0.0);
        m.kelly_criterion = KellyCalculator::raw_fraction(m.win_rate, b).max(0.0);
        m.expected_value = m.win_rate * b - (1.0 - m.win_rate);

        if let Some(confidence) = self.pending.pop_front() {
            self.calibration.add(confidence, won);
            m.calibration_score = self.calibration.score();
        }

        self.snapshot(timestamp);
    }
}

fn ratio(num: f64, den: f64) -> f64 {
    if den == 0.0 || !den.is_finite() {
        0.0
    } else {
        num / den
    }
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

/// Owns per-model metrics and history. Updates for one model serialize on
/// that model's mutex; different models never contend.
pub struct PerformanceTracker {
    config: TrackerConfig,
    models: RwLock<HashMap<String, Arc<Mutex<ModelState>>>>,
}

impl PerformanceTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            models: RwLock::new(HashMap::new()),
        }
    }

    fn state(&self, model: &str, now: DateTime<Utc>) -> Arc<Mutex<ModelState>> {
        if let Some(state) = self.models.read().get(model) {
            return state.clone();
        }
        self.models
            .write()
            .entry(model.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(ModelState::new(self.config.max_history_length, now)))
            })
            .clone()
    }

    /// Input check applied by `track_prediction`.
    pub fn validate_prediction(prediction: &ModelOutput) -> EngineResult<()> {
        if !prediction.has_valid_confidence() {
            return Err(EngineError::Validation(format!(
                "confidence {} outside [0, 1]",
                prediction.confidence
            )));
        }
        Ok(())
    }

    /// Input check applied by `record_outcome`.
    pub fn validate_outcome(stake: f64, payout: f64, odds: f64) -> EngineResult<()> {
        if !stake.is_finite() || stake < 0.0 {
            return Err(EngineError::Validation(format!("invalid stake {stake}")));
        }
        if !payout.is_finite() || payout < 0.0 {
            return Err(EngineError::Validation(format!("invalid payout {payout}")));
        }
        if !odds.is_finite() || odds <= 0.0 {
            return Err(EngineError::Validation(format!("invalid odds {odds}")));
        }
        Ok(())
    }

    /// Register a prediction and the stake decision made on it.
    pub fn track_prediction(
        &self,
        model: &str,
        prediction: &ModelOutput,
        recommendation: &StakeRecommendation,
    ) -> EngineResult<()> {
        Self::validate_prediction(prediction)?;
        let now = Utc::now();
        let state = self.state(model, now);
        state.lock().track(prediction.confidence, now);
        debug!(
            model,
            prediction = %prediction.prediction,
            stake = format!("{:.2}", recommendation.stake),
            placed = recommendation.should_place(),
            "Prediction tracked"
        );
        Ok(())
    }

    /// Record a settled bet: `payout` is the gross return (0 on a loss).
    pub fn record_outcome(
        &self,
        model: &str,
        stake: f64,
        payout: f64,
        odds: f64,
    ) -> EngineResult<PerformanceMetrics> {
        self.record_outcome_at(model, stake, payout, odds, Utc::now())
    }

    /// `record_outcome` with an explicit settlement time.
    pub fn record_outcome_at(
        &self,
        model: &str,
        stake: f64,
        payout: f64,
        odds: f64,
        timestamp: DateTime<Utc>,
    ) -> EngineResult<PerformanceMetrics> {
        Self::validate_outcome(stake, payout, odds)?;

        let state = self.state(model, timestamp);
        let mut guard = state.lock();
        guard.settle(stake, payout, odds, timestamp);
        let metrics = guard.metrics.clone();
        drop(guard);

        debug!(
            model,
            roi = format!("{:.2}%", metrics.roi * 100.0),
            win_rate = format!("{:.1}%", metrics.win_rate * 100.0),
            drawdown = format!("{:.1}%", metrics.max_drawdown * 100.0),
            "Outcome recorded"
        );
        Ok(metrics)
    }

    pub fn get_model_performance(&self, model: &str) -> Option<PerformanceMetrics> {
        let state = self.models.read().get(model).cloned()?;
        let metrics = state.lock().metrics.clone();
        Some(metrics)
    }

    /// Snapshots with `timestamp ≥ now − timeframe`, oldest first.
    pub fn get_performance_history(&self, model: &str, timeframe: Timeframe) -> Vec<PerformanceSnapshot> {
        let Some(state) = self.models.read().get(model).cloned() else {
            return Vec::new();
        };
        let cutoff = timeframe.cutoff(Utc::now());
        let guard = state.lock();
        guard
            .history
            .iter()
            .filter(|s| cutoff.map_or(true, |c| s.timestamp >= c))
            .cloned()
            .collect()
    }

    /// Best `limit` models by `metric`.
    pub fn get_top_performing_models(&self, metric: MetricKind, limit: usize) -> Vec<RankedModel> {
        let states: Vec<(String, Arc<Mutex<ModelState>>)> = self
            .models
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let mut ranked: Vec<RankedModel> = states
            .into_iter()
            .map(|(model_name, state)| RankedModel {
                model_name,
                metrics: state.lock().metrics.clone(),
            })
            .collect();

        ranked.sort_by(|a, b| {
            let (va, vb) = (metric.value(&a.metrics), metric.value(&b.metrics));
            let ord = if metric.higher_is_better() {
                vb.partial_cmp(&va)
            } else {
                va.partial_cmp(&vb)
            };
            ord.unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.model_name.cmp(&b.model_name))
        });
        ranked.truncate(limit);
        ranked
    }

    /// Tracked model names, sorted.
    pub fn model_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.models.read().keys().cloned().collect();
        names.sort();
        names
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

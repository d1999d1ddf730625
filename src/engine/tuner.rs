//! Weight tuner: periodic re-weighting of ensemble members.
//!
//! Settled events are logged as `HistoricalRecord`s: for every member model,
//! its stated confidence and the probability it gave the realized outcome.
//! Tuning searches positive member weights that minimize the squared error
//! of the blended outcome probability plus a calibration penalty, then
//! normalizes them and publishes them with one atomic replace.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ensemble::EnsembleManager;
use crate::optimize::{
    AlgorithmParameters, Constraints, ConvergenceConfig, Direction, FnObjective,
    OptimizationConfig, OptimizationEngine, OptimizerKind,
};
use crate::types::{EngineError, EngineResult};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Search algorithm used for tuning (`[optimizer]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerSettings {
    pub kind: OptimizerKind,
    pub parameters: AlgorithmParameters,
    pub convergence: ConvergenceConfig,
    pub seed: Option<u64>,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            kind: OptimizerKind::Genetic,
            parameters: AlgorithmParameters {
                population_size: 30,
                generations: 40,
                ..AlgorithmParameters::default()
            },
            convergence: ConvergenceConfig::default(),
            seed: None,
        }
    }
}

/// Tuning schedule and objective (`[tuner]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TunerConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    /// Outcome log capacity across all ensembles.
    pub max_records: usize,
    /// Settled records an ensemble needs before it is tuned.
    pub min_records: usize,
    /// Weight on `(mean blended confidence − mean outcome probability)²`.
    pub calibration_penalty: f64,
    pub min_weight: f64,
    pub max_weight: f64,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 3600,
            max_records: 500,
            min_records: 20,
            calibration_penalty: 0.1,
            min_weight: 0.01,
            max_weight: 1.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Outcome log
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberOutcome {
    pub model: String,
    pub confidence: f64,
    /// Probability the model assigned to the class that occurred.
    pub outcome_probability: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalRecord {
    pub ensemble: String,
    pub timestamp: DateTime<Utc>,
    pub members: Vec<MemberOutcome>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TuningReport {
    pub ensemble: String,
    pub weights: HashMap<String, f64>,
    pub objective: f64,
    pub records: usize,
    pub iterations: usize,
    pub evaluations: usize,
}

/// Per-record inputs aligned with the ensemble's model order.
struct Sample {
    probabilities: Vec<f64>,
    confidences: Vec<f64>,
}

/// Scale positive weights to sum to 1. `None` when they sum to nothing.
pub fn normalize(weights: &[f64]) -> Option<Vec<f64>> {
    let total: f64 = weights.iter().sum();
    if !(total > 0.0) || !total.is_finite() {
        return None;
    }
    Some(weights.iter().map(|w| w / total).collect())
}

/// Brier-style loss of the weight-blended outcome probability, plus the
/// calibration penalty. NaN for weights that cannot be normalized.
fn tuning_loss(weights: &[f64], samples: &[Sample], penalty: f64) -> f64 {
    let Some(w) = normalize(weights) else {
        return f64::NAN;
    };
    if samples.is_empty() {
        return 0.0;
    }
    let n = samples.len() as f64;
    let (mut sq_err, mut prob_sum, mut conf_sum) = (0.0, 0.0, 0.0);
    for s in samples {
        let p: f64 = w.iter().zip(&s.probabilities).map(|(w, q)| w * q).sum();
        let c: f64 = w.iter().zip(&s.confidences).map(|(w, c)| w * c).sum();
        sq_err += (1.0 - p).powi(2);
        prob_sum += p;
        conf_sum += c;
    }
    sq_err / n + penalty * (conf_sum / n - prob_sum / n).powi(2)
}

// ---------------------------------------------------------------------------
// Tuner
// ---------------------------------------------------------------------------

pub struct WeightTuner {
    config: TunerConfig,
    optimizer: OptimizerSettings,
    ensembles: Arc<EnsembleManager>,
    engine: OptimizationEngine,
    records: Mutex<VecDeque<HistoricalRecord>>,
}

impl WeightTuner {
    pub fn new(config: TunerConfig, optimizer: OptimizerSettings, ensembles: Arc<EnsembleManager>) -> Self {
        Self {
            config,
            optimizer,
            ensembles,
            engine: OptimizationEngine::new(),
            records: Mutex::new(VecDeque::new()),
        }
    }

    pub fn config(&self) -> &TunerConfig {
        &self.config
    }

    /// Append a settled record, evicting the oldest beyond `max_records`.
    pub fn record(&self, record: HistoricalRecord) {
        let mut records = self.records.lock();
        records.push_back(record);
        while records.len() > self.config.max_records.max(1) {
            records.pop_front();
        }
    }

    pub fn record_count(&self, ensemble: &str) -> usize {
        self.records.lock().iter().filter(|r| r.ensemble == ensemble).count()
    }

    /// Records for `ensemble` that carry every model in `models`, aligned
    /// with that order.
    fn samples(&self, ensemble: &str, models: &[String]) -> Vec<Sample> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.ensemble == ensemble)
            .filter_map(|r| {
                let by_model: HashMap<&str, &MemberOutcome> =
                    r.members.iter().map(|m| (m.model.as_str(), m)).collect();
                let aligned: Option<Vec<&MemberOutcome>> =
                    models.iter().map(|m| by_model.get(m.as_str()).copied()).collect();
                aligned.map(|members| Sample {
                    probabilities: members.iter().map(|m| m.outcome_probability).collect(),
                    confidences: members.iter().map(|m| m.confidence).collect(),
                })
            })
            .collect()
    }

    /// Tune one ensemble's weights. `Ok(None)` when there is not enough
    /// history or the run was cancelled before finishing.
    pub async fn tune(&self, ensemble: &str, cancel: &CancellationToken) -> EngineResult<Option<TuningReport>> {
        let config = self
            .ensembles
            .get_ensemble_config(ensemble)
            .ok_or_else(|| EngineError::NotFound(format!("ensemble {ensemble}")))?;

        let samples = self.samples(ensemble, &config.models);
        if samples.len() < self.config.min_records.max(1) {
            debug!(
                ensemble,
                records = samples.len(),
                required = self.config.min_records,
                "Not enough history to tune"
            );
            return Ok(None);
        }

        let dims = config.models.len();
        let mut search = OptimizationConfig::new(
            self.optimizer.kind,
            Constraints::bounds(vec![self.config.min_weight; dims], vec![self.config.max_weight; dims]),
        );
        search.parameters = self.optimizer.parameters.clone();
        search.convergence = self.optimizer.convergence.clone();
        search.direction = Direction::Minimize;
        search.seed = self.optimizer.seed;

        let penalty = self.config.calibration_penalty;
        let record_count = samples.len();
        let objective = FnObjective(move |w: &[f64]| tuning_loss(w, &samples, penalty));

        // The search is CPU-bound; run it off the async workers.
        let engine = self.engine;
        let token = cancel.clone();
        let runtime = tokio::runtime::Handle::current();
        let result = tokio::task::spawn_blocking(move || {
            runtime.block_on(async move { engine.optimize(&search, &objective, &token, None).await })
        })
        .await
        .map_err(|e| EngineError::Optimization(format!("tuning task failed: {e}")))??;

        if result.metadata.cancelled {
            info!(ensemble, "Tuning cancelled; weights unchanged");
            return Ok(None);
        }

        let normalized = normalize(&result.best_parameters)
            .ok_or_else(|| EngineError::Optimization("tuned weights sum to zero".into()))?;
        let weights: HashMap<String, f64> = config.models.iter().cloned().zip(normalized).collect();
        self.ensembles.update_ensemble_weights(ensemble, weights.clone())?;

        info!(
            ensemble,
            loss = format!("{:.5}", result.best_value),
            records = record_count,
            iterations = result.metadata.iterations,
            "Ensemble weights tuned"
        );

        Ok(Some(TuningReport {
            ensemble: ensemble.to_string(),
            weights,
            objective: result.best_value,
            records: record_count,
            iterations: result.metadata.iterations,
            evaluations: result.metadata.evaluations,
        }))
    }

    /// Tune every ensemble. Failures are logged and skipped.
    pub async fn tune_all(&self, cancel: &CancellationToken) -> Vec<TuningReport> {
        let mut reports = Vec::new();
        for name in self.ensembles.list_ensembles() {
            if cancel.is_cancelled() {
                break;
            }
            match self.tune(&name, cancel).await {
                Ok(Some(report)) => reports.push(report),
                Ok(None) => {}
                Err(e) => warn!(ensemble = %name, error = %e, "Tuning failed"),
            }
        }
        reports
    }

    /// Run `tune_all` every `interval_secs` until `cancel` fires.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let period = Duration::from_secs(self.config.interval_secs.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // First tick completes immediately; wait a full period instead.
            interval.tick().await;
            info!(interval_secs = period.as_secs(), "Weight tuner started");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Weight tuner stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        let reports = self.tune_all(&cancel).await;
                        debug!(tuned = reports.len(), "Tuning pass complete");
                    }
                }
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Ensemble manager: named model ensembles and concurrent inference.
//!
//! Defines the `Predictor` trait (the opaque model capability), the
//! `ModelRegistry` that resolves model names, and the `EnsembleManager`
//! that owns ensemble definitions and turns per-model outputs into a
//! single `EnsemblePrediction`.

pub mod voting;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::types::{
    EngineError, EngineResult, Features, ModelOutput, ModelPrediction, PredictionValue,
};
use voting::{Vote, VotingStrategy};

/// Tolerance on the weight-sum invariant.
pub const WEIGHT_TOLERANCE: f64 = 1e-4;

// ---------------------------------------------------------------------------
// Model capability
// ---------------------------------------------------------------------------

/// Abstraction over a trained prediction model.
///
/// Implementors are served by an external collaborator; the engine only
/// calls `predict`. Failures (timeouts, unavailability) are returned as
/// errors and are never retried here.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Predictor: Send + Sync {
    /// Produce a prediction for one feature payload.
    async fn predict(&self, features: &Features) -> anyhow::Result<ModelOutput>;
}

/// Name → model lookup, shared by every ensemble.
#[derive(Default)]
pub struct ModelRegistry {
    models: RwLock<HashMap<String, Arc<dyn Predictor>>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a model under `name`.
    pub fn register(&self, name: impl Into<String>, model: Arc<dyn Predictor>) {
        let name = name.into();
        debug!(model = %name, "Model registered");
        self.models.write().insert(name, model);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Predictor>> {
        self.models.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.models.read().contains_key(name)
    }

    /// Registered model names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.models.read().keys().cloned().collect();
        names.sort();
        names
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Definition of a named ensemble.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleConfig {
    pub name: String,
    /// Member models, in tie-break order.
    pub models: Vec<String>,
    /// Per-model weights. Uniform when omitted at creation.
    #[serde(default)]
    pub weights: Option<HashMap<String, f64>>,
    pub voting_strategy: VotingStrategy,
    /// Combined confidence below this is flagged as not actionable.
    #[serde(default)]
    pub min_confidence: f64,
    #[serde(default = "default_min_models")]
    pub min_models: usize,
}

fn default_min_models() -> usize {
    1
}

impl EnsembleConfig {
    pub fn new(name: impl Into<String>, models: &[&str], voting_strategy: VotingStrategy) -> Self {
        Self {
            name: name.into(),
            models: models.iter().map(|m| m.to_string()).collect(),
            weights: None,
            voting_strategy,
            min_confidence: 0.0,
            min_models: 1,
        }
    }

    pub fn with_weights(mut self, weights: &[(&str, f64)]) -> Self {
        self.weights = Some(weights.iter().map(|(m, w)| (m.to_string(), *w)).collect());
        self
    }

    /// Weight of a member model (0 if absent).
    pub fn weight(&self, model: &str) -> f64 {
        self.weights
            .as_ref()
            .and_then(|w| w.get(model).copied())
            .unwrap_or(0.0)
    }
}

/// Check that `weights` covers exactly `models` and sums to 1, and return
/// them rescaled to an exact unit sum.
pub fn validate_weights(
    models: &[String],
    weights: &HashMap<String, f64>,
) -> EngineResult<HashMap<String, f64>> {
    if weights.len() != models.len() || models.iter().any(|m| !weights.contains_key(m)) {
        return Err(EngineError::Validation(format!(
            "weights must be given for exactly the ensemble models {models:?}"
        )));
    }
    if let Some((m, w)) = weights.iter().find(|(_, w)| !w.is_finite() || **w < 0.0) {
        return Err(EngineError::Validation(format!(
            "weight for {m} must be a non-negative number, got {w}"
        )));
    }
    let total: f64 = weights.values().sum();
    if (total - 1.0).abs() > WEIGHT_TOLERANCE {
        return Err(EngineError::Validation(format!(
            "weights must sum to 1 (got {total:.6})"
        )));
    }
    Ok(weights.iter().map(|(m, w)| (m.clone(), w / total)).collect())
}

// ---------------------------------------------------------------------------
// Prediction output
// ---------------------------------------------------------------------------

/// One member's share of an ensemble prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelContribution {
    pub prediction: PredictionValue,
    pub confidence: f64,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionMetadata {
    pub timestamp: DateTime<Utc>,
    pub model_count: usize,
    pub voting_strategy: VotingStrategy,
    /// Combined confidence reached the ensemble's `min_confidence`.
    pub meets_min_confidence: bool,
}

/// Result of one ensemble inference. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsemblePrediction {
    pub prediction: PredictionValue,
    pub confidence: f64,
    pub model_contributions: HashMap<String, ModelContribution>,
    pub metadata: PredictionMetadata,
}

/// Lifecycle notifications published by the manager.
#[derive(Debug, Clone)]
pub enum EnsembleEvent {
    Created { name: String },
    PredictionGenerated { name: String, prediction: EnsemblePrediction },
    WeightsUpdated { name: String, weights: HashMap<String, f64> },
    Removed { name: String },
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Owns ensemble definitions by name and runs ensemble inference.
///
/// Definitions are stored as `Arc` snapshots: an inference call clones the
/// current snapshot once, so a concurrent weight update is either fully
/// visible to it or not at all.
pub struct EnsembleManager {
    registry: Arc<ModelRegistry>,
    ensembles: RwLock<HashMap<String, Arc<EnsembleConfig>>>,
    events: Option<UnboundedSender<EnsembleEvent>>,
}

impl EnsembleManager {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self {
            registry,
            ensembles: RwLock::new(HashMap::new()),
            events: None,
        }
    }

    /// Publish lifecycle events on `sender`.
    pub fn with_events(mut self, sender: UnboundedSender<EnsembleEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// Validate and register an ensemble. Omitted weights become uniform.
    pub fn create_ensemble(&self, mut config: EnsembleConfig) -> EngineResult<()> {
        if config.name.trim().is_empty() {
            return Err(EngineError::Configuration("ensemble name is empty".into()));
        }
        if config.models.is_empty() {
            return Err(EngineError::Configuration(format!(
                "ensemble {} has no models",
                config.name
            )));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = config.models.iter().find(|m| !seen.insert(m.as_str())) {
            return Err(EngineError::Configuration(format!(
                "ensemble {} lists model {dup} twice",
                config.name
            )));
        }
        if config.min_models == 0 || config.min_models > config.models.len() {
            return Err(EngineError::Configuration(format!(
                "ensemble {}: min_models must be between 1 and {}, got {}",
                config.name,
                config.models.len(),
                config.min_models
            )));
        }
        if !(0.0..=1.0).contains(&config.min_confidence) {
            return Err(EngineError::Configuration(format!(
                "ensemble {}: min_confidence must be within [0, 1]",
                config.name
            )));
        }
        for model in &config.models {
            if !self.registry.contains(model) {
                return Err(EngineError::Configuration(format!(
                    "model {model} not found in registry"
                )));
            }
        }

        config.weights = Some(match &config.weights {
            Some(weights) => validate_weights(&config.models, weights)?,
            None => {
                let w = 1.0 / config.models.len() as f64;
                config.models.iter().map(|m| (m.clone(), w)).collect()
            }
        });

        let name = config.name.clone();
        let replaced = self
            .ensembles
            .write()
            .insert(name.clone(), Arc::new(config))
            .is_some();
        if replaced {
            warn!(ensemble = %name, "Ensemble definition replaced");
        } else {
            info!(ensemble = %name, "Ensemble created");
        }
        self.emit(EnsembleEvent::Created { name });
        Ok(())
    }

    /// Run every member model concurrently and combine the results.
    ///
    /// A single member failure fails the whole call: dropping a member
    /// would silently re-weight the vote.
    pub async fn get_ensemble_prediction(
        &self,
        name: &str,
        input: &Features,
    ) -> EngineResult<EnsemblePrediction> {
        let config = self
            .get_ensemble_config(name)
            .ok_or_else(|| EngineError::NotFound(format!("ensemble {name}")))?;

        let mut members = Vec::with_capacity(config.models.len());
        for model_name in &config.models {
            let model = self
                .registry
                .get(model_name)
                .ok_or_else(|| EngineError::NotFound(format!("model {model_name}")))?;
            members.push((model_name.as_str(), model));
        }

        let predictions: Vec<ModelPrediction> =
            try_join_all(members.iter().map(|(model_name, model)| async move {
                let output = model.predict(input).await.map_err(|e| {
                    EngineError::UpstreamPrediction {
                        model: model_name.to_string(),
                        message: format!("{e:#}"),
                    }
                })?;
                if !output.has_valid_confidence() {
                    return Err(EngineError::UpstreamPrediction {
                        model: model_name.to_string(),
                        message: format!("confidence {} outside [0, 1]", output.confidence),
                    });
                }
                Ok(ModelPrediction {
                    model_name: model_name.to_string(),
                    prediction: output.prediction,
                    confidence: output.confidence,
                })
            }))
            .await?;

        let votes: Vec<Vote<'_>> = predictions
            .iter()
            .map(|p| Vote {
                prediction: &p.prediction,
                confidence: p.confidence,
                weight: config.weight(&p.model_name),
            })
            .collect();
        let outcome = voting::combine(config.voting_strategy, &votes)?;

        let model_contributions = predictions
            .iter()
            .map(|p| {
                (
                    p.model_name.clone(),
                    ModelContribution {
                        prediction: p.prediction.clone(),
                        confidence: p.confidence,
                        weight: config.weight(&p.model_name),
                    },
                )
            })
            .collect();

        let prediction = EnsemblePrediction {
            metadata: PredictionMetadata {
                timestamp: Utc::now(),
                model_count: predictions.len(),
                voting_strategy: config.voting_strategy,
                meets_min_confidence: outcome.confidence >= config.min_confidence,
            },
            prediction: outcome.prediction,
            confidence: outcome.confidence,
            model_contributions,
        };

        debug!(
            ensemble = %name,
            prediction = %prediction.prediction,
            confidence = format!("{:.1}%", prediction.confidence * 100.0),
            models = prediction.metadata.model_count,
            "Ensemble prediction generated"
        );
        self.emit(EnsembleEvent::PredictionGenerated {
            name: name.to_string(),
            prediction: prediction.clone(),
        });

        Ok(prediction)
    }

    /// Replace an ensemble's weights after re-validating the sum invariant.
    /// The stored weights are rescaled to sum to exactly 1.
    pub fn update_ensemble_weights(
        &self,
        name: &str,
        weights: HashMap<String, f64>,
    ) -> EngineResult<()> {
        let weights = {
            let mut ensembles = self.ensembles.write();
            let current = ensembles
                .get(name)
                .ok_or_else(|| EngineError::NotFound(format!("ensemble {name}")))?;
            let weights = validate_weights(&current.models, &weights)?;

            let mut next = EnsembleConfig::clone(current);
            next.weights = Some(weights.clone());
            ensembles.insert(name.to_string(), Arc::new(next));
            weights
        };

        info!(ensemble = %name, weights = ?weights, "Ensemble weights updated");
        self.emit(EnsembleEvent::WeightsUpdated {
            name: name.to_string(),
            weights,
        });
        Ok(())
    }

    /// Current snapshot of an ensemble definition.
    pub fn get_ensemble_config(&self, name: &str) -> Option<Arc<EnsembleConfig>> {
        self.ensembles.read().get(name).cloned()
    }

    /// Names of all ensembles, sorted.
    pub fn list_ensembles(&self) -> Vec<String> {
        let mut names: Vec<String> = self.ensembles.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Drop an ensemble. Returns whether it existed.
    pub fn remove_ensemble(&self, name: &str) -> bool {
        let removed = self.ensembles.write().remove(name).is_some();
        if removed {
            info!(ensemble = %name, "Ensemble removed");
            self.emit(EnsembleEvent::Removed {
                name: name.to_string(),
            });
        }
        removed
    }

    fn emit(&self, event: EnsembleEvent) {
        if let Some(tx) = &self.events {
            // Receiver gone means nobody is listening; not an error.
            let _ = tx.send(event);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

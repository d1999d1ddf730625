//! Core engine: wires ensembles, stake sizing, settlement, performance
//! tracking and weight tuning into one injectable context.

pub mod replay;
pub mod tuner;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::ensemble::{EnsembleManager, EnsemblePrediction, ModelRegistry};
use crate::optimize::OptimizationEngine;
use crate::performance::{Alert, AlertMonitor, PerformanceTracker};
use crate::strategy::kelly::{BankrollState, KellyCalculator};
use crate::strategy::selector::BetSelector;
use crate::strategy::{SkipReason, StakeRecommendation, StrategyOrchestrator};
use crate::types::{
    EngineError, EngineResult, Features, Forecast, ModelOutput, PredictionValue,
};
use tuner::{HistoricalRecord, MemberOutcome, WeightTuner};

// ---------------------------------------------------------------------------
// Events and decisions
// ---------------------------------------------------------------------------

/// A market to decide on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BettingEvent {
    pub event_id: String,
    /// Ensemble that predicts this market.
    pub ensemble: String,
    #[serde(default)]
    pub features: Features,
    /// Outcome labels in class order. Empty for a binary market predicted
    /// as a probability, where class 1 means the event happens.
    #[serde(default)]
    pub classes: Vec<String>,
    /// Decimal odds per class. Empty means fair odds are assumed.
    #[serde(default)]
    pub odds: Vec<f64>,
}

impl BettingEvent {
    fn class_count(&self) -> usize {
        if self.classes.is_empty() {
            2
        } else {
            self.classes.len()
        }
    }
}

/// Ensemble output and stake decision for one event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    pub event: BettingEvent,
    pub prediction: EnsemblePrediction,
    pub forecast: Forecast,
    pub recommendation: StakeRecommendation,
    pub decided_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Settlement {
    pub event_id: String,
    pub outcome: usize,
    pub placed: bool,
    pub won: bool,
    pub stake: f64,
    /// Net profit (negative on a loss).
    pub profit: f64,
    pub bankroll_after: f64,
    pub alerts: Vec<Alert>,
}

/// Map a prediction onto the event's classes.
///
/// A category puts `confidence` on its own class and spreads the rest
/// evenly. A number is read as the probability of class 1 in a binary
/// market. Odds for the predicted class come from the event when given.
pub fn forecast_for(prediction: &PredictionValue, confidence: f64, event: &BettingEvent) -> EngineResult<Forecast> {
    let n = event.class_count();
    if n < 2 {
        return Err(EngineError::Validation(format!(
            "event {} needs at least two classes",
            event.event_id
        )));
    }
    if !event.odds.is_empty() && event.odds.len() != n {
        return Err(EngineError::Validation(format!(
            "event {}: {} odds for {} classes",
            event.event_id,
            event.odds.len(),
            n
        )));
    }

    if !(0.0..=1.0).contains(&confidence) {
        return Err(EngineError::Validation(format!(
            "event {}: confidence {confidence} outside [0, 1]",
            event.event_id
        )));
    }

    let probabilities = match prediction {
        PredictionValue::Numeric(p) => {
            if n != 2 {
                return Err(EngineError::Validation(format!(
                    "event {}: numeric prediction needs a binary market",
                    event.event_id
                )));
            }
            let p = if p.is_finite() { p.clamp(0.0, 1.0) } else { 0.0 };
            vec![1.0 - p, p]
        }
        PredictionValue::Category(label) => {
            let idx = event.classes.iter().position(|c| c == label).ok_or_else(|| {
                EngineError::Validation(format!("event {}: unknown class {label}", event.event_id))
            })?;
            let rest = (1.0 - confidence) / (n - 1) as f64;
            (0..n).map(|i| if i == idx { confidence } else { rest }).collect()
        }
    };

    let mut forecast = Forecast::new(probabilities);
    if !event.odds.is_empty() {
        forecast.decimal_odds = Some(event.odds[forecast.predicted_class()]);
    }
    Ok(forecast)
}

fn with_event_id(features: &Features, event_id: &str) -> Features {
    let mut features = match features {
        Features::Object(map) => Features::Object(map.clone()),
        Features::Null => serde_json::json!({}),
        other => serde_json::json!({ "features": other }),
    };
    features["event_id"] = Features::String(event_id.to_string());
    features
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The assembled engine. Every component is constructed here and handed
/// out by reference; nothing is global.
pub struct Engine {
    registry: Arc<ModelRegistry>,
    ensembles: Arc<EnsembleManager>,
    orchestrator: StrategyOrchestrator,
    optimizer: OptimizationEngine,
    tracker: Arc<PerformanceTracker>,
    alerts: Arc<AlertMonitor>,
    tuner: Arc<WeightTuner>,
    /// Settled forecasts and realized classes per ensemble, oldest first.
    history: Mutex<HashMap<String, VecDeque<(Forecast, usize)>>>,
    history_len: usize,
}

impl Engine {
    /// Build every component from `config` and create the configured
    /// ensembles. Their models must already be in `registry`.
    pub fn new(
        config: &AppConfig,
        registry: Arc<ModelRegistry>,
        state: Option<BankrollState>,
    ) -> EngineResult<Self> {
        let kelly = Arc::new(match state {
            Some(state) => KellyCalculator::with_state(config.kelly.clone(), state),
            None => KellyCalculator::new(config.kelly.clone()),
        });
        let ensembles = Arc::new(EnsembleManager::new(registry.clone()));
        for ensemble in &config.ensembles {
            ensembles.create_ensemble(ensemble.clone())?;
        }

        let tuner = Arc::new(WeightTuner::new(
            config.tuner.clone(),
            config.optimizer.clone(),
            ensembles.clone(),
        ));

        info!(
            name = %config.engine.name,
            ensembles = config.ensembles.len(),
            models = registry.names().len(),
            bankroll = format!("{:.2}", kelly.bankroll_state().bankroll),
            "Engine initialised"
        );

        Ok(Self {
            registry,
            orchestrator: StrategyOrchestrator::new(BetSelector::new(config.selector.clone(), kelly)),
            ensembles,
            optimizer: OptimizationEngine::new(),
            tracker: Arc::new(PerformanceTracker::new(config.tracker.clone())),
            alerts: Arc::new(AlertMonitor::new(config.alerts.clone())),
            tuner,
            history: Mutex::new(HashMap::new()),
            history_len: config.engine.history_len.max(1),
        })
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn ensembles(&self) -> &Arc<EnsembleManager> {
        &self.ensembles
    }

    pub fn orchestrator(&self) -> &StrategyOrchestrator {
        &self.orchestrator
    }

    pub fn kelly(&self) -> &Arc<KellyCalculator> {
        self.orchestrator.kelly()
    }

    pub fn optimizer(&self) -> &OptimizationEngine {
        &self.optimizer
    }

    pub fn tracker(&self) -> &Arc<PerformanceTracker> {
        &self.tracker
    }

    pub fn alerts(&self) -> &Arc<AlertMonitor> {
        &self.alerts
    }

    pub fn tuner(&self) -> &Arc<WeightTuner> {
        &self.tuner
    }

    fn settled_history(&self, ensemble: &str) -> (Vec<Forecast>, Vec<usize>) {
        self.history
            .lock()
            .get(ensemble)
            .map(|h| h.iter().cloned().unzip())
            .unwrap_or_default()
    }

    /// Predict `event` with its ensemble and decide on a stake.
    pub async fn decide(&self, event: &BettingEvent) -> EngineResult<Decision> {
        let features = with_event_id(&event.features, &event.event_id);
        let prediction = self
            .ensembles
            .get_ensemble_prediction(&event.ensemble, &features)
            .await?;
        let forecast = forecast_for(&prediction.prediction, prediction.confidence, event)?;

        let (history, labels) = self.settled_history(&event.ensemble);
        let bankroll = self.kelly().bankroll_state().bankroll;
        let mut recommendation = self
            .orchestrator
            .recommend(&history, &labels, &forecast, bankroll)?;

        if !prediction.metadata.meets_min_confidence && recommendation.skipped.is_none() {
            recommendation.skipped = Some(SkipReason::LowConfidence);
            recommendation.stake = 0.0;
            recommendation.expected_value = 0.0;
        }

        debug!(
            event = %event.event_id,
            ensemble = %event.ensemble,
            prediction = %prediction.prediction,
            stake = format!("{:.2}", recommendation.stake),
            "Decision made"
        );

        Ok(Decision {
            event: event.clone(),
            prediction,
            forecast,
            recommendation,
            decided_at: Utc::now(),
        })
    }

    /// Settle a decision against the realized class.
    ///
    /// A placed bet moves the bankroll and the ensemble's own metrics. Every
    /// member model is scored on a unit stake at its own pick's odds, and
    /// the member outcomes are logged for weight tuning.
    pub fn record_settlement(
        &self,
        decision: &Decision,
        outcome: usize,
        settled_at: DateTime<Utc>,
    ) -> EngineResult<Settlement> {
        let event = &decision.event;
        if outcome >= decision.forecast.probabilities.len() {
            return Err(EngineError::Validation(format!(
                "event {}: outcome {outcome} out of range",
                event.event_id
            )));
        }

        let rec = &decision.recommendation;
        let placed = rec.should_place();
        let won = placed && rec.predicted_class == outcome;
        let profit = match (placed, won) {
            (false, _) => 0.0,
            (true, true) => rec.stake * (rec.decimal_odds - 1.0),
            (true, false) => -rec.stake,
        };
        let payout = if won { rec.stake * rec.decimal_odds } else { 0.0 };
        let ensemble_output =
            ModelOutput::new(decision.prediction.prediction.clone(), decision.prediction.confidence);

        // Validate everything before the first write so a rejected
        // settlement leaves bankroll and metrics untouched.
        if placed {
            PerformanceTracker::validate_prediction(&ensemble_output)?;
            PerformanceTracker::validate_outcome(rec.stake, payout, rec.decimal_odds)?;
        }
        let mut contributions: Vec<_> = decision.prediction.model_contributions.iter().collect();
        contributions.sort_by(|a, b| a.0.cmp(b.0));
        let mut scored = Vec::with_capacity(contributions.len());
        for (model, contribution) in contributions {
            let output = ModelOutput::new(contribution.prediction.clone(), contribution.confidence);
            PerformanceTracker::validate_prediction(&output)?;
            let forecast = forecast_for(&contribution.prediction, contribution.confidence, event)?;
            let odds = forecast.effective_odds().max(1.0);
            let hit = forecast.predicted_class() == outcome;
            let member_payout = if hit { odds } else { 0.0 };
            PerformanceTracker::validate_outcome(1.0, member_payout, odds)?;
            scored.push((model, output, forecast, member_payout, odds));
        }

        let mut alerts = Vec::new();
        let bankroll_after = if placed {
            let state = self.kelly().update_state(rec.stake, won, profit)?;
            self.tracker.track_prediction(&event.ensemble, &ensemble_output, rec)?;
            let metrics =
                self.tracker
                    .record_outcome_at(&event.ensemble, rec.stake, payout, rec.decimal_odds, settled_at)?;
            alerts.extend(self.alerts.monitor_performance(&event.ensemble, &metrics));
            state.bankroll
        } else {
            self.kelly().bankroll_state().bankroll
        };

        let mut members = Vec::with_capacity(scored.len());
        for (model, output, forecast, member_payout, odds) in scored {
            self.tracker.track_prediction(model, &output, rec)?;
            let metrics = self
                .tracker
                .record_outcome_at(model, 1.0, member_payout, odds, settled_at)?;
            alerts.extend(self.alerts.monitor_performance(model, &metrics));

            members.push(MemberOutcome {
                model: model.clone(),
                confidence: output.confidence,
                outcome_probability: forecast.probabilities[outcome],
            });
        }
        self.tuner.record(HistoricalRecord {
            ensemble: event.ensemble.clone(),
            timestamp: settled_at,
            members,
        });

        {
            let mut history = self.history.lock();
            let entries = history.entry(event.ensemble.clone()).or_default();
            entries.push_back((decision.forecast.clone(), outcome));
            while entries.len() > self.history_len {
                entries.pop_front();
            }
        }

        if placed {
            info!(
                event = %event.event_id,
                won,
                stake = format!("{:.2}", rec.stake),
                pnl = format!("{profit:+.2}"),
                bankroll = format!("{bankroll_after:.2}"),
                "Bet settled"
            );
        }

        Ok(Settlement {
            event_id: event.event_id.clone(),
            outcome,
            placed,
            won,
            stake: if placed { rec.stake } else { 0.0 },
            profit,
            bankroll_after,
            alerts,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

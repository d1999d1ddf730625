//! Replay of recorded events.
//!
//! A replay file is a JSON array of settled events, each carrying the
//! member models' recorded outputs. `ReplayModel` serves those outputs as a
//! `Predictor`, so a replay drives the same ensemble → sizing → settlement
//! path as live traffic.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{info, warn};

use super::{BettingEvent, Engine};
use crate::ensemble::{ModelRegistry, Predictor};
use crate::types::{EngineResult, Features, ModelOutput};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayEvent {
    #[serde(flatten)]
    pub event: BettingEvent,
    /// Index of the class that occurred.
    pub outcome: usize,
    #[serde(default = "Utc::now")]
    pub settled_at: DateTime<Utc>,
    /// Recorded output per member model.
    #[serde(default)]
    pub outputs: HashMap<String, ModelOutput>,
}

/// Load a JSON array of replay events.
pub fn load_events(path: &str) -> Result<Vec<ReplayEvent>> {
    let json = std::fs::read_to_string(path).with_context(|| format!("Failed to read replay file: {path}"))?;
    let events: Vec<ReplayEvent> =
        serde_json::from_str(&json).with_context(|| format!("Failed to parse replay file: {path}"))?;
    info!(path, events = events.len(), "Replay events loaded");
    Ok(events)
}

// ---------------------------------------------------------------------------
// Replay model
// ---------------------------------------------------------------------------

/// Predictor answering from recorded outputs, looked up by the
/// `event_id` field of the features.
#[derive(Default)]
pub struct ReplayModel {
    outputs: RwLock<HashMap<String, ModelOutput>>,
}

impl ReplayModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, event_id: impl Into<String>, output: ModelOutput) {
        self.outputs.write().insert(event_id.into(), output);
    }

    pub fn len(&self) -> usize {
        self.outputs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.read().is_empty()
    }
}

#[async_trait]
impl Predictor for ReplayModel {
    async fn predict(&self, features: &Features) -> anyhow::Result<ModelOutput> {
        let event_id = features
            .get("event_id")
            .and_then(|v| v.as_str())
            .context("features carry no event_id")?;
        self.outputs
            .read()
            .get(event_id)
            .cloned()
            .with_context(|| format!("no recorded output for event {event_id}"))
    }
}

/// Build one `ReplayModel` per model named in `events` and register them.
/// Returns the registered names, sorted.
pub fn register_replay_models(registry: &ModelRegistry, events: &[ReplayEvent]) -> Vec<String> {
    let mut models: BTreeMap<&str, ReplayModel> = BTreeMap::new();
    for event in events {
        for (model, output) in &event.outputs {
            models
                .entry(model.as_str())
                .or_default()
                .insert(event.event.event_id.clone(), output.clone());
        }
    }

    let names: Vec<String> = models.keys().map(|m| m.to_string()).collect();
    for (name, model) in models {
        info!(model = name, outputs = model.len(), "Replay model registered");
        registry.register(name, Arc::new(model));
    }
    names
}

// ---------------------------------------------------------------------------
// Replay run
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReplayReport {
    pub events: usize,
    pub bets_placed: usize,
    pub bets_won: usize,
    pub skipped: usize,
    pub failed: usize,
    pub total_staked: f64,
    pub total_profit: f64,
    pub final_bankroll: f64,
    pub alerts_raised: usize,
}

impl Engine {
    /// Run events in order through decision and settlement. An event that
    /// fails is logged, counted and skipped.
    pub async fn replay(&self, events: &[ReplayEvent]) -> EngineResult<ReplayReport> {
        let mut report = ReplayReport {
            events: events.len(),
            ..ReplayReport::default()
        };

        for replay in events {
            let result = async {
                let decision = self.decide(&replay.event).await?;
                self.record_settlement(&decision, replay.outcome, replay.settled_at)
            }
            .await;

            match result {
                Ok(settlement) => {
                    if settlement.placed {
                        report.bets_placed += 1;
                        report.total_staked += settlement.stake;
                        report.total_profit += settlement.profit;
                        if settlement.won {
                            report.bets_won += 1;
                        }
                    } else {
                        report.skipped += 1;
                    }
                    report.alerts_raised += settlement.alerts.len();
                }
                Err(e) => {
                    warn!(event = %replay.event.event_id, error = %e, "Replay event failed");
                    report.failed += 1;
                }
            }
        }

        report.final_bankroll = self.kelly().bankroll_state().bankroll;
        info!(
            events = report.events,
            placed = report.bets_placed,
            won = report.bets_won,
            failed = report.failed,
            staked = format!("{:.2}", report.total_staked),
            pnl = format!("{:+.2}", report.total_profit),
            bankroll = format!("{:.2}", report.final_bankroll),
            "Replay complete"
        );
        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_replay_model_lookup() {
        let model = ReplayModel::new();
        model.insert("e1", ModelOutput::new("home", 0.8));
        let out = model.predict(&json!({"event_id": "e1"})).await.unwrap();
        assert_eq!(out, ModelOutput::new("home", 0.8));

        let err = model.predict(&json!({"event_id": "e2"})).await.unwrap_err();
        assert!(format!("{err}").contains("e2"));
        assert!(model.predict(&json!({})).await.is_err());
    }

    #[test]
    fn test_replay_event_parsing() {
        let raw = json!([{
            "event_id": "m1",
            "ensemble": "match",
            "classes": ["home", "draw", "away"],
            "odds": [2.1, 3.4, 3.6],
            "outcome": 0,
            "outputs": {
                "elo": {"prediction": "home", "confidence": 0.7},
                "xg": {"prediction": "away", "confidence": 0.55}
            }
        }]);
        let events: Vec<ReplayEvent> = serde_json::from_value(raw).unwrap();
        assert_eq!(events[0].event.event_id, "m1");
        assert_eq!(events[0].event.classes.len(), 3);
        assert_eq!(events[0].outputs["xg"].confidence, 0.55);

        let registry = ModelRegistry::new();
        let names = register_replay_models(&registry, &events);
        assert_eq!(names, vec!["elo", "xg"]);
        assert!(registry.contains("elo"));
    }

    #[test]
    fn test_load_events_missing_file() {
        let err = load_events("/tmp/augur_no_such_replay.json").unwrap_err();
        assert!(format!("{err}").contains("Failed to read replay file"));
    }
}

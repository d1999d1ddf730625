//! Configuration loading from TOML.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs. Every
//! section is optional and falls back to its defaults, so an empty file is
//! a valid configuration.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;

use crate::engine::tuner::{OptimizerSettings, TunerConfig};
use crate::ensemble::EnsembleConfig;
use crate::performance::{AlertConfig, TrackerConfig};
use crate::storage::DEFAULT_STATE_FILE;
use crate::strategy::kelly::KellyConfig;
use crate::strategy::selector::SelectorConfig;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineSettings,
    pub kelly: KellyConfig,
    pub selector: SelectorConfig,
    pub optimizer: OptimizerSettings,
    pub tuner: TunerConfig,
    pub tracker: TrackerConfig,
    pub alerts: AlertConfig,
    pub ensembles: Vec<EnsembleConfig>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EngineSettings {
    pub name: String,
    /// Status report and state save period.
    pub cycle_interval_secs: u64,
    /// JSON array of recorded events replayed at startup.
    pub replay_file: Option<String>,
    pub state_file: String,
    /// Settled forecasts kept per ensemble for bet selection.
    pub history_len: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            name: "AUGUR-001".to_string(),
            cycle_interval_secs: 600,
            replay_file: None,
            state_file: DEFAULT_STATE_FILE.to_string(),
            history_len: 500,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ensemble::voting::VotingStrategy;
    use crate::optimize::OptimizerKind;
    use crate::performance::{AlertCondition, MetricKind};
    use crate::strategy::kelly::SizingPolicy;
    use crate::types::Severity;

    #[test]
    fn test_empty_config_uses_defaults() {
        let cfg = AppConfig::parse("").unwrap();
        assert_eq!(cfg.engine.name, "AUGUR-001");
        assert_eq!(cfg.kelly.max_fraction, 0.25);
        assert_eq!(cfg.selector.min_edge, 0.05);
        assert_eq!(cfg.tracker.max_history_length, 1000);
        assert!(cfg.alerts.use_default_thresholds);
        assert!(cfg.ensembles.is_empty());
    }

    #[test]
    fn test_full_config() {
        let cfg = AppConfig::parse(
            r#"
            [engine]
            name = "AUGUR-TEST"
            replay_file = "data/replay_sample.json"

            [kelly]
            multiplier = 0.25
            sizing = "adaptive"

            [optimizer]
            kind = "particle_swarm"
            seed = 7

            [optimizer.parameters]
            population_size = 12

            [tuner]
            min_records = 5

            [[alerts.thresholds]]
            metric = "sharpe_ratio"
            threshold = 0.0
            condition = "below"
            severity = "critical"

            [[ensembles]]
            name = "match"
            models = ["elo", "xg"]
            voting_strategy = "majority"

            [[ensembles]]
            name = "totals"
            models = ["poisson"]
            voting_strategy = "weighted"
            weights = { poisson = 1.0 }
            min_confidence = 0.6
            "#,
        )
        .unwrap();

        assert_eq!(cfg.engine.name, "AUGUR-TEST");
        assert_eq!(cfg.engine.replay_file.as_deref(), Some("data/replay_sample.json"));
        assert_eq!(cfg.kelly.multiplier, 0.25);
        assert_eq!(cfg.kelly.sizing, SizingPolicy::Adaptive);
        assert_eq!(cfg.kelly.max_fraction, 0.25);
        assert_eq!(cfg.optimizer.kind, OptimizerKind::ParticleSwarm);
        assert_eq!(cfg.optimizer.seed, Some(7));
        assert_eq!(cfg.optimizer.parameters.population_size, 12);
        assert_eq!(cfg.tuner.min_records, 5);

        let t = &cfg.alerts.thresholds[0];
        assert_eq!(t.metric, MetricKind::SharpeRatio);
        assert_eq!(t.condition, AlertCondition::Below);
        assert_eq!(t.severity, Severity::Critical);

        assert_eq!(cfg.ensembles.len(), 2);
        assert_eq!(cfg.ensembles[0].voting_strategy, VotingStrategy::Majority);
        assert_eq!(cfg.ensembles[0].min_models, 1);
        assert_eq!(cfg.ensembles[1].weight("poisson"), 1.0);
    }

    #[test]
    fn test_bad_config_is_error() {
        assert!(AppConfig::parse("[kelly]\nmultiplier = \"lots\"").is_err());
        let err = AppConfig::load("/tmp/augur_missing_config.toml").unwrap_err();
        assert!(format!("{err}").contains("Failed to read config file"));
    }

    #[test]
    fn test_repository_config_parses() {
        // Present when run from the crate root.
        if let Ok(cfg) = AppConfig::load("config.toml") {
            assert!(!cfg.ensembles.is_empty());
            assert!(cfg.kelly.multiplier > 0.0 && cfg.kelly.multiplier <= 1.0);
        }
    }
}

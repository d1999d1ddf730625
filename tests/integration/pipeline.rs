//! End-to-end pipeline tests with mock models.

use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};

use augur::config::AppConfig;
use augur::engine::replay::ReplayEvent;
use augur::engine::{BettingEvent, Engine};
use augur::ensemble::voting::VotingStrategy;
use augur::ensemble::{EnsembleConfig, EnsembleManager, ModelRegistry};
use augur::performance::{AlertCondition, AlertConfig, AlertThreshold, MetricKind};
use augur::strategy::SkipReason;
use augur::types::{EngineError, ModelOutput, Severity};

use crate::mock_models::{MockModel, ScriptedModel};

fn event(id: &str) -> BettingEvent {
    BettingEvent {
        event_id: id.to_string(),
        ensemble: "match".to_string(),
        features: json!({"league": "serie-a"}),
        classes: vec!["home".into(), "draw".into(), "away".into()],
        odds: vec![2.0, 3.4, 3.9],
    }
}

fn config() -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.ensembles = vec![EnsembleConfig::new("match", &["elo", "xg"], VotingStrategy::Weighted)
        .with_weights(&[("elo", 0.6), ("xg", 0.4)])];
    cfg
}

#[tokio::test]
async fn test_fan_out_calls_every_member_once() {
    let elo = Arc::new(ScriptedModel::constant(ModelOutput::new("home", 0.8)));
    let xg = Arc::new(ScriptedModel::constant(ModelOutput::new("home", 0.9)));
    let registry = Arc::new(ModelRegistry::new());
    registry.register("elo", elo.clone());
    registry.register("xg", xg.clone());
    let engine = Engine::new(&config(), registry, None).unwrap();

    let decision = engine.decide(&event("g1")).await.unwrap();
    assert_eq!(elo.calls(), 1);
    assert_eq!(xg.calls(), 1);
    // 0.8·0.6 + 0.9·0.4
    assert!((decision.prediction.confidence - 0.84).abs() < 1e-12);
    assert_eq!(decision.prediction.model_contributions.len(), 2);
    assert!(decision.recommendation.should_place());
}

#[tokio::test]
async fn test_member_failure_fails_decision() {
    let elo = Arc::new(ScriptedModel::constant(ModelOutput::new("home", 0.8)));
    let xg = Arc::new(ScriptedModel::constant(ModelOutput::new("home", 0.9)));
    let registry = Arc::new(ModelRegistry::new());
    registry.register("elo", elo.clone());
    registry.register("xg", xg.clone());
    let engine = Engine::new(&config(), registry, None).unwrap();

    xg.set_error("model server timeout");
    let err = engine.decide(&event("g1")).await.unwrap_err();
    match err {
        EngineError::UpstreamPrediction { model, message } => {
            assert_eq!(model, "xg");
            assert!(message.contains("timeout"));
        }
        other => panic!("unexpected error: {other}"),
    }

    xg.clear_error();
    assert_ok!(engine.decide(&event("g2")).await);
}

#[tokio::test]
async fn test_replay_counts_failed_events() {
    let mut flaky = MockModel::new();
    flaky.expect_predict().returning(|features| {
        if features["event_id"] == "bad" {
            Err(anyhow::anyhow!("unavailable"))
        } else {
            Ok(ModelOutput::new("away", 0.85))
        }
    });
    let registry = Arc::new(ModelRegistry::new());
    registry.register("elo", Arc::new(flaky));
    registry.register("xg", Arc::new(ScriptedModel::constant(ModelOutput::new("away", 0.8))));
    let engine = Engine::new(&config(), registry, None).unwrap();

    let events: Vec<ReplayEvent> = ["ok-1", "bad", "ok-2"]
        .iter()
        .map(|id| ReplayEvent {
            event: event(id),
            outcome: 2,
            settled_at: Utc::now(),
            outputs: HashMap::new(),
        })
        .collect();

    let report = engine.replay(&events).await.unwrap();
    assert_eq!(report.events, 3);
    assert_eq!(report.failed, 1);
    assert_eq!(report.bets_placed + report.skipped, 2);
    assert_eq!(engine.tuner().record_count("match"), 2);
}

#[tokio::test]
async fn test_min_confidence_blocks_stake() {
    let registry = Arc::new(ModelRegistry::new());
    registry.register("elo", Arc::new(ScriptedModel::constant(ModelOutput::new("home", 0.8))));
    registry.register("xg", Arc::new(ScriptedModel::constant(ModelOutput::new("home", 0.8))));
    let mut cfg = config();
    cfg.ensembles[0].min_confidence = 0.95;
    let engine = Engine::new(&cfg, registry, None).unwrap();

    let decision = engine.decide(&event("g1")).await.unwrap();
    assert!(!decision.prediction.metadata.meets_min_confidence);
    assert_eq!(decision.recommendation.skipped, Some(SkipReason::LowConfidence));
    assert_eq!(decision.recommendation.stake, 0.0);
}

#[tokio::test]
async fn test_custom_alert_threshold_fires_through_pipeline() {
    let registry = Arc::new(ModelRegistry::new());
    registry.register("elo", Arc::new(ScriptedModel::constant(ModelOutput::new("home", 0.8))));
    registry.register("xg", Arc::new(ScriptedModel::constant(ModelOutput::new("draw", 0.75))));
    let mut cfg = config();
    cfg.alerts = AlertConfig {
        max_alerts: 100,
        use_default_thresholds: false,
        thresholds: vec![AlertThreshold::new(
            MetricKind::WinRate,
            AlertCondition::Below,
            0.5,
            Severity::Critical,
        )],
    };
    let engine = Engine::new(&cfg, registry, None).unwrap();

    // Away wins: both members miss.
    let decision = engine.decide(&event("g1")).await.unwrap();
    let settlement = engine.record_settlement(&decision, 2, Utc::now()).unwrap();
    assert!(!settlement.alerts.is_empty());

    let xg_alerts = engine.alerts().get_alerts(Some("xg"), Some(Severity::Critical), None);
    assert_eq!(xg_alerts.len(), 1);
    assert_eq!(xg_alerts[0].metric, MetricKind::WinRate);
    assert_eq!(xg_alerts[0].value, 0.0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_predictions_never_see_torn_weights() {
    let registry = Arc::new(ModelRegistry::new());
    registry.register("elo", Arc::new(ScriptedModel::constant(ModelOutput::new(1.0, 0.9))));
    registry.register("xg", Arc::new(ScriptedModel::constant(ModelOutput::new(0.0, 0.9))));
    let manager = Arc::new(EnsembleManager::new(registry));
    manager
        .create_ensemble(
            EnsembleConfig::new("m", &["elo", "xg"], VotingStrategy::Weighted)
                .with_weights(&[("elo", 0.5), ("xg", 0.5)]),
        )
        .unwrap();

    let writer = {
        let manager = manager.clone();
        tokio::spawn(async move {
            for i in 0..200 {
                let (a, b) = if i % 2 == 0 { (0.3, 0.7) } else { (0.7, 0.3) };
                let weights = HashMap::from([("elo".to_string(), a), ("xg".to_string(), b)]);
                manager.update_ensemble_weights("m", weights).unwrap();
                tokio::task::yield_now().await;
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let manager = manager.clone();
            tokio::spawn(async move {
                for _ in 0..100 {
                    let p = manager.get_ensemble_prediction("m", &json!({})).await.unwrap();
                    // elo predicts 1.0, xg 0.0: the blend equals elo's weight.
                    let value = p.prediction.as_f64().unwrap();
                    let elo_weight = p.model_contributions["elo"].weight;
                    let xg_weight = p.model_contributions["xg"].weight;
                    assert!((value - elo_weight).abs() < 1e-12);
                    assert!((elo_weight + xg_weight - 1.0).abs() < 1e-12);
                }
            })
        })
        .collect();

    writer.await.unwrap();
    for r in readers {
        r.await.unwrap();
    }
}

#[test]
fn test_unknown_ensemble_is_not_found() {
    let registry = Arc::new(ModelRegistry::new());
    registry.register("elo", Arc::new(ScriptedModel::constant(ModelOutput::new("home", 0.8))));
    registry.register("xg", Arc::new(ScriptedModel::constant(ModelOutput::new("home", 0.8))));
    let engine = Engine::new(&config(), registry, None).unwrap();

    let mut e = event("g1");
    e.ensemble = "ghost".into();
    let result = tokio_test::block_on(engine.decide(&e));
    assert_err!(&result);
    assert!(matches!(result, Err(EngineError::NotFound(_))));
}

//! Replay simulation.
//!
//! Replays the bundled sample events through the full pipeline with the
//! repository configuration: ensemble inference, sizing, settlement,
//! performance tracking, alerting, weight tuning and state persistence.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use augur::config::AppConfig;
use augur::engine::replay::{load_events, register_replay_models};
use augur::engine::Engine;
use augur::ensemble::ModelRegistry;
use augur::performance::MetricKind;
use augur::storage;
use augur::types::Timeframe;

fn path(rel: &str) -> String {
    format!("{}/{rel}", env!("CARGO_MANIFEST_DIR"))
}

fn build() -> (Engine, Vec<augur::engine::replay::ReplayEvent>) {
    let cfg = AppConfig::load(&path("config.toml")).unwrap();
    let events = load_events(&path("data/replay_sample.json")).unwrap();
    let registry = Arc::new(ModelRegistry::new());
    let models = register_replay_models(&registry, &events);
    assert_eq!(models, vec!["elo", "form", "market_model", "poisson", "xg"]);
    (Engine::new(&cfg, registry, None).unwrap(), events)
}

#[tokio::test]
async fn test_sample_replay_runs_clean() {
    let (engine, events) = build();
    let report = engine.replay(&events).await.unwrap();

    assert_eq!(report.events, 50);
    assert_eq!(report.failed, 0);
    assert_eq!(report.bets_placed + report.skipped, 50);
    assert!(report.bets_won <= report.bets_placed);

    let state = engine.kelly().bankroll_state();
    assert_eq!(state.total_bets as usize, report.bets_placed);
    assert!((state.bankroll - (1000.0 + report.total_profit)).abs() < 1e-6);

    // Every member is scored on every event of its ensemble.
    let elo = engine.tracker().get_model_performance("elo").unwrap();
    assert_eq!(elo.settled_bets, 30);
    assert_eq!(elo.total_predictions, 30);
    let poisson = engine.tracker().get_model_performance("poisson").unwrap();
    assert_eq!(poisson.settled_bets, 20);

    // Settlement timestamps are in the past; the full history is kept.
    assert_eq!(engine.tracker().get_performance_history("xg", Timeframe::All).len(), 60);

    assert_eq!(engine.tuner().record_count("match"), 30);
    assert_eq!(engine.tuner().record_count("totals"), 20);

    let ranked = engine.tracker().get_top_performing_models(MetricKind::WinRate, 10);
    for pair in ranked.windows(2) {
        assert!(pair[0].metrics.win_rate >= pair[1].metrics.win_rate);
    }
}

#[tokio::test]
async fn test_tuning_after_replay_publishes_valid_weights() {
    let (engine, events) = build();
    engine.replay(&events).await.unwrap();

    let reports = engine.tuner().tune_all(&CancellationToken::new()).await;
    assert_eq!(reports.len(), 2);
    for report in &reports {
        let total: f64 = report.weights.values().sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert!(report.weights.values().all(|w| *w > 0.0));

        let config = engine.ensembles().get_ensemble_config(&report.ensemble).unwrap();
        for (model, weight) in &report.weights {
            assert!((config.weight(model) - weight).abs() < 1e-12);
        }
    }
}

#[tokio::test]
async fn test_state_survives_restart() {
    let (engine, events) = build();
    engine.replay(&events).await.unwrap();

    let state_path = std::env::temp_dir()
        .join(format!("augur_sim_state_{}.json", uuid::Uuid::new_v4()))
        .to_string_lossy()
        .to_string();
    let before = engine.kelly().bankroll_state();
    storage::save_state(&before, Some(&state_path)).unwrap();

    let cfg = AppConfig::load(&path("config.toml")).unwrap();
    let registry = Arc::new(ModelRegistry::new());
    register_replay_models(&registry, &events);
    let restored = storage::load_state(Some(&state_path)).unwrap();
    let resumed = Engine::new(&cfg, registry, restored).unwrap();

    let after = resumed.kelly().bankroll_state();
    assert_eq!(after.total_bets, before.total_bets);
    assert!((after.bankroll - before.bankroll).abs() < 1e-9);

    storage::delete_state(Some(&state_path)).unwrap();
}

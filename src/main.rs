//! AUGUR: prediction ensembling and stake-decision engine
//!
//! Entry point. Loads configuration, initialises structured logging,
//! restores the bankroll from disk (or starts fresh), replays recorded
//! events, then keeps the weight tuner running and reports on an interval
//! until Ctrl+C.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use augur::config;
use augur::engine::replay::{self, ReplayReport};
use augur::engine::Engine;
use augur::ensemble::ModelRegistry;
use augur::performance::MetricKind;
use augur::storage;

const BANNER: &str = r#"
    _   _   _  ___ _   _ ___
   /_\ | | | |/ __| | | | _ \
  / _ \| |_| | (_ | |_| |   /
 /_/ \_\___/ \___|\___/|_|_\

  Ensemble predictions, Kelly-sized stakes
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = std::env::var("AUGUR_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = config::AppConfig::load(&config_path)?;

    init_logging();

    println!("{BANNER}");
    info!(
        name = %cfg.engine.name,
        ensembles = cfg.ensembles.len(),
        cycle_interval_secs = cfg.engine.cycle_interval_secs,
        "AUGUR starting up"
    );

    // -- Restore or create state -----------------------------------------

    let state_file = cfg.engine.state_file.clone();
    let state = storage::load_state(Some(&state_file))?;
    match &state {
        Some(s) => info!(
            bankroll = format!("{:.2}", s.bankroll),
            bets = s.total_bets,
            "Resumed from saved state"
        ),
        None => info!(bankroll = cfg.kelly.initial_bankroll, "Fresh start"),
    }

    // -- Models and engine -----------------------------------------------

    let registry = Arc::new(ModelRegistry::new());
    let events = match &cfg.engine.replay_file {
        Some(path) => {
            let events = replay::load_events(path)?;
            replay::register_replay_models(&registry, &events);
            events
        }
        None => {
            warn!("No replay file configured; ensembles must reference registered models");
            Vec::new()
        }
    };

    let engine = Engine::new(&cfg, registry, state).context("Failed to build engine")?;

    if !events.is_empty() {
        let report = engine.replay(&events).await?;
        log_replay_report(&report);
        if let Err(e) = storage::save_state(&engine.kelly().bankroll_state(), Some(&state_file)) {
            error!(error = %e, "Failed to save state");
        }
    }

    // -- Background tuning -----------------------------------------------

    let cancel = CancellationToken::new();
    let tuner_handle = if cfg.tuner.enabled {
        Some(engine.tuner().clone().spawn(cancel.child_token()))
    } else {
        info!("Weight tuning disabled");
        None
    };

    // -- Main loop -------------------------------------------------------

    let mut interval = tokio::time::interval(Duration::from_secs(cfg.engine.cycle_interval_secs.max(1)));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        interval_secs = cfg.engine.cycle_interval_secs,
        "Entering main loop. Press Ctrl+C to stop."
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                log_status(&engine);
                if let Err(e) = storage::save_state(&engine.kelly().bankroll_state(), Some(&state_file)) {
                    error!(error = %e, "Failed to save state");
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    cancel.cancel();
    if let Some(handle) = tuner_handle {
        if let Err(e) = handle.await {
            error!(error = %e, "Tuner task panicked");
        }
    }

    let final_state = engine.kelly().bankroll_state();
    storage::save_state(&final_state, Some(&state_file))?;
    info!(
        bankroll = format!("{:.2}", final_state.bankroll),
        peak = format!("{:.2}", final_state.peak_bankroll),
        bets = final_state.total_bets,
        "AUGUR shut down cleanly."
    );

    Ok(())
}

/// Log a human-readable replay summary.
fn log_replay_report(report: &ReplayReport) {
    let win_rate = if report.bets_placed > 0 {
        report.bets_won as f64 / report.bets_placed as f64
    } else {
        0.0
    };
    info!(
        events = report.events,
        placed = report.bets_placed,
        skipped = report.skipped,
        failed = report.failed,
        win_rate = format!("{:.1}%", win_rate * 100.0),
        pnl = format!("{:+.2}", report.total_profit),
        alerts = report.alerts_raised,
        "Replay summary"
    );
}

/// Bankroll, weights and leading models.
fn log_status(engine: &Engine) {
    let state = engine.kelly().bankroll_state();
    info!(
        bankroll = format!("{:.2}", state.bankroll),
        drawdown = format!("{:.1}%", state.current_drawdown() * 100.0),
        bets = state.total_bets,
        "Status"
    );
    for name in engine.ensembles().list_ensembles() {
        if let Some(config) = engine.ensembles().get_ensemble_config(&name) {
            info!(ensemble = %name, weights = ?config.weights, "Ensemble weights");
        }
    }
    for ranked in engine.tracker().get_top_performing_models(MetricKind::Roi, 3) {
        info!(
            model = %ranked.model_name,
            roi = format!("{:.2}%", ranked.metrics.roi * 100.0),
            win_rate = format!("{:.1}%", ranked.metrics.win_rate * 100.0),
            calibration = format!("{:.3}", ranked.metrics.calibration_score),
            "Top model"
        );
    }
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("augur=info"));

    let json_logging = std::env::var("AUGUR_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt().with_env_filter(env_filter).with_target(true).init();
    }
}

//! Bankroll snapshots on disk.
//!
//! The Kelly calculator's `BankrollState` (balance, peak, bet counters and
//! the retained settlement history) is written as pretty JSON after each
//! status tick and read back at startup, so sizing resumes from the same
//! drawdown and win-rate history. Writes go to a sibling temp file that is
//! renamed over the snapshot, so a crash mid-write keeps the previous one.

use anyhow::{bail, Context, Result};
use std::path::Path;
use tracing::{debug, info};

use crate::strategy::kelly::BankrollState;

/// Snapshot path used when none is configured.
pub const DEFAULT_STATE_FILE: &str = "augur_state.json";

/// Write a bankroll snapshot, replacing any previous one.
pub fn save_state(state: &BankrollState, path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);
    let json = serde_json::to_string_pretty(state).context("Failed to serialise bankroll state")?;

    let tmp = format!("{path}.tmp");
    std::fs::write(&tmp, &json).context(format!("Failed to write state to {tmp}"))?;
    std::fs::rename(&tmp, path).context(format!("Failed to move state into {path}"))?;

    debug!(
        path,
        bankroll = format!("{:.2}", state.bankroll),
        bets = state.total_bets,
        history = state.history.len(),
        "Bankroll snapshot saved"
    );
    Ok(())
}

/// Read the bankroll snapshot. `None` when no snapshot exists yet.
///
/// A snapshot whose figures cannot describe a real bankroll (non-finite
/// balances, more wins than bets, more history than bets) is an error
/// rather than a silent reset.
pub fn load_state(path: Option<&str>) -> Result<Option<BankrollState>> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);

    if !Path::new(path).exists() {
        info!(path, "No bankroll snapshot found, starting from the configured bankroll");
        return Ok(None);
    }

    let json = std::fs::read_to_string(path).context(format!("Failed to read state from {path}"))?;
    let state: BankrollState =
        serde_json::from_str(&json).context(format!("Failed to parse state from {path}"))?;
    check_snapshot(&state).context(format!("Inconsistent state in {path}"))?;

    info!(
        path,
        bankroll = format!("{:.2}", state.bankroll),
        peak = format!("{:.2}", state.peak_bankroll),
        drawdown = format!("{:.1}%", state.current_drawdown() * 100.0),
        bets = state.total_bets,
        "Bankroll snapshot restored"
    );

    Ok(Some(state))
}

fn check_snapshot(state: &BankrollState) -> Result<()> {
    for (name, value) in [
        ("bankroll", state.bankroll),
        ("peak_bankroll", state.peak_bankroll),
        ("initial_bankroll", state.initial_bankroll),
    ] {
        if !value.is_finite() {
            bail!("{name} is not a finite number");
        }
    }
    if state.wins > state.total_bets {
        bail!("{} wins recorded for {} bets", state.wins, state.total_bets);
    }
    if state.history.len() as u64 > state.total_bets {
        bail!(
            "{} history records for {} bets",
            state.history.len(),
            state.total_bets
        );
    }
    Ok(())
}

/// Remove the snapshot so the next start uses the configured bankroll.
pub fn delete_state(path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);
    if Path::new(path).exists() {
        std::fs::remove_file(path).context(format!("Failed to delete state file {path}"))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Kelly criterion stake sizing.
//!
//! Turns a stream of forecast/outcome pairs into `KellyMetrics`, decides
//! whether a bet is worth placing, and converts the down-weighted Kelly
//! fraction into a stake under a pluggable sizing policy. Settled bets are
//! recorded into a bounded `BankrollState`, which feeds the ancillary
//! statistics and the adaptive policy.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

use crate::types::{EngineError, EngineResult, Forecast};

/// Trailing window used by the adaptive sizing policy.
const ADAPTIVE_WINDOW: usize = 20;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// How a Kelly fraction becomes a stake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizingPolicy {
    /// `bankroll × fraction`
    Fixed,
    /// `bankroll × fraction × confidence`
    Dynamic,
    /// `bankroll × fraction × trailing-performance multiplier`
    Adaptive,
}

/// Kelly sizing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KellyConfig {
    /// Hard cap on the fraction of bankroll staked on one bet.
    pub max_fraction: f64,
    /// Bets below this aggregate confidence are never placed.
    pub min_confidence: f64,
    /// Bets above this risk level (coefficient of variation) are never placed.
    pub max_risk_level: f64,
    /// Fractional Kelly multiplier (0.5 = half-Kelly).
    pub multiplier: f64,
    /// Stakes below this amount are rounded down to zero.
    pub min_stake: f64,
    pub sizing: SizingPolicy,
    /// Settled bets retained in the bankroll state.
    pub history_len: usize,
    pub initial_bankroll: f64,
}

impl Default for KellyConfig {
    fn default() -> Self {
        Self {
            max_fraction: 0.25,
            min_confidence: 0.6,
            max_risk_level: 0.3,
            multiplier: 0.5,
            min_stake: 1.0,
            sizing: SizingPolicy::Fixed,
            history_len: 1000,
            initial_bankroll: 1000.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Sizing metrics for one analyzed forecast batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KellyMetrics {
    /// Down-weighted Kelly fraction, within `[0, max_fraction]`.
    pub fraction: f64,
    /// Per-unit expected value `p·b − q`.
    pub expected_value: f64,
    pub risk_adjusted_return: f64,
    /// `fraction × current bankroll`.
    pub optimal_stake: f64,
    /// Mean predicted-class probability.
    pub confidence: f64,
    /// Mean normalized entropy of the forecasts (0 = certain, 1 = uniform).
    pub uncertainty: f64,
    /// Standard deviation of the predicted-class probabilities.
    pub volatility: f64,
    /// Coefficient of variation of the predicted-class probabilities.
    pub risk_level: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
    pub win_rate: f64,
    pub profit_factor: f64,
}

// ---------------------------------------------------------------------------
// Bankroll state
// ---------------------------------------------------------------------------

/// One settled bet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BetRecord {
    pub stake: f64,
    pub won: bool,
    /// Net profit (negative on a loss).
    pub profit: f64,
    pub bankroll_after: f64,
    pub timestamp: DateTime<Utc>,
}

/// Bankroll and recent settled bets. Replaced wholesale on every update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankrollState {
    pub initial_bankroll: f64,
    pub bankroll: f64,
    pub peak_bankroll: f64,
    pub total_bets: u64,
    pub wins: u64,
    pub history: VecDeque<BetRecord>,
    pub updated_at: DateTime<Utc>,
}

impl BankrollState {
    pub fn new(initial_bankroll: f64) -> Self {
        Self {
            initial_bankroll,
            bankroll: initial_bankroll,
            peak_bankroll: initial_bankroll,
            total_bets: 0,
            wins: 0,
            history: VecDeque::new(),
            updated_at: Utc::now(),
        }
    }

    /// Current drawdown from the peak bankroll (0–1).
    pub fn current_drawdown(&self) -> f64 {
        if self.peak_bankroll > 0.0 {
            ((self.peak_bankroll - self.bankroll) / self.peak_bankroll).max(0.0)
        } else {
            0.0
        }
    }

    /// Bankroll before the oldest retained record.
    fn window_start(&self) -> f64 {
        match self.history.front() {
            Some(first) => first.bankroll_after - first.profit,
            None => self.bankroll,
        }
    }
}

// ---------------------------------------------------------------------------
// Kelly calculator
// ---------------------------------------------------------------------------

pub struct KellyCalculator {
    config: KellyConfig,
    state: RwLock<Arc<BankrollState>>,
}

impl KellyCalculator {
    pub fn new(config: KellyConfig) -> Self {
        let state = BankrollState::new(config.initial_bankroll);
        Self {
            config,
            state: RwLock::new(Arc::new(state)),
        }
    }

    /// Start from a previously persisted bankroll state.
    pub fn with_state(config: KellyConfig, state: BankrollState) -> Self {
        Self {
            config,
            state: RwLock::new(Arc::new(state)),
        }
    }

    /// Access the Kelly configuration.
    pub fn config(&self) -> &KellyConfig {
        &self.config
    }

    /// Snapshot of the current bankroll state.
    pub fn bankroll_state(&self) -> Arc<BankrollState> {
        self.state.read().clone()
    }

    /// Raw Kelly fraction `f* = (b·p − q) / b`, 0 when `b` is not positive.
    pub fn raw_fraction(p: f64, b: f64) -> f64 {
        if b <= 0.0 || !b.is_finite() {
            return 0.0;
        }
        (b * p - (1.0 - p)) / b
    }

    /// Shrink a raw fraction by confidence and volatility, then clamp it.
    pub fn adjust_fraction(&self, raw: f64, confidence: f64, volatility: f64) -> f64 {
        let shrink = self.config.multiplier * confidence / (1.0 + volatility);
        let adjusted = raw * shrink;
        if adjusted.is_finite() {
            adjusted.clamp(0.0, self.config.max_fraction)
        } else {
            0.0
        }
    }

    /// Compute sizing metrics from forecasts and their realized class labels.
    pub fn analyze(&self, forecasts: &[Forecast], labels: &[usize]) -> EngineResult<KellyMetrics> {
        if forecasts.len() != labels.len() {
            return Err(EngineError::Validation(format!(
                "{} forecasts but {} labels",
                forecasts.len(),
                labels.len()
            )));
        }
        if forecasts.is_empty() {
            return Ok(KellyMetrics::default());
        }

        let n = forecasts.len() as f64;
        let hits: Vec<bool> = forecasts
            .iter()
            .zip(labels)
            .map(|(f, label)| f.predicted_class() == *label)
            .collect();

        let p = hits.iter().filter(|h| **h).count() as f64 / n;
        let b = forecasts.iter().map(Forecast::net_odds).sum::<f64>() / n;

        let confidences: Vec<f64> = forecasts.iter().map(Forecast::confidence).collect();
        let confidence = mean(&confidences);
        let volatility = std_dev(&confidences);
        let risk_level = ratio(volatility, confidence);
        let uncertainty = forecasts.iter().map(normalized_entropy).sum::<f64>() / n;

        let raw = Self::raw_fraction(p, b);
        let fraction = self.adjust_fraction(raw, confidence, volatility);
        let expected_value = p * b - (1.0 - p);

        let state = self.bankroll_state();
        let ancillary = if state.history.is_empty() {
            // Unit stake per pair.
            let returns: Vec<(f64, f64)> = forecasts
                .iter()
                .zip(&hits)
                .map(|(f, hit)| (1.0, if *hit { f.net_odds() } else { -1.0 }))
                .collect();
            Ancillary::from_bets(&returns, n)
        } else {
            let bets: Vec<(f64, f64)> = state.history.iter().map(|r| (r.stake, r.profit)).collect();
            Ancillary::from_bets(&bets, state.window_start())
        };

        let metrics = KellyMetrics {
            fraction,
            expected_value,
            risk_adjusted_return: ratio(expected_value, volatility),
            optimal_stake: fraction * state.bankroll.max(0.0),
            confidence,
            uncertainty,
            volatility,
            risk_level,
            sharpe_ratio: ancillary.sharpe_ratio,
            max_drawdown: ancillary.max_drawdown,
            win_rate: ancillary.win_rate,
            profit_factor: ancillary.profit_factor,
        };

        debug!(
            samples = forecasts.len(),
            win_prob = format!("{:.1}%", p * 100.0),
            net_odds = format!("{b:.3}"),
            raw_kelly = format!("{:.2}%", raw * 100.0),
            fraction = format!("{:.2}%", fraction * 100.0),
            ev = format!("{expected_value:.4}"),
            "Kelly analysis complete"
        );

        Ok(metrics)
    }

    /// Go/no-go: confident enough, positive expectation, within risk.
    pub fn should_place_bet(&self, metrics: &KellyMetrics) -> bool {
        metrics.confidence >= self.config.min_confidence
            && metrics.expected_value > 0.0
            && metrics.risk_level <= self.config.max_risk_level
    }

    /// Stake for `metrics` under the configured sizing policy.
    ///
    /// Never exceeds `bankroll × max_fraction`; stakes below `min_stake`
    /// and non-positive bankrolls yield 0.
    pub fn get_bet_size(&self, metrics: &KellyMetrics, bankroll: f64) -> f64 {
        if bankroll <= 0.0 || !bankroll.is_finite() {
            return 0.0;
        }
        let fraction = if metrics.fraction.is_finite() {
            metrics.fraction.clamp(0.0, self.config.max_fraction)
        } else {
            0.0
        };

        let stake = match self.config.sizing {
            SizingPolicy::Fixed => bankroll * fraction,
            SizingPolicy::Dynamic => bankroll * fraction * clamp_unit(metrics.confidence),
            SizingPolicy::Adaptive => bankroll * fraction * self.adaptive_multiplier(),
        };
        let stake = stake.min(bankroll * self.config.max_fraction).max(0.0);

        if stake < self.config.min_stake {
            debug!(
                stake = format!("{stake:.2}"),
                min = self.config.min_stake,
                "Stake below minimum size"
            );
            return 0.0;
        }
        stake
    }

    /// Multiplier from trailing win rate and current drawdown, within
    /// `[0.25, 1.5]`. Neutral until enough bets have settled.
    pub fn adaptive_multiplier(&self) -> f64 {
        let state = self.bankroll_state();
        if state.history.len() < ADAPTIVE_WINDOW / 2 {
            return 1.0;
        }
        let recent: Vec<&BetRecord> = state.history.iter().rev().take(ADAPTIVE_WINDOW).collect();
        let win_rate = recent.iter().filter(|r| r.won).count() as f64 / recent.len() as f64;
        ((0.5 + win_rate) * (1.0 - state.current_drawdown())).clamp(0.25, 1.5)
    }

    /// Record a settled bet; the state is replaced in one step.
    pub fn update_state(&self, stake: f64, won: bool, profit: f64) -> EngineResult<Arc<BankrollState>> {
        if !stake.is_finite() || stake < 0.0 {
            return Err(EngineError::Validation(format!("invalid stake {stake}")));
        }
        if !profit.is_finite() {
            return Err(EngineError::Validation(format!("invalid profit {profit}")));
        }

        let mut guard = self.state.write();
        let mut next = BankrollState::clone(&guard);
        next.bankroll += profit;
        next.peak_bankroll = next.peak_bankroll.max(next.bankroll);
        next.total_bets += 1;
        if won {
            next.wins += 1;
        }
        next.updated_at = Utc::now();
        next.history.push_back(BetRecord {
            stake,
            won,
            profit,
            bankroll_after: next.bankroll,
            timestamp: next.updated_at,
        });
        while next.history.len() > self.config.history_len.max(1) {
            next.history.pop_front();
        }

        let next = Arc::new(next);
        *guard = next.clone();
        drop(guard);

        debug!(
            stake = format!("{stake:.2}"),
            won,
            profit = format!("{profit:+.2}"),
            bankroll = format!("{:.2}", next.bankroll),
            "Bankroll updated"
        );
        Ok(next)
    }
}

// ---------------------------------------------------------------------------
// Statistics helpers
// ---------------------------------------------------------------------------

/// Reporting statistics over a `(stake, profit)` sequence.
struct Ancillary {
    sharpe_ratio: f64,
    max_drawdown: f64,
    win_rate: f64,
    profit_factor: f64,
}

impl Ancillary {
    fn from_bets(bets: &[(f64, f64)], starting_bankroll: f64) -> Self {
        if bets.is_empty() {
            return Self {
                sharpe_ratio: 0.0,
                max_drawdown: 0.0,
                win_rate: 0.0,
                profit_factor: 0.0,
            };
        }

        let returns: Vec<f64> = bets
            .iter()
            .map(|(stake, profit)| ratio(*profit, *stake))
            .collect();
        let gross_profit: f64 = bets.iter().map(|(_, p)| p.max(0.0)).sum();
        let gross_loss: f64 = bets.iter().map(|(_, p)| (-p).max(0.0)).sum();
        let wins = bets.iter().filter(|(_, p)| *p > 0.0).count();

        let mut equity = starting_bankroll;
        let mut peak = equity;
        let mut max_drawdown: f64 = 0.0;
        for (_, profit) in bets {
            equity += profit;
            peak = peak.max(equity);
            if peak > 0.0 {
                max_drawdown = max_drawdown.max((peak - equity) / peak);
            }
        }

        Self {
            sharpe_ratio: ratio(mean(&returns), std_dev(&returns)),
            max_drawdown,
            win_rate: wins as f64 / bets.len() as f64,
            profit_factor: ratio(gross_profit, gross_loss),
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation.
fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

/// `num / den`, 0 when the denominator is zero.
fn ratio(num: f64, den: f64) -> f64 {
    if den == 0.0 || !den.is_finite() {
        0.0
    } else {
        num / den
    }
}

fn clamp_unit(v: f64) -> f64 {
    if v.is_finite() {
        v.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn normalized_entropy(forecast: &Forecast) -> f64 {
    let k = forecast.probabilities.len();
    if k < 2 {
        return 0.0;
    }
    let h: f64 = forecast
        .probabilities
        .iter()
        .filter(|p| **p > 0.0)
        .map(|p| -p * p.ln())
        .sum();
    (h / (k as f64).ln()).clamp(0.0, 1.0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn calc_with(f: impl FnOnce(&mut KellyConfig)) -> KellyCalculator {
        let mut config = KellyConfig::default();
        f(&mut config);
        KellyCalculator::new(config)
    }

    fn metrics(fraction: f64, confidence: f64, ev: f64, risk: f64) -> KellyMetrics {
        KellyMetrics {
            fraction,
            confidence,
            expected_value: ev,
            risk_level: risk,
            ..Default::default()
        }
    }

    #[test]
    fn test_raw_fraction() {
        // p = 0.6 at even money: f* = (0.6 − 0.4) / 1 = 0.2
        assert!((KellyCalculator::raw_fraction(0.6, 1.0) - 0.2).abs() < 1e-12);
        assert!(KellyCalculator::raw_fraction(0.4, 1.0) < 0.0);
        assert_eq!(KellyCalculator::raw_fraction(0.9, 0.0), 0.0);
    }

    #[test]
    fn test_bet_size_capped_at_max_fraction() {
        let calc = calc_with(|c| c.max_fraction = 0.1);
        let stake = calc.get_bet_size(&metrics(0.2, 0.9, 0.2, 0.1), 1000.0);
        assert!((stake - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_bet_size_policies() {
        let m = metrics(0.1, 0.8, 0.2, 0.1);
        let fixed = calc_with(|_| {});
        assert!((fixed.get_bet_size(&m, 1000.0) - 100.0).abs() < 1e-9);

        let dynamic = calc_with(|c| c.sizing = SizingPolicy::Dynamic);
        assert!((dynamic.get_bet_size(&m, 1000.0) - 80.0).abs() < 1e-9);

        // Fresh state → neutral multiplier.
        let adaptive = calc_with(|c| c.sizing = SizingPolicy::Adaptive);
        assert!((adaptive.get_bet_size(&m, 1000.0) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_adaptive_never_exceeds_cap() {
        let calc = calc_with(|c| {
            c.sizing = SizingPolicy::Adaptive;
            c.max_fraction = 0.1;
        });
        for _ in 0..20 {
            calc.update_state(10.0, true, 10.0).unwrap();
        }
        assert!(calc.adaptive_multiplier() > 1.0);
        let stake = calc.get_bet_size(&metrics(0.1, 0.9, 0.3, 0.1), 1000.0);
        assert!(stake <= 100.0 + 1e-9);
    }

    #[test]
    fn test_bet_size_floors() {
        let calc = calc_with(|c| c.min_stake = 5.0);
        assert_eq!(calc.get_bet_size(&metrics(0.01, 0.9, 0.1, 0.1), 100.0), 0.0);
        assert_eq!(calc.get_bet_size(&metrics(0.1, 0.9, 0.1, 0.1), 0.0), 0.0);
        assert_eq!(calc.get_bet_size(&metrics(0.1, 0.9, 0.1, 0.1), -50.0), 0.0);
    }

    #[test]
    fn test_should_place_bet() {
        let calc = calc_with(|c| c.min_confidence = 0.6);
        assert!(calc.should_place_bet(&metrics(0.1, 0.7, 0.05, 0.1)));
        assert!(!calc.should_place_bet(&metrics(0.1, 0.5, 0.05, 0.1)));
        assert!(!calc.should_place_bet(&metrics(0.1, 0.7, 0.0, 0.1)));
        assert!(!calc.should_place_bet(&metrics(0.1, 0.7, 0.05, 0.31)));
    }

    #[test]
    fn test_analyze_length_mismatch() {
        let calc = KellyCalculator::new(KellyConfig::default());
        let err = calc.analyze(&[Forecast::new(vec![0.3, 0.7])], &[]).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn test_analyze_empty_is_zero() {
        let calc = KellyCalculator::new(KellyConfig::default());
        assert_eq!(calc.analyze(&[], &[]).unwrap(), KellyMetrics::default());
    }

    #[test]
    fn test_analyze_profitable_stream() {
        let calc = KellyCalculator::new(KellyConfig::default());
        // Every forecast says class 1 at 0.7 with even-money market odds.
        let forecasts: Vec<Forecast> = (0..10).map(|_| Forecast::with_odds(vec![0.3, 0.7], 2.0)).collect();
        let labels = [1, 1, 1, 0, 1, 1, 0, 1, 1, 0];
        let m = calc.analyze(&forecasts, &labels).unwrap();

        // p = 0.7, b = 1 → EV = 0.4, raw f* = 0.4; identical confidences → zero volatility
        assert!((m.expected_value - 0.4).abs() < 1e-12);
        assert!((m.confidence - 0.7).abs() < 1e-12);
        assert!(m.volatility < 1e-12);
        assert!(m.risk_level < 1e-12);
        // 0.4 × 0.5 × 0.7 / 1 = 0.14
        assert!((m.fraction - 0.14).abs() < 1e-12);
        assert!((m.optimal_stake - 140.0).abs() < 1e-9);
        assert!((m.win_rate - 0.7).abs() < 1e-12);
        // 7 wins of 1 unit vs 3 losses of 1 unit
        assert!((m.profit_factor - 7.0 / 3.0).abs() < 1e-12);
        assert!(calc.should_place_bet(&m));
    }

    #[test]
    fn test_even_money_sixty_percent_sizing() {
        // p = 0.6 at b = 1: raw f* = 0.2
        let forecasts: Vec<Forecast> = (0..10).map(|_| Forecast::with_odds(vec![0.2, 0.8], 2.0)).collect();
        let labels = [1, 1, 1, 1, 1, 1, 0, 0, 0, 0];

        // Half-Kelly at confidence 0.8, no volatility: 0.2 × 0.5 × 0.8 = 0.08
        let calc = KellyCalculator::new(KellyConfig::default());
        let m = calc.analyze(&forecasts, &labels).unwrap();
        assert!((m.expected_value - 0.2).abs() < 1e-12);
        assert!((m.fraction - 0.08).abs() < 1e-12);
        assert!(calc.should_place_bet(&m));
        assert!((calc.get_bet_size(&m, 1000.0) - 80.0).abs() < 1e-9);
        // 0.08 × 10 = 0.8 is under the minimum stake.
        assert_eq!(calc.get_bet_size(&m, 10.0), 0.0);

        // Full Kelly gives 0.16, capped at 0.1.
        let capped = calc_with(|c| {
            c.multiplier = 1.0;
            c.max_fraction = 0.1;
        });
        let m = capped.analyze(&forecasts, &labels).unwrap();
        assert!((m.fraction - 0.1).abs() < 1e-12);
        assert!((capped.get_bet_size(&m, 1000.0) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_analyze_losing_stream_clamps_to_zero() {
        let calc = KellyCalculator::new(KellyConfig::default());
        let forecasts: Vec<Forecast> = (0..4).map(|_| Forecast::with_odds(vec![0.2, 0.8], 1.5)).collect();
        let m = calc.analyze(&forecasts, &[0, 0, 0, 1]).unwrap();
        assert_eq!(m.fraction, 0.0);
        assert!(m.expected_value < 0.0);
        // no losses at all would be 0; here losses exist
        assert!(m.profit_factor > 0.0);
        assert!(!calc.should_place_bet(&m));
    }

    #[test]
    fn test_fraction_never_exceeds_cap() {
        let calc = calc_with(|c| {
            c.multiplier = 1.0;
            c.max_fraction = 0.05;
        });
        let forecasts: Vec<Forecast> = (0..5).map(|_| Forecast::with_odds(vec![0.05, 0.95], 3.0)).collect();
        let m = calc.analyze(&forecasts, &[1; 5]).unwrap();
        assert_eq!(m.fraction, 0.05);
    }

    #[test]
    fn test_profit_factor_zero_without_losses() {
        let calc = KellyCalculator::new(KellyConfig::default());
        let forecasts: Vec<Forecast> = (0..3).map(|_| Forecast::with_odds(vec![0.4, 0.6], 2.0)).collect();
        let m = calc.analyze(&forecasts, &[1, 1, 1]).unwrap();
        assert_eq!(m.profit_factor, 0.0);
        assert_eq!(m.max_drawdown, 0.0);
    }

    #[test]
    fn test_update_state_and_drawdown() {
        let calc = calc_with(|c| {
            c.initial_bankroll = 100.0;
            c.history_len = 3;
        });
        calc.update_state(10.0, true, 10.0).unwrap();
        calc.update_state(10.0, false, -10.0).unwrap();
        calc.update_state(20.0, false, -20.0).unwrap();
        let state = calc.update_state(5.0, true, 5.0).unwrap();

        assert!((state.bankroll - 85.0).abs() < 1e-9);
        assert!((state.peak_bankroll - 110.0).abs() < 1e-9);
        assert_eq!(state.total_bets, 4);
        assert_eq!(state.wins, 2);
        assert_eq!(state.history.len(), 3);
        assert!((state.current_drawdown() - 25.0 / 110.0).abs() < 1e-12);
        assert!(calc.update_state(f64::NAN, true, 1.0).is_err());
    }

    #[test]
    fn test_ancillary_from_recorded_bets() {
        let calc = calc_with(|c| c.initial_bankroll = 100.0);
        calc.update_state(10.0, true, 10.0).unwrap();
        calc.update_state(10.0, false, -10.0).unwrap();
        calc.update_state(10.0, false, -10.0).unwrap();

        let m = calc.analyze(&[Forecast::new(vec![0.3, 0.7])], &[1]).unwrap();
        // 110 → 100 → 90
        assert!((m.max_drawdown - 20.0 / 110.0).abs() < 1e-12);
        assert!((m.win_rate - 1.0 / 3.0).abs() < 1e-12);
        assert!((m.profit_factor - 0.5).abs() < 1e-12);
        assert!(m.sharpe_ratio < 0.0);
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: KellyConfig = toml::from_str("max_fraction = 0.1\nsizing = \"dynamic\"").unwrap();
        assert_eq!(config.max_fraction, 0.1);
        assert_eq!(config.sizing, SizingPolicy::Dynamic);
        assert_eq!(config.history_len, 1000);
    }
}

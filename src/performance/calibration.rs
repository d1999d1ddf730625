//! Streaming calibration.
//!
//! Measures how well a model's stated confidence matches its realized hit
//! rate. Keeps per-bin running sums instead of individual points, so memory
//! is fixed no matter how many outcomes are recorded.

use serde::{Deserialize, Serialize};

const NUM_BINS: usize = 10;

/// Running totals for one 10%-wide confidence bin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationBin {
    pub count: u64,
    pub sum_predicted: f64,
    pub hits: u64,
}

impl CalibrationBin {
    pub fn mean_predicted(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum_predicted / self.count as f64
        }
    }

    pub fn actual_rate(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.hits as f64 / self.count as f64
        }
    }

    /// |mean_predicted − actual_rate|
    pub fn deviation(&self) -> f64 {
        (self.mean_predicted() - self.actual_rate()).abs()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Calibrator {
    bins: [CalibrationBin; NUM_BINS],
    count: u64,
    brier_sum: f64,
}

impl Calibrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one resolved prediction.
    pub fn add(&mut self, predicted: f64, hit: bool) {
        let predicted = if predicted.is_finite() {
            predicted.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let outcome = if hit { 1.0 } else { 0.0 };
        let idx = ((predicted * NUM_BINS as f64) as usize).min(NUM_BINS - 1);

        let bin = &mut self.bins[idx];
        bin.count += 1;
        bin.sum_predicted += predicted;
        if hit {
            bin.hits += 1;
        }
        self.count += 1;
        self.brier_sum += (predicted - outcome).powi(2);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn bins(&self) -> &[CalibrationBin] {
        &self.bins
    }

    /// Brier = (1/N) · Σ(predicted − outcome)². Lower is better.
    pub fn brier_score(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.brier_sum / self.count as f64
        }
    }

    /// Expected calibration error: count-weighted mean bin deviation.
    pub fn expected_calibration_error(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.bins
            .iter()
            .map(|b| b.count as f64 * b.deviation())
            .sum::<f64>()
            / self.count as f64
    }

    /// `1 − ECE`; 1.0 with no data.
    pub fn score(&self) -> f64 {
        1.0 - self.expected_calibration_error()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty() {
        let cal = Calibrator::new();
        assert_eq!(cal.count(), 0);
        assert_eq!(cal.brier_score(), 0.0);
        assert_eq!(cal.score(), 1.0);
    }

    #[test]
    fn test_well_calibrated() {
        let mut cal = Calibrator::new();
        // 0.8 confidence, 8 of 10 correct
        for i in 0..10 {
            cal.add(0.8, i < 8);
        }
        assert!(cal.score() > 0.99, "score: {}", cal.score());
    }

    #[test]
    fn test_overconfident() {
        let mut cal = Calibrator::new();
        for _ in 0..10 {
            cal.add(0.9, false);
            cal.add(0.1, true);
        }
        assert!(cal.brier_score() > 0.5, "Brier: {}", cal.brier_score());
        assert!((cal.score() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_brier_score_at_50() {
        let mut cal = Calibrator::new();
        for _ in 0..50 {
            cal.add(0.5, true);
            cal.add(0.5, false);
        }
        assert!((cal.brier_score() - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_binning() {
        let mut cal = Calibrator::new();
        cal.add(1.0, true);
        cal.add(0.0, false);
        cal.add(0.25, true);
        cal.add(f64::NAN, false);
        assert_eq!(cal.bins()[9].count, 1);
        assert_eq!(cal.bins()[0].count, 2);
        assert_eq!(cal.bins()[2].count, 1);
        assert_eq!(cal.bins()[2].actual_rate(), 1.0);
    }
}

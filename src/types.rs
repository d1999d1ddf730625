//! Shared types for the AUGUR engine.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that ensemble, strategy,
//! optimization, and performance modules can depend on them without
//! circular references.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Feature payload handed to every model. The engine never inspects it.
pub type Features = serde_json::Value;

/// Result alias for engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

// ---------------------------------------------------------------------------
// Predictions
// ---------------------------------------------------------------------------

/// A single model's predicted value: a number (probability, score, line)
/// or a category label (e.g. "home", "away", "draw").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PredictionValue {
    Numeric(f64),
    Category(String),
}

impl PredictionValue {
    /// Numeric value, if this is a numeric prediction.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PredictionValue::Numeric(v) => Some(*v),
            PredictionValue::Category(_) => None,
        }
    }

    /// Whether this prediction is a category label.
    pub fn is_category(&self) -> bool {
        matches!(self, PredictionValue::Category(_))
    }
}

impl fmt::Display for PredictionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PredictionValue::Numeric(v) => write!(f, "{v:.4}"),
            PredictionValue::Category(c) => write!(f, "{c}"),
        }
    }
}

impl From<f64> for PredictionValue {
    fn from(v: f64) -> Self {
        PredictionValue::Numeric(v)
    }
}

impl From<&str> for PredictionValue {
    fn from(v: &str) -> Self {
        PredictionValue::Category(v.to_string())
    }
}

/// Raw output of the opaque `predict()` capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelOutput {
    pub prediction: PredictionValue,
    /// Model self-reported confidence (0–1)
    pub confidence: f64,
}

impl ModelOutput {
    pub fn new(prediction: impl Into<PredictionValue>, confidence: f64) -> Self {
        Self {
            prediction: prediction.into(),
            confidence,
        }
    }

    /// Whether the confidence is a finite value inside [0, 1].
    pub fn has_valid_confidence(&self) -> bool {
        self.confidence.is_finite() && (0.0..=1.0).contains(&self.confidence)
    }
}

/// One model's prediction, tagged with the model that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPrediction {
    pub model_name: String,
    pub prediction: PredictionValue,
    pub confidence: f64,
}

impl fmt::Display for ModelPrediction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} (conf={:.0}%)",
            self.model_name,
            self.prediction,
            self.confidence * 100.0,
        )
    }
}

// ---------------------------------------------------------------------------
// Forecasts (Kelly / bet selection input)
// ---------------------------------------------------------------------------

/// A class-probability forecast for one betting candidate, optionally
/// carrying the market's decimal odds for the predicted outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    /// Probability per outcome class. Need not sum to exactly 1.
    pub probabilities: Vec<f64>,
    /// Decimal odds offered on the predicted class (2.0 = even money).
    #[serde(default)]
    pub decimal_odds: Option<f64>,
}

impl Forecast {
    pub fn new(probabilities: Vec<f64>) -> Self {
        Self {
            probabilities,
            decimal_odds: None,
        }
    }

    pub fn with_odds(probabilities: Vec<f64>, decimal_odds: f64) -> Self {
        Self {
            probabilities,
            decimal_odds: Some(decimal_odds),
        }
    }

    /// Index of the most probable class. Ties resolve to the lowest index.
    pub fn predicted_class(&self) -> usize {
        let mut best = 0;
        for (i, p) in self.probabilities.iter().enumerate() {
            if *p > self.probabilities[best] {
                best = i;
            }
        }
        best
    }

    /// Probability assigned to the predicted class.
    pub fn confidence(&self) -> f64 {
        self.probabilities
            .get(self.predicted_class())
            .copied()
            .unwrap_or(0.0)
    }

    /// Decimal odds for the predicted class. Without market odds, the
    /// model's own fair odds (1 / confidence) are used. Zero when the
    /// confidence is zero.
    pub fn effective_odds(&self) -> f64 {
        match self.decimal_odds {
            Some(o) => o,
            None => {
                let c = self.confidence();
                if c > 0.0 {
                    1.0 / c
                } else {
                    0.0
                }
            }
        }
    }

    /// Net odds `b` (profit per unit staked on a win).
    pub fn net_odds(&self) -> f64 {
        (self.effective_odds() - 1.0).max(0.0)
    }

    /// Probability implied by the odds (1 / decimal odds), 0 if undefined.
    pub fn implied_probability(&self) -> f64 {
        let odds = self.effective_odds();
        if odds > 0.0 {
            1.0 / odds
        } else {
            0.0
        }
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "WARNING"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Lookback window for performance history queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Timeframe {
    Day,
    Week,
    Month,
    All,
}

impl Timeframe {
    /// Earliest timestamp included for this timeframe, relative to `now`.
    /// `All` has no cutoff.
    pub fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Timeframe::Day => Some(now - chrono::Duration::days(1)),
            Timeframe::Week => Some(now - chrono::Duration::days(7)),
            Timeframe::Month => Some(now - chrono::Duration::days(30)),
            Timeframe::All => None,
        }
    }
}

impl std::str::FromStr for Timeframe {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "day" | "1d" => Ok(Timeframe::Day),
            "week" | "7d" => Ok(Timeframe::Week),
            "month" | "30d" => Ok(Timeframe::Month),
            "all" => Ok(Timeframe::All),
            _ => Err(anyhow::anyhow!("Unknown timeframe: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for AUGUR.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Upstream prediction error ({model}): {message}")]
    UpstreamPrediction { model: String, message: String },

    #[error("Optimization error: {0}")]
    Optimization(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

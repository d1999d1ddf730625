//! Threshold alerting over performance metrics.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, warn};
use uuid::Uuid;

use super::ring::RingBuffer;
use super::tracker::{MetricKind, PerformanceMetrics};
use crate::types::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertCondition {
    Above,
    Below,
}

impl AlertCondition {
    /// Strict comparison; NaN never fires.
    pub fn fires(&self, value: f64, threshold: f64) -> bool {
        match self {
            AlertCondition::Above => value > threshold,
            AlertCondition::Below => value < threshold,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertThreshold {
    pub metric: MetricKind,
    pub threshold: f64,
    pub condition: AlertCondition,
    pub severity: Severity,
}

impl AlertThreshold {
    pub fn new(metric: MetricKind, condition: AlertCondition, threshold: f64, severity: Severity) -> Self {
        Self {
            metric,
            threshold,
            condition,
            severity,
        }
    }
}

/// Built-in warning/critical pairs for ROI, win rate, drawdown and
/// calibration.
pub fn default_thresholds() -> Vec<AlertThreshold> {
    use AlertCondition::{Above, Below};
    use MetricKind::*;
    use Severity::{Critical, Warning};
    vec![
        AlertThreshold::new(Roi, Below, -0.1, Warning),
        AlertThreshold::new(Roi, Below, -0.2, Critical),
        AlertThreshold::new(WinRate, Below, 0.4, Warning),
        AlertThreshold::new(WinRate, Below, 0.3, Critical),
        AlertThreshold::new(MaxDrawdown, Above, 0.2, Warning),
        AlertThreshold::new(MaxDrawdown, Above, 0.3, Critical),
        AlertThreshold::new(CalibrationScore, Below, 0.6, Warning),
        AlertThreshold::new(CalibrationScore, Below, 0.5, Critical),
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Alerts retained; the oldest is evicted beyond this.
    pub max_alerts: usize,
    pub use_default_thresholds: bool,
    /// Checked in addition to the defaults when those are enabled.
    pub thresholds: Vec<AlertThreshold>,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            max_alerts: 1000,
            use_default_thresholds: true,
            thresholds: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub model_name: String,
    pub metric: MetricKind,
    pub value: f64,
    pub threshold: f64,
    pub condition: AlertCondition,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    pub fn message(&self) -> String {
        let relation = match self.condition {
            AlertCondition::Above => "above",
            AlertCondition::Below => "below",
        };
        format!(
            "{} {} {:.4} is {} threshold {:.4}",
            self.model_name, self.metric, self.value, relation, self.threshold
        )
    }
}

pub struct AlertMonitor {
    thresholds: Vec<AlertThreshold>,
    alerts: Mutex<RingBuffer<Alert>>,
    events: Option<UnboundedSender<Alert>>,
}

impl AlertMonitor {
    pub fn new(config: AlertConfig) -> Self {
        let mut thresholds = if config.use_default_thresholds {
            default_thresholds()
        } else {
            Vec::new()
        };
        thresholds.extend(config.thresholds);
        Self {
            thresholds,
            alerts: Mutex::new(RingBuffer::new(config.max_alerts)),
            events: None,
        }
    }

    /// Forward every raised alert to `sender`.
    pub fn with_events(mut self, sender: UnboundedSender<Alert>) -> Self {
        self.events = Some(sender);
        self
    }

    pub fn thresholds(&self) -> &[AlertThreshold] {
        &self.thresholds
    }

    /// Check every threshold against `metrics`, store and return the alerts
    /// raised. Warning and critical thresholds on the same metric may both
    /// fire.
    pub fn monitor_performance(&self, model: &str, metrics: &PerformanceMetrics) -> Vec<Alert> {
        let now = Utc::now();
        let raised: Vec<Alert> = self
            .thresholds
            .iter()
            .filter_map(|t| {
                let value = t.metric.value(metrics);
                t.condition.fires(value, t.threshold).then(|| Alert {
                    id: Uuid::new_v4(),
                    model_name: model.to_string(),
                    metric: t.metric,
                    value,
                    threshold: t.threshold,
                    condition: t.condition,
                    severity: t.severity,
                    timestamp: now,
                })
            })
            .collect();

        if raised.is_empty() {
            return raised;
        }

        let mut store = self.alerts.lock();
        for alert in &raised {
            match alert.severity {
                Severity::Warning => warn!(
                    model,
                    metric = %alert.metric,
                    value = format!("{:.4}", alert.value),
                    threshold = alert.threshold,
                    "Performance alert"
                ),
                Severity::Critical => error!(
                    model,
                    metric = %alert.metric,
                    value = format!("{:.4}", alert.value),
                    threshold = alert.threshold,
                    "CRITICAL performance alert"
                ),
            }
            store.push(alert.clone());
            if let Some(tx) = &self.events {
                let _ = tx.send(alert.clone());
            }
        }
        raised
    }

    /// Stored alerts matching every given filter, newest first.
    pub fn get_alerts(
        &self,
        model: Option<&str>,
        severity: Option<Severity>,
        since: Option<DateTime<Utc>>,
    ) -> Vec<Alert> {
        self.alerts
            .lock()
            .iter()
            .rev()
            .filter(|a| model.map_or(true, |m| a.model_name == m))
            .filter(|a| severity.map_or(true, |s| a.severity == s))
            .filter(|a| since.map_or(true, |t| a.timestamp >= t))
            .cloned()
            .collect()
    }

    /// Drop stored alerts for one model, or all of them. Returns the number
    /// removed.
    pub fn clear_alerts(&self, model: Option<&str>) -> usize {
        let mut store = self.alerts.lock();
        let before = store.len();
        match model {
            Some(m) => store.retain(|a| a.model_name != m),
            None => store.clear(),
        }
        before - store.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

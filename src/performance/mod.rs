//! Model performance: incremental metrics, bounded history, calibration and
//! threshold alerts.

pub mod alerts;
pub mod calibration;
pub mod ring;
pub mod tracker;

pub use alerts::{Alert, AlertCondition, AlertConfig, AlertMonitor, AlertThreshold};
pub use tracker::{
    MetricKind, PerformanceMetrics, PerformanceSnapshot, PerformanceTracker, RankedModel,
    TrackerConfig,
};

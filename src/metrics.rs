//! Telemetry sink for pipeline components.
//!
//! Every component emits metrics and error events through an injectable
//! [`MetricsRecorder`]. Recorders are infallible by construction: a recorder
//! that loses a metric loses a metric, it never fails the request it was
//! observing. The pipeline works unchanged with [`NoopRecorder`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Unit of a recorded metric value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricUnit {
    Milliseconds,
    Bytes,
    Count,
    Percentage,
    Rate,
}

/// A single metric sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    pub value: f64,
    pub unit: MetricUnit,
    pub timestamp: DateTime<Utc>,
    pub tags: HashMap<String, String>,
}

impl Metric {
    pub fn new(name: impl Into<String>, value: f64, unit: MetricUnit) -> Self {
        Self {
            name: name.into(),
            value,
            unit,
            timestamp: Utc::now(),
            tags: HashMap::new(),
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

/// Injectable recorder for metrics and component error events.
pub trait MetricsRecorder: Send + Sync {
    fn record_metric(&self, metric: Metric);

    fn record_error(&self, component: &str, error: &str);
}

impl std::fmt::Debug for dyn MetricsRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MetricsRecorder")
    }
}

/// Recorder that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRecorder;

impl MetricsRecorder for NoopRecorder {
    fn record_metric(&self, _metric: Metric) {}

    fn record_error(&self, _component: &str, _error: &str) {}
}

/// Recorder that forwards samples to the `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRecorder;

impl MetricsRecorder for TracingRecorder {
    fn record_metric(&self, metric: Metric) {
        debug!(
            name = %metric.name,
            value = metric.value,
            unit = ?metric.unit,
            tags = ?metric.tags,
            "metric"
        );
    }

    fn record_error(&self, component: &str, error: &str) {
        warn!(component, error, "component error");
    }
}

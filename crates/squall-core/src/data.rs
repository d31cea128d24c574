//! Metric and event value types shared by all plugins.
//!
//! Handlers create these, the buses fan them out, and applications consume
//! them. Both types are treated as immutable once published.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Exposition type of a metric series.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    Counter,
    #[default]
    Gauge,
    Untyped,
}

/// A single decoded metric sample.
///
/// `label_keys` and `label_vals` are parallel sequences of equal length; the
/// key set defines the series' dimensionality and stays in the same order
/// across updates of the same series. A `time` of `0.0` means the source did
/// not carry a timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    /// Seconds since the Unix epoch; `0.0` when unknown.
    pub time: f64,
    #[serde(rename = "type")]
    pub metric_type: MetricType,
    /// Arrival cadence promised by the source; drives expiry in sinks.
    pub interval: Duration,
    pub value: f64,
    pub label_keys: Vec<String>,
    pub label_vals: Vec<String>,
}

impl Metric {
    /// Number of label keys; partitions series into collectors downstream.
    pub fn dimensions(&self) -> usize {
        self.label_keys.len()
    }
}

/// Category of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Platform,
    ServiceCheck,
    Alert,
}

/// Severity of an event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSeverity {
    Info,
    Warning,
    Critical,
    #[default]
    Unknown,
}

/// A single decoded event. Immutable once published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Routing/topic string, e.g. an index or destination hint.
    pub index: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub publisher: String,
    #[serde(default)]
    pub severity: EventSeverity,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub labels: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub annotations: HashMap<String, serde_json::Value>,
}

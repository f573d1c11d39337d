//! Uniform sample model produced by every source adapter.

use chrono::{DateTime, Utc};
use faultlab_common::EntityId;
use serde::{Deserialize, Serialize};

/// The fixed set of telemetry source kinds.
///
/// Downstream dispatch is driven by this variant, never by downcasting a
/// source-specific payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Container runtime metrics (JSON tree, polled).
    ContainerRuntime,
    /// Host metrics in text exposition format (polled).
    HostExporter,
    /// Application metrics pushed over a persistent connection.
    AppPush,
}

impl SourceKind {
    /// Short identifier used as a column prefix and in log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ContainerRuntime => "container",
            Self::HostExporter => "host",
            Self::AppPush => "app",
        }
    }

    /// Whether this source's samples apply to every monitored entity
    /// (host-level) rather than to a single entity.
    pub fn is_host_level(&self) -> bool {
        matches!(self, Self::HostExporter)
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a metric is a cumulative counter or an instantaneous gauge.
///
/// Counters are converted into per-second rates before recording; gauges
/// pass through unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Counter,
    Gauge,
}

/// One named raw sample produced by a source adapter.
///
/// Samples are produced fresh on each poll and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// Which adapter produced this sample.
    pub source: SourceKind,
    /// Entity the sample describes.
    pub entity: EntityId,
    /// Metric name within the source's namespace.
    pub name: String,
    /// Counter or gauge semantics.
    pub kind: MetricKind,
    /// Raw numeric value as read from the source.
    pub value: f64,
    /// When the sample was taken.
    pub sampled_at: DateTime<Utc>,
}

impl MetricSample {
    /// Create a gauge sample.
    pub fn gauge(
        source: SourceKind,
        entity: EntityId,
        name: impl Into<String>,
        value: f64,
        sampled_at: DateTime<Utc>,
    ) -> Self {
        Self {
            source,
            entity,
            name: name.into(),
            kind: MetricKind::Gauge,
            value,
            sampled_at,
        }
    }

    /// Create a counter sample.
    pub fn counter(
        source: SourceKind,
        entity: EntityId,
        name: impl Into<String>,
        value: f64,
        sampled_at: DateTime<Utc>,
    ) -> Self {
        Self {
            source,
            entity,
            name: name.into(),
            kind: MetricKind::Counter,
            value,
            sampled_at,
        }
    }

    /// Sample time as fractional unix seconds.
    pub fn unix_time(&self) -> f64 {
        self.sampled_at.timestamp_micros() as f64 / 1e6
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_kind_strings() {
        assert_eq!(SourceKind::ContainerRuntime.as_str(), "container");
        assert_eq!(SourceKind::HostExporter.as_str(), "host");
        assert_eq!(SourceKind::AppPush.as_str(), "app");
    }

    #[test]
    fn test_host_level_flag() {
        assert!(SourceKind::HostExporter.is_host_level());
        assert!(!SourceKind::ContainerRuntime.is_host_level());
        assert!(!SourceKind::AppPush.is_host_level());
    }

    #[test]
    fn test_unix_time_has_subsecond_precision() {
        let at = DateTime::from_timestamp_micros(1_700_000_000_250_000).unwrap();
        let sample = MetricSample::gauge(
            SourceKind::HostExporter,
            EntityId::new("host"),
            "load1",
            0.42,
            at,
        );
        assert!((sample.unix_time() - 1_700_000_000.25).abs() < 1e-9);
    }
}

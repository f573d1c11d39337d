//! Stateful conversion of monotonic counters into per-second rates.
//!
//! Every counter-typed metric, regardless of source, goes through the same
//! converter: the first observation of a key only seeds state, a
//! non-positive time delta reuses the previous rate without touching
//! state, and a negative value delta (counter reset or wrap) clamps the
//! rate to zero instead of ever reporting a negative figure.

use crate::sample::{MetricKind, MetricSample, SourceKind};
use faultlab_common::EntityId;
use std::collections::HashMap;
use tracing::debug;

/// Identity of one counter series.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateKey {
    pub source: SourceKind,
    pub entity: EntityId,
    pub metric: String,
}

/// Previous observation for one counter series.
#[derive(Debug, Clone)]
struct RateState {
    last_value: f64,
    last_at: f64,
    last_rate: Option<f64>,
}

/// Counter-to-rate converter.
///
/// Owned exclusively by one source poller; the fetch-and-convert sequence
/// for a source runs serially, so no synchronization is needed here.
#[derive(Debug, Default)]
pub struct RateConverter {
    states: HashMap<RateKey, RateState>,
}

impl RateConverter {
    /// Create an empty converter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Convert one counter observation into a per-second rate.
    ///
    /// Returns `None` until a key has two observations with increasing
    /// timestamps.
    pub fn convert(&mut self, key: RateKey, value: f64, at_unix: f64) -> Option<f64> {
        match self.states.get_mut(&key) {
            None => {
                self.states.insert(
                    key,
                    RateState {
                        last_value: value,
                        last_at: at_unix,
                        last_rate: None,
                    },
                );
                None
            }
            Some(state) => {
                let dt = at_unix - state.last_at;
                if dt <= 0.0 {
                    // Clock or ordering anomaly: keep prior state intact.
                    debug!(
                        metric = %key.metric,
                        dt,
                        "non-increasing sample time, reusing previous rate"
                    );
                    return state.last_rate;
                }

                let delta = value - state.last_value;
                // Counter reset/wrap clamps to zero rather than going negative.
                let rate = if delta < 0.0 { 0.0 } else { delta / dt };

                state.last_value = value;
                state.last_at = at_unix;
                state.last_rate = Some(rate);
                Some(rate)
            }
        }
    }

    /// Normalize one raw sample into an output column.
    ///
    /// Gauges pass through under their own name; counters become
    /// `<name>_rate` once a rate is available, or nothing on the first
    /// observation.
    pub fn normalize(&mut self, sample: &MetricSample) -> Option<(String, f64)> {
        match sample.kind {
            MetricKind::Gauge => Some((sample.name.clone(), sample.value)),
            MetricKind::Counter => {
                let key = RateKey {
                    source: sample.source,
                    entity: sample.entity.clone(),
                    metric: sample.name.clone(),
                };
                self.convert(key, sample.value, sample.unix_time())
                    .map(|rate| (format!("{}_rate", sample.name), rate))
            }
        }
    }

    /// Number of tracked counter series.
    pub fn tracked_series(&self) -> usize {
        self.states.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    fn key(metric: &str) -> RateKey {
        RateKey {
            source: SourceKind::HostExporter,
            entity: EntityId::new("host"),
            metric: metric.to_string(),
        }
    }

    #[test]
    fn test_first_observation_yields_no_rate() {
        let mut conv = RateConverter::new();
        assert_eq!(conv.convert(key("net_rx"), 1000.0, 10.0), None);
        assert_eq!(conv.tracked_series(), 1);
    }

    #[test]
    fn test_rate_is_delta_over_dt() {
        let mut conv = RateConverter::new();
        conv.convert(key("net_rx"), 1000.0, 10.0);
        let rate = conv.convert(key("net_rx"), 1500.0, 12.0).unwrap();
        assert!((rate - 250.0).abs() < 1e-12);
    }

    #[test]
    fn test_counter_reset_clamps_to_zero() {
        let mut conv = RateConverter::new();
        conv.convert(key("net_rx"), 1_000_000.0, 10.0);
        let rate = conv.convert(key("net_rx"), 500.0, 11.0).unwrap();
        assert_eq!(rate, 0.0);

        // State advanced: the next interval rates against the reset value.
        let rate = conv.convert(key("net_rx"), 600.0, 12.0).unwrap();
        assert!((rate - 100.0).abs() < 1e-12);
    }

    #[test]
    fn test_non_increasing_time_reuses_previous_rate() {
        let mut conv = RateConverter::new();
        conv.convert(key("cpu"), 100.0, 10.0);
        let first = conv.convert(key("cpu"), 200.0, 11.0).unwrap();

        // Same timestamp: previous rate comes back, state untouched.
        assert_eq!(conv.convert(key("cpu"), 999.0, 11.0), Some(first));
        // Going backwards behaves the same.
        assert_eq!(conv.convert(key("cpu"), 999.0, 10.5), Some(first));

        // A later valid sample rates against the untouched state.
        let rate = conv.convert(key("cpu"), 300.0, 12.0).unwrap();
        assert!((rate - 100.0).abs() < 1e-12);
    }

    #[test]
    fn test_non_increasing_time_before_any_rate() {
        let mut conv = RateConverter::new();
        conv.convert(key("cpu"), 100.0, 10.0);
        assert_eq!(conv.convert(key("cpu"), 150.0, 10.0), None);
    }

    #[test]
    fn test_keys_are_independent() {
        let mut conv = RateConverter::new();
        conv.convert(key("a"), 0.0, 0.0);
        conv.convert(key("b"), 0.0, 0.0);
        let a = conv.convert(key("a"), 10.0, 1.0).unwrap();
        let b = conv.convert(key("b"), 20.0, 2.0).unwrap();
        assert!((a - 10.0).abs() < 1e-12);
        assert!((b - 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_normalize_gauge_passthrough_and_counter_suffix() {
        let mut conv = RateConverter::new();
        let at0 = DateTime::from_timestamp(100, 0).unwrap();
        let at1 = DateTime::from_timestamp(101, 0).unwrap();
        let entity = EntityId::new("cu0");

        let gauge = MetricSample::gauge(
            SourceKind::ContainerRuntime,
            entity.clone(),
            "memory_usage_bytes",
            42.0,
            at0,
        );
        assert_eq!(
            conv.normalize(&gauge),
            Some(("memory_usage_bytes".to_string(), 42.0))
        );

        let c0 = MetricSample::counter(
            SourceKind::ContainerRuntime,
            entity.clone(),
            "network_rx_bytes",
            1000.0,
            at0,
        );
        assert_eq!(conv.normalize(&c0), None);

        let c1 = MetricSample::counter(
            SourceKind::ContainerRuntime,
            entity,
            "network_rx_bytes",
            2000.0,
            at1,
        );
        assert_eq!(
            conv.normalize(&c1),
            Some(("network_rx_bytes_rate".to_string(), 1000.0))
        );
    }
}

//! Container-runtime metrics adapter (cAdvisor-style JSON tree).
//!
//! The response is a map from container path to a structure carrying an
//! `aliases` list and a chronologically ordered `stats` array; only the
//! most recent stats entry is used. Field access is explicit: absent
//! optional fields fall back to zero, and only a malformed document is an
//! error.

use crate::sample::{MetricSample, SourceKind};
use chrono::{DateTime, Utc};
use faultlab_common::EntityId;
use serde_json::Value;
use std::collections::HashSet;
use thiserror::Error;
use tracing::debug;

/// Errors produced while parsing a container-runtime response.
#[derive(Error, Debug)]
pub enum CadvisorError {
    #[error("invalid container metrics JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("container metrics response is not a JSON object")]
    NotAnObject,
}

/// Adapter for the container-runtime JSON tree.
#[derive(Debug, Clone)]
pub struct CadvisorAdapter {
    /// Containers to keep; an empty filter keeps everything.
    entities: HashSet<EntityId>,
}

impl CadvisorAdapter {
    /// Create an adapter keeping only the given containers. An empty list
    /// keeps all containers in the response.
    pub fn new(entities: impl IntoIterator<Item = EntityId>) -> Self {
        Self {
            entities: entities.into_iter().collect(),
        }
    }

    /// Parse one raw response into samples.
    pub fn parse(
        &self,
        raw: &str,
        sampled_at: DateTime<Utc>,
    ) -> Result<Vec<MetricSample>, CadvisorError> {
        let root: Value = serde_json::from_str(raw)?;
        let containers = root.as_object().ok_or(CadvisorError::NotAnObject)?;

        let mut samples = Vec::new();

        for (path, data) in containers {
            // Stats are assumed chronologically ordered; only the last
            // entry is current.
            let Some(latest) = data
                .get("stats")
                .and_then(Value::as_array)
                .and_then(|stats| stats.last())
            else {
                debug!(container = %path, "no stats entries, skipping container");
                continue;
            };

            let entity = container_name(path, data);
            if !self.entities.is_empty() && !self.entities.contains(&entity) {
                continue;
            }

            self.extract_container(&entity, data, latest, sampled_at, &mut samples);
        }

        Ok(samples)
    }

    fn extract_container(
        &self,
        entity: &EntityId,
        data: &Value,
        latest: &Value,
        sampled_at: DateTime<Utc>,
        out: &mut Vec<MetricSample>,
    ) {
        let gauge = |name: &str, value: f64| {
            MetricSample::gauge(
                SourceKind::ContainerRuntime,
                entity.clone(),
                name,
                value,
                sampled_at,
            )
        };
        let counter = |name: &str, value: f64| {
            MetricSample::counter(
                SourceKind::ContainerRuntime,
                entity.clone(),
                name,
                value,
                sampled_at,
            )
        };

        // CPU: an instantaneous nanocores reading, normalized so that one
        // full core (1e9 nanocores/sec) reads as 100%.
        if let Some(nano_cores) = latest
            .pointer("/cpu/usage_nano_cores")
            .and_then(Value::as_u64)
        {
            out.push(gauge("cpu_usage_percent", nano_cores as f64 / 1e7));
        }

        // Memory: prefer the working set over raw usage when both exist.
        let memory = latest.get("memory");
        let working_set = memory
            .and_then(|m| m.get("working_set"))
            .and_then(Value::as_u64);
        let usage = memory.and_then(|m| m.get("usage")).and_then(Value::as_u64);
        if let Some(bytes) = working_set.or(usage) {
            out.push(gauge("memory_usage_bytes", bytes as f64));
        }
        if let Some(limit) = data
            .pointer("/spec/memory/limit")
            .and_then(Value::as_u64)
        {
            out.push(gauge("memory_limit_bytes", limit as f64));
        }

        // Network: byte counters summed across all reported interfaces.
        if let Some(interfaces) = latest
            .pointer("/network/interfaces")
            .and_then(Value::as_array)
        {
            let mut rx = 0u64;
            let mut tx = 0u64;
            for iface in interfaces {
                rx += iface.get("rx_bytes").and_then(Value::as_u64).unwrap_or(0);
                tx += iface.get("tx_bytes").and_then(Value::as_u64).unwrap_or(0);
            }
            out.push(counter("network_rx_bytes", rx as f64));
            out.push(counter("network_tx_bytes", tx as f64));
        }

        // Filesystem: usage and capacity summed across all entries, so
        // multi-volume containers report one figure.
        if let Some(filesystems) = latest.get("filesystem").and_then(Value::as_array) {
            if !filesystems.is_empty() {
                let mut used = 0u64;
                let mut capacity = 0u64;
                for fs in filesystems {
                    used += fs.get("usage").and_then(Value::as_u64).unwrap_or(0);
                    capacity += fs.get("capacity").and_then(Value::as_u64).unwrap_or(0);
                }
                out.push(gauge("filesystem_usage_bytes", used as f64));
                out.push(gauge("filesystem_capacity_bytes", capacity as f64));
            }
        }
    }
}

/// Container name from the aliases list, falling back to the path.
fn container_name(path: &str, data: &Value) -> EntityId {
    data.get("aliases")
        .and_then(Value::as_array)
        .and_then(|aliases| aliases.first())
        .and_then(Value::as_str)
        .map(EntityId::new)
        .unwrap_or_else(|| EntityId::new(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::MetricKind;
    use tracing::info;
    use tracing_subscriber::fmt;

    fn init_test_logging() {
        let _ = fmt().with_test_writer().try_init();
    }

    fn sample_value<'a>(samples: &'a [MetricSample], name: &str) -> Option<&'a MetricSample> {
        samples.iter().find(|s| s.name == name)
    }

    const SAMPLE_RESPONSE: &str = r#"{
        "/docker/abc123": {
            "aliases": ["srscu0"],
            "spec": { "memory": { "limit": 1073741824 } },
            "stats": [
                { "cpu": { "usage_nano_cores": 100000000 } },
                {
                    "cpu": { "usage_nano_cores": 500000000 },
                    "memory": { "usage": 2048, "working_set": 1024 },
                    "network": {
                        "interfaces": [
                            { "rx_bytes": 100, "tx_bytes": 10 },
                            { "rx_bytes": 200, "tx_bytes": 20 }
                        ]
                    },
                    "filesystem": [
                        { "usage": 10, "capacity": 100 },
                        { "usage": 20, "capacity": 200 }
                    ]
                }
            ]
        }
    }"#;

    #[test]
    fn test_parse_uses_only_latest_stats_entry() {
        init_test_logging();
        info!("TEST START: test_parse_uses_only_latest_stats_entry");

        let adapter = CadvisorAdapter::new([]);
        let samples = adapter.parse(SAMPLE_RESPONSE, Utc::now()).unwrap();

        let cpu = sample_value(&samples, "cpu_usage_percent").unwrap();
        info!(cpu = cpu.value, "RESULT: cpu from latest entry");
        // 5e8 nanocores == half a core == 50%.
        assert!((cpu.value - 50.0).abs() < 1e-9);

        info!("TEST PASS: test_parse_uses_only_latest_stats_entry");
    }

    #[test]
    fn test_working_set_preferred_over_usage() {
        init_test_logging();

        let adapter = CadvisorAdapter::new([]);
        let samples = adapter.parse(SAMPLE_RESPONSE, Utc::now()).unwrap();

        let mem = sample_value(&samples, "memory_usage_bytes").unwrap();
        assert_eq!(mem.value, 1024.0);

        let limit = sample_value(&samples, "memory_limit_bytes").unwrap();
        assert_eq!(limit.value, 1_073_741_824.0);
    }

    #[test]
    fn test_network_counters_summed_across_interfaces() {
        init_test_logging();

        let adapter = CadvisorAdapter::new([]);
        let samples = adapter.parse(SAMPLE_RESPONSE, Utc::now()).unwrap();

        let rx = sample_value(&samples, "network_rx_bytes").unwrap();
        let tx = sample_value(&samples, "network_tx_bytes").unwrap();
        assert_eq!(rx.value, 300.0);
        assert_eq!(tx.value, 30.0);
        assert_eq!(rx.kind, MetricKind::Counter);
        assert_eq!(tx.kind, MetricKind::Counter);
    }

    #[test]
    fn test_filesystem_summed_across_entries() {
        init_test_logging();
        info!("TEST START: test_filesystem_summed_across_entries");

        let adapter = CadvisorAdapter::new([]);
        let samples = adapter.parse(SAMPLE_RESPONSE, Utc::now()).unwrap();

        let usage = sample_value(&samples, "filesystem_usage_bytes").unwrap();
        let capacity = sample_value(&samples, "filesystem_capacity_bytes").unwrap();
        info!(usage = usage.value, capacity = capacity.value, "RESULT: summed filesystem");
        assert_eq!(usage.value, 30.0);
        assert_eq!(capacity.value, 300.0);

        info!("TEST PASS: test_filesystem_summed_across_entries");
    }

    #[test]
    fn test_alias_names_entity_with_path_fallback() {
        init_test_logging();

        let adapter = CadvisorAdapter::new([]);
        let samples = adapter.parse(SAMPLE_RESPONSE, Utc::now()).unwrap();
        assert!(samples.iter().all(|s| s.entity.as_str() == "srscu0"));

        let no_alias = r#"{
            "/docker/def456": {
                "stats": [ { "cpu": { "usage_nano_cores": 10000000 } } ]
            }
        }"#;
        let samples = adapter.parse(no_alias, Utc::now()).unwrap();
        assert_eq!(samples[0].entity.as_str(), "/docker/def456");
    }

    #[test]
    fn test_entity_filter() {
        init_test_logging();

        let adapter = CadvisorAdapter::new([EntityId::new("other")]);
        let samples = adapter.parse(SAMPLE_RESPONSE, Utc::now()).unwrap();
        assert!(samples.is_empty());
    }

    #[test]
    fn test_container_without_stats_is_skipped() {
        init_test_logging();

        let raw = r#"{ "/docker/empty": { "aliases": ["x"], "stats": [] } }"#;
        let adapter = CadvisorAdapter::new([]);
        let samples = adapter.parse(raw, Utc::now()).unwrap();
        assert!(samples.is_empty());
    }

    #[test]
    fn test_missing_optional_fields_are_absent_not_errors() {
        init_test_logging();

        let raw = r#"{ "/docker/min": { "aliases": ["minimal"], "stats": [ {} ] } }"#;
        let adapter = CadvisorAdapter::new([]);
        let samples = adapter.parse(raw, Utc::now()).unwrap();
        assert!(samples.is_empty());
    }

    #[test]
    fn test_malformed_json_is_an_error() {
        init_test_logging();

        let adapter = CadvisorAdapter::new([]);
        assert!(matches!(
            adapter.parse("{not json", Utc::now()),
            Err(CadvisorError::Json(_))
        ));
        assert!(matches!(
            adapter.parse("[1, 2, 3]", Utc::now()),
            Err(CadvisorError::NotAnObject)
        ));
    }
}

//! Host metrics adapter for the Prometheus text exposition format.
//!
//! A single pass over the response extracts a fixed set of host-level
//! series. Lines are `name{labels} value`; comment and blank lines are
//! skipped. Unknown series are ignored, so an exporter exposing hundreds
//! of families costs only the line scan.

use crate::sample::{MetricSample, SourceKind};
use chrono::{DateTime, Utc};
use faultlab_common::EntityId;
use thiserror::Error;
use tracing::debug;

/// Errors produced while parsing a text exposition response.
#[derive(Error, Debug)]
pub enum NodeExporterError {
    #[error("malformed exposition line {line}: {text:?}")]
    MalformedLine { line: usize, text: String },
}

/// Adapter for a node_exporter-style text exposition endpoint.
///
/// All samples are host-level and carry the configured host entity; the
/// recorder replicates them into every monitored entity's record.
#[derive(Debug, Clone)]
pub struct NodeExporterAdapter {
    host: EntityId,
}

/// One parsed exposition line.
struct Line<'a> {
    name: &'a str,
    labels: &'a str,
    value: f64,
}

impl Line<'_> {
    /// Whether `labels` contains `key="value"`.
    fn has_label(&self, key: &str, value: &str) -> bool {
        // Labels are rare on the series we keep; a substring match on the
        // quoted form is sufficient and avoids a full label parser.
        let needle = format!("{key}=\"{value}\"");
        self.labels.contains(&needle)
    }
}

impl NodeExporterAdapter {
    pub fn new(host: EntityId) -> Self {
        Self { host }
    }

    /// Parse one raw exposition body into samples.
    pub fn parse(
        &self,
        raw: &str,
        sampled_at: DateTime<Utc>,
    ) -> Result<Vec<MetricSample>, NodeExporterError> {
        let mut mem_total = None;
        let mut mem_available = None;
        let mut mem_free = None;
        let mut cpu_idle = 0.0;
        let mut saw_cpu_idle = false;
        let mut disk_read = 0.0;
        let mut saw_disk_read = false;
        let mut disk_written = 0.0;
        let mut saw_disk_written = false;
        let mut net_rx = 0.0;
        let mut saw_net_rx = false;
        let mut net_tx = 0.0;
        let mut saw_net_tx = false;
        let mut load1 = None;
        let mut load5 = None;
        let mut load15 = None;
        let mut fs_size = None;
        let mut fs_avail = None;

        for (idx, text) in raw.lines().enumerate() {
            let text = text.trim();
            if text.is_empty() || text.starts_with('#') {
                continue;
            }
            let line = parse_line(text).ok_or_else(|| NodeExporterError::MalformedLine {
                line: idx + 1,
                text: text.to_string(),
            })?;

            match line.name {
                "node_memory_MemTotal_bytes" => mem_total = Some(line.value),
                "node_memory_MemAvailable_bytes" => mem_available = Some(line.value),
                "node_memory_MemFree_bytes" => mem_free = Some(line.value),
                "node_cpu_seconds_total" => {
                    if line.has_label("mode", "idle") {
                        cpu_idle += line.value;
                        saw_cpu_idle = true;
                    }
                }
                "node_disk_read_bytes_total" => {
                    disk_read += line.value;
                    saw_disk_read = true;
                }
                "node_disk_written_bytes_total" => {
                    disk_written += line.value;
                    saw_disk_written = true;
                }
                "node_network_receive_bytes_total" => {
                    net_rx += line.value;
                    saw_net_rx = true;
                }
                "node_network_transmit_bytes_total" => {
                    net_tx += line.value;
                    saw_net_tx = true;
                }
                "node_load1" => load1 = Some(line.value),
                "node_load5" => load5 = Some(line.value),
                "node_load15" => load15 = Some(line.value),
                "node_filesystem_size_bytes" => {
                    if line.has_label("mountpoint", "/") {
                        fs_size = Some(line.value);
                    }
                }
                "node_filesystem_avail_bytes" => {
                    if line.has_label("mountpoint", "/") {
                        fs_avail = Some(line.value);
                    }
                }
                _ => {}
            }
        }

        let gauge = |name: &str, value: f64| {
            MetricSample::gauge(
                SourceKind::HostExporter,
                self.host.clone(),
                name,
                value,
                sampled_at,
            )
        };
        let counter = |name: &str, value: f64| {
            MetricSample::counter(
                SourceKind::HostExporter,
                self.host.clone(),
                name,
                value,
                sampled_at,
            )
        };

        let mut samples = Vec::new();

        // MemAvailable is the kernel's estimate; fall back to MemFree on
        // older exporters that do not expose it.
        let available = mem_available.or(mem_free);
        if let Some(total) = mem_total {
            samples.push(gauge("memory_total_bytes", total));
            if let Some(avail) = available {
                samples.push(gauge("memory_available_bytes", avail));
                samples.push(gauge("memory_used_bytes", total - avail));
            }
        } else if available.is_some() {
            debug!("memory available without total, skipping memory series");
        }

        if saw_cpu_idle {
            samples.push(counter("cpu_idle_seconds", cpu_idle));
        }
        if saw_disk_read {
            samples.push(counter("disk_read_bytes", disk_read));
        }
        if saw_disk_written {
            samples.push(counter("disk_written_bytes", disk_written));
        }
        if saw_net_rx {
            samples.push(counter("network_rx_bytes", net_rx));
        }
        if saw_net_tx {
            samples.push(counter("network_tx_bytes", net_tx));
        }
        if let Some(v) = load1 {
            samples.push(gauge("load1", v));
        }
        if let Some(v) = load5 {
            samples.push(gauge("load5", v));
        }
        if let Some(v) = load15 {
            samples.push(gauge("load15", v));
        }
        if let Some(v) = fs_size {
            samples.push(gauge("filesystem_size_bytes", v));
        }
        if let Some(v) = fs_avail {
            samples.push(gauge("filesystem_avail_bytes", v));
        }

        Ok(samples)
    }
}

/// Split one exposition line into name, label block, and value.
fn parse_line(text: &str) -> Option<Line<'_>> {
    let (series, value) = text.rsplit_once(char::is_whitespace)?;
    let value: f64 = value.parse().ok()?;
    let (name, labels) = match series.split_once('{') {
        Some((name, rest)) => (name, rest.strip_suffix('}').unwrap_or(rest)),
        None => (series, ""),
    };
    Some(Line { name, labels, value })
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

    fn adapter() -> NodeExporterAdapter {
        NodeExporterAdapter::new(EntityId::new("host"))
    }

    fn value(samples: &[MetricSample], name: &str) -> f64 {
        samples
            .iter()
            .find(|s| s.name == name)
            .unwrap_or_else(|| panic!("missing sample {name}"))
            .value
    }

    const EXPOSITION: &str = r#"
# HELP node_cpu_seconds_total Seconds the CPUs spent in each mode.
# TYPE node_cpu_seconds_total counter
node_cpu_seconds_total{cpu="0",mode="idle"} 100.5
node_cpu_seconds_total{cpu="0",mode="user"} 10.0
node_cpu_seconds_total{cpu="1",mode="idle"} 200.5
node_memory_MemTotal_bytes 1000
node_memory_MemAvailable_bytes 400
node_disk_read_bytes_total{device="sda"} 50
node_disk_read_bytes_total{device="sdb"} 70
node_disk_written_bytes_total{device="sda"} 30
node_network_receive_bytes_total{device="eth0"} 11
node_network_receive_bytes_total{device="lo"} 9
node_network_transmit_bytes_total{device="eth0"} 5
node_load1 0.5
node_load5 0.4
node_load15 0.3
node_filesystem_size_bytes{device="/dev/sda1",mountpoint="/"} 5000
node_filesystem_size_bytes{device="/dev/sdb1",mountpoint="/data"} 9999
node_filesystem_avail_bytes{device="/dev/sda1",mountpoint="/"} 2000
"#;

    #[test]
    fn test_idle_cpu_summed_across_cores() {
        init_test_logging();
        info!("TEST START: test_idle_cpu_summed_across_cores");

        let samples = adapter().parse(EXPOSITION, Utc::now()).unwrap();
        let idle = value(&samples, "cpu_idle_seconds");
        info!(idle, "RESULT: summed idle seconds");
        assert!((idle - 301.0).abs() < 1e-9);

        let sample = samples.iter().find(|s| s.name == "cpu_idle_seconds").unwrap();
        assert_eq!(sample.kind, MetricKind::Counter);

        info!("TEST PASS: test_idle_cpu_summed_across_cores");
    }

    #[test]
    fn test_memory_used_is_total_minus_available() {
        init_test_logging();

        let samples = adapter().parse(EXPOSITION, Utc::now()).unwrap();
        assert_eq!(value(&samples, "memory_total_bytes"), 1000.0);
        assert_eq!(value(&samples, "memory_available_bytes"), 400.0);
        assert_eq!(value(&samples, "memory_used_bytes"), 600.0);
    }

    #[test]
    fn test_mem_free_fallback_when_available_absent() {
        init_test_logging();

        let raw = "node_memory_MemTotal_bytes 1000\nnode_memory_MemFree_bytes 250\n";
        let samples = adapter().parse(raw, Utc::now()).unwrap();
        assert_eq!(value(&samples, "memory_available_bytes"), 250.0);
        assert_eq!(value(&samples, "memory_used_bytes"), 750.0);
    }

    #[test]
    fn test_device_counters_summed() {
        init_test_logging();

        let samples = adapter().parse(EXPOSITION, Utc::now()).unwrap();
        assert_eq!(value(&samples, "disk_read_bytes"), 120.0);
        assert_eq!(value(&samples, "disk_written_bytes"), 30.0);
        assert_eq!(value(&samples, "network_rx_bytes"), 20.0);
        assert_eq!(value(&samples, "network_tx_bytes"), 5.0);
    }

    #[test]
    fn test_filesystem_restricted_to_root_mountpoint() {
        init_test_logging();

        let samples = adapter().parse(EXPOSITION, Utc::now()).unwrap();
        assert_eq!(value(&samples, "filesystem_size_bytes"), 5000.0);
        assert_eq!(value(&samples, "filesystem_avail_bytes"), 2000.0);
    }

    #[test]
    fn test_load_averages_are_gauges() {
        init_test_logging();

        let samples = adapter().parse(EXPOSITION, Utc::now()).unwrap();
        for name in ["load1", "load5", "load15"] {
            let s = samples.iter().find(|s| s.name == name).unwrap();
            assert_eq!(s.kind, MetricKind::Gauge);
        }
        assert_eq!(value(&samples, "load1"), 0.5);
    }

    #[test]
    fn test_comments_and_blanks_skipped_malformed_rejected() {
        init_test_logging();

        let ok = "# comment\n\nnode_load1 1.0\n";
        assert_eq!(adapter().parse(ok, Utc::now()).unwrap().len(), 1);

        let bad = "node_load1 not_a_number\n";
        let err = adapter().parse(bad, Utc::now()).unwrap_err();
        assert!(matches!(err, NodeExporterError::MalformedLine { line: 1, .. }));
    }
}

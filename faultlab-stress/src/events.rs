//! Stress events, the CSV tracker, and the broadcast bus.

use chrono::{DateTime, Utc};
use faultlab_common::EntityId;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::warn;

/// The kinds of stress that can be applied to a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StressType {
    Cpu,
    Memory,
    Io,
    NetworkLoss,
    NetworkLatency,
    NetworkBandwidth,
    Disk,
}

impl StressType {
    pub const ALL: [StressType; 7] = [
        Self::Cpu,
        Self::Memory,
        Self::Io,
        Self::NetworkLoss,
        Self::NetworkLatency,
        Self::NetworkBandwidth,
        Self::Disk,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Memory => "memory",
            Self::Io => "io",
            Self::NetworkLoss => "network_loss",
            Self::NetworkLatency => "network_latency",
            Self::NetworkBandwidth => "network_bandwidth",
            Self::Disk => "disk",
        }
    }

    /// Unit the quantity is expressed in.
    pub fn unit(&self) -> &'static str {
        match self {
            Self::Cpu | Self::NetworkLoss => "percent",
            Self::Memory => "MB",
            Self::Io | Self::Disk => "workers",
            Self::NetworkLatency => "ms",
            Self::NetworkBandwidth => "kbps",
        }
    }

    /// Network-class stresses shape an interface and need reverting.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            Self::NetworkLoss | Self::NetworkLatency | Self::NetworkBandwidth
        )
    }
}

impl std::fmt::Display for StressType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StressType {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| TrackerError::UnknownStressType(s.to_string()))
    }
}

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("failed to write stress event file: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown stress type {0:?}")]
    UnknownStressType(String),

    #[error("malformed stress event row: {0:?}")]
    MalformedRow(String),
}

/// One applied stress, as recorded and broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StressEvent {
    pub timestamp: DateTime<Utc>,
    pub timestamp_unix: f64,
    pub target: EntityId,
    pub stress_type: StressType,
    pub quantity: f64,
    pub unit: String,
    pub duration_secs: f64,
    /// Set for network-class stresses.
    pub interface: Option<String>,
}

impl StressEvent {
    /// Build an event stamped now.
    pub fn new(
        target: EntityId,
        stress_type: StressType,
        quantity: f64,
        duration_secs: f64,
        interface: Option<String>,
    ) -> Self {
        let timestamp = Utc::now();
        Self {
            timestamp,
            timestamp_unix: timestamp.timestamp_micros() as f64 / 1e6,
            target,
            stress_type,
            quantity,
            unit: stress_type.unit().to_string(),
            duration_secs,
            interface,
        }
    }

    pub const CSV_HEADER: &'static str =
        "timestamp,timestamp_unix,container,stress_type,quantity,unit,duration,interface";

    /// One CSV row matching [`Self::CSV_HEADER`].
    pub fn to_csv_row(&self) -> String {
        format!(
            "{},{},{},{},{},{},{},{}",
            self.timestamp.to_rfc3339(),
            self.timestamp_unix,
            self.target,
            self.stress_type,
            self.quantity,
            self.unit,
            self.duration_secs,
            self.interface.as_deref().unwrap_or("")
        )
    }

    /// Parse a row written by [`Self::to_csv_row`].
    pub fn from_csv_row(row: &str) -> Result<Self, TrackerError> {
        let fields: Vec<&str> = row.trim_end().split(',').collect();
        if fields.len() != 8 {
            return Err(TrackerError::MalformedRow(row.to_string()));
        }
        let malformed = || TrackerError::MalformedRow(row.to_string());

        let timestamp = DateTime::parse_from_rfc3339(fields[0])
            .map_err(|_| malformed())?
            .with_timezone(&Utc);
        Ok(Self {
            timestamp,
            timestamp_unix: fields[1].parse().map_err(|_| malformed())?,
            target: EntityId::new(fields[2]),
            stress_type: fields[3].parse()?,
            quantity: fields[4].parse().map_err(|_| malformed())?,
            unit: fields[5].to_string(),
            duration_secs: fields[6].parse().map_err(|_| malformed())?,
            interface: if fields[7].is_empty() {
                None
            } else {
                Some(fields[7].to_string())
            },
        })
    }
}

/// Appends stress events to a CSV file as they are applied.
pub struct EventTracker {
    file: File,
}

impl EventTracker {
    /// Create the tracking file and write the header.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, TrackerError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        if file.metadata()?.len() == 0 {
            writeln!(file, "{}", StressEvent::CSV_HEADER)?;
        }
        Ok(Self { file })
    }

    /// Record one event; flushed immediately so the file tracks reality.
    pub fn record(&mut self, event: &StressEvent) -> Result<(), TrackerError> {
        writeln!(self.file, "{}", event.to_csv_row())?;
        self.file.flush()?;
        Ok(())
    }
}

const DEFAULT_BUS_BUFFER: usize = 256;

/// Broadcast channel for stress events (JSON lines).
///
/// The effective buffer is clamped to at least the default so bursty
/// rounds do not lag slow observers immediately.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<String>,
}

impl EventBus {
    pub fn new(buffer: usize) -> Self {
        let buffer = buffer.max(1).max(DEFAULT_BUS_BUFFER);
        let (sender, _) = broadcast::channel(buffer);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.sender.subscribe()
    }

    /// Emit one event as a JSON line. Send failures (no subscribers) are
    /// silent; serialization failures are logged.
    pub fn emit(&self, event: &StressEvent) {
        match serde_json::to_string(event) {
            Ok(line) => {
                let _ = self.sender.send(line);
            }
            Err(err) => warn!(error = %err, "failed to serialize stress event"),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_BUFFER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::info;
    use tracing_subscriber::fmt;

    fn init_test_logging() {
        let _ = fmt().with_test_writer().try_init();
    }

    fn event(stress_type: StressType, interface: Option<&str>) -> StressEvent {
        StressEvent::new(
            EntityId::new("cu0"),
            stress_type,
            42.5,
            12.0,
            interface.map(str::to_string),
        )
    }

    #[test]
    fn test_csv_row_round_trip() {
        init_test_logging();
        info!("TEST START: test_csv_row_round_trip");

        let original = event(StressType::NetworkLatency, Some("eth0"));
        let row = original.to_csv_row();
        info!(row, "RESULT: serialized row");
        let parsed = StressEvent::from_csv_row(&row).unwrap();

        assert_eq!(parsed.target, original.target);
        assert_eq!(parsed.stress_type, original.stress_type);
        assert_eq!(parsed.quantity, original.quantity);
        assert_eq!(parsed.unit, "ms");
        assert_eq!(parsed.duration_secs, original.duration_secs);
        assert_eq!(parsed.interface, original.interface);
        assert_eq!(parsed.timestamp_unix, original.timestamp_unix);

        info!("TEST PASS: test_csv_row_round_trip");
    }

    #[test]
    fn test_interface_empty_for_non_network_types() {
        init_test_logging();

        let e = event(StressType::Cpu, None);
        assert!(e.to_csv_row().ends_with(','));
        let parsed = StressEvent::from_csv_row(&e.to_csv_row()).unwrap();
        assert_eq!(parsed.interface, None);
    }

    #[test]
    fn test_units_per_type() {
        init_test_logging();

        assert_eq!(StressType::Cpu.unit(), "percent");
        assert_eq!(StressType::Memory.unit(), "MB");
        assert_eq!(StressType::Io.unit(), "workers");
        assert_eq!(StressType::NetworkLoss.unit(), "percent");
        assert_eq!(StressType::NetworkLatency.unit(), "ms");
        assert_eq!(StressType::NetworkBandwidth.unit(), "kbps");
        assert_eq!(StressType::Disk.unit(), "workers");
    }

    #[test]
    fn test_malformed_rows_rejected() {
        init_test_logging();

        assert!(StressEvent::from_csv_row("too,few,fields").is_err());
        let bad_type =
            "2026-01-01T00:00:00+00:00,1.0,cu0,volcano,1,percent,5,";
        assert!(matches!(
            StressEvent::from_csv_row(bad_type),
            Err(TrackerError::UnknownStressType(_))
        ));
    }

    #[test]
    fn test_tracker_writes_header_once() {
        init_test_logging();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stress_events.csv");
        {
            let mut tracker = EventTracker::create(&path).unwrap();
            tracker.record(&event(StressType::Cpu, None)).unwrap();
        }
        {
            let mut tracker = EventTracker::create(&path).unwrap();
            tracker.record(&event(StressType::Memory, None)).unwrap();
        }

        let content = std::fs::read_to_string(&path).unwrap();
        let headers = content
            .lines()
            .filter(|l| *l == StressEvent::CSV_HEADER)
            .count();
        assert_eq!(headers, 1);
        assert_eq!(content.lines().count(), 3);
    }

    #[tokio::test]
    async fn test_bus_delivers_json_lines() {
        init_test_logging();

        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.emit(&event(StressType::Disk, None));

        let line = rx.recv().await.unwrap();
        let parsed: StressEvent = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed.stress_type, StressType::Disk);
    }
}

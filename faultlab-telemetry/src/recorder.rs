//! Per-source pollers and the synchronized recorder.
//!
//! Each polled source runs its own fetch loop with its own clock; the
//! recorder runs a separate tick loop that snapshots whatever every
//! source last produced and stamps all of a tick's rows with one
//! identical timestamp. Alignment is by tick, never by sample arrival.

use crate::fetch::ScrapeClient;
use crate::rate::RateConverter;
use crate::sample::{MetricSample, SourceKind};
use crate::sink::RecordSink;
use crate::sources::cadvisor::CadvisorAdapter;
use crate::sources::node_exporter::NodeExporterAdapter;
use chrono::{SecondsFormat, Utc};
use faultlab_common::EntityId;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// One timestamp-aligned row for one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct SynchronizedRecord {
    /// Fractional unix seconds; identical for every record of one tick.
    pub timestamp_unix: f64,
    /// The same instant in ISO-8601.
    pub timestamp_iso: String,
    pub entity: EntityId,
    /// Normalized metric name to value, prefixed by source kind.
    pub metrics: BTreeMap<String, f64>,
}

/// Shared map of the latest normalized samples per source and entity.
///
/// Pollers and push clients write; the recorder tick loop reads. The
/// mutex is held only for the map operation itself, never across awaits.
#[derive(Debug, Clone, Default)]
pub struct LatestSamples {
    inner: Arc<Mutex<HashMap<SourceKind, HashMap<EntityId, BTreeMap<String, f64>>>>>,
}

impl LatestSamples {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a polled source's entire entity map. Entities absent from
    /// the new cycle drop out, so a stopped container stops producing
    /// rows instead of freezing at its last values.
    pub fn replace_source(
        &self,
        source: SourceKind,
        entities: HashMap<EntityId, BTreeMap<String, f64>>,
    ) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.insert(source, entities);
    }

    /// Merge the latest samples for one entity of a push source, leaving
    /// the source's other entities untouched.
    pub fn merge_entity(&self, source: SourceKind, entity: EntityId, samples: Vec<MetricSample>) {
        let metrics: BTreeMap<String, f64> =
            samples.into_iter().map(|s| (s.name, s.value)).collect();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.entry(source).or_default().insert(entity, metrics);
    }

    /// Clone the current state for one recorder tick.
    pub fn snapshot(&self) -> HashMap<SourceKind, HashMap<EntityId, BTreeMap<String, f64>>> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.clone()
    }
}

/// The polled exposition formats.
pub enum PolledSource {
    ContainerRuntime(CadvisorAdapter),
    HostExporter(NodeExporterAdapter),
}

impl PolledSource {
    fn kind(&self) -> SourceKind {
        match self {
            Self::ContainerRuntime(_) => SourceKind::ContainerRuntime,
            Self::HostExporter(_) => SourceKind::HostExporter,
        }
    }
}

/// Fetch loop for one polled source.
///
/// Owns its adapter and rate converter; fetch, parse, and rate
/// conversion run serially, so at most one request per source is in
/// flight. A tick that fires mid-fetch is skipped, never queued.
pub struct SourcePoller {
    url: String,
    interval: Duration,
    parser: PolledSource,
    client: ScrapeClient,
    rates: RateConverter,
    latest: LatestSamples,
}

impl SourcePoller {
    pub fn new(
        url: impl Into<String>,
        interval: Duration,
        parser: PolledSource,
        latest: LatestSamples,
    ) -> Self {
        Self {
            url: url.into(),
            interval,
            parser,
            client: ScrapeClient::new(),
            rates: RateConverter::new(),
            latest,
        }
    }

    /// Run the poll loop until the task is aborted.
    pub async fn run(mut self) {
        let source = self.parser.kind();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(source = %source, url = %self.url, "source poller started");

        loop {
            ticker.tick().await;
            self.poll_once().await;
        }
    }

    /// One fetch-parse-convert cycle. Any failure leaves previous state
    /// untouched and waits for the next tick.
    async fn poll_once(&mut self) {
        let source = self.parser.kind();
        let body = match self.client.fetch_text(&self.url).await {
            Ok(body) => body,
            Err(err) => {
                warn!(source = %source, url = %self.url, error = %err, "scrape failed, skipping cycle");
                return;
            }
        };

        let now = Utc::now();
        let samples = match &self.parser {
            PolledSource::ContainerRuntime(adapter) => match adapter.parse(&body, now) {
                Ok(samples) => samples,
                Err(err) => {
                    warn!(source = %source, error = %err, "parse failed, skipping cycle");
                    return;
                }
            },
            PolledSource::HostExporter(adapter) => match adapter.parse(&body, now) {
                Ok(samples) => samples,
                Err(err) => {
                    warn!(source = %source, error = %err, "parse failed, skipping cycle");
                    return;
                }
            },
        };

        let mut entities: HashMap<EntityId, BTreeMap<String, f64>> = HashMap::new();
        for sample in &samples {
            if let Some((name, value)) = self.rates.normalize(sample) {
                entities
                    .entry(sample.entity.clone())
                    .or_default()
                    .insert(name, value);
            }
        }
        debug!(
            source = %source,
            entities = entities.len(),
            series = self.rates.tracked_series(),
            "poll cycle complete"
        );
        self.latest.replace_source(source, entities);
    }
}

/// Recorder configuration.
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Tick interval for assembling synchronized rows.
    pub tick_interval: Duration,
    /// Entities that get a row every tick.
    pub entities: Vec<EntityId>,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            entities: Vec::new(),
        }
    }
}

/// Assembles per-entity synchronized records from the latest samples.
pub struct Recorder<S: RecordSink> {
    config: RecorderConfig,
    latest: LatestSamples,
    sink: S,
}

impl<S: RecordSink> Recorder<S> {
    pub fn new(config: RecorderConfig, latest: LatestSamples, sink: S) -> Self {
        Self {
            config,
            latest,
            sink,
        }
    }

    /// Run the tick loop until the task is aborted.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            entities = self.config.entities.len(),
            interval_ms = self.config.tick_interval.as_millis() as u64,
            "recorder started"
        );

        loop {
            ticker.tick().await;
            self.tick_once();
        }
    }

    /// Assemble and persist one tick's records.
    fn tick_once(&mut self) {
        let now = Utc::now();
        let records = assemble_records(&self.config.entities, &self.latest.snapshot(), now);
        for record in records {
            if let Err(err) = self.sink.write(&record) {
                warn!(entity = %record.entity, error = %err, "failed to persist record");
            }
        }
    }
}

/// Build one record per entity from a snapshot, all stamped with the
/// same instant. Host-level sources contribute to every entity's row;
/// entity-scoped sources only to their own. Metric names are prefixed
/// with the source kind so sources cannot collide.
pub fn assemble_records(
    entities: &[EntityId],
    snapshot: &HashMap<SourceKind, HashMap<EntityId, BTreeMap<String, f64>>>,
    now: chrono::DateTime<Utc>,
) -> Vec<SynchronizedRecord> {
    let timestamp_unix = now.timestamp_micros() as f64 / 1e6;
    let timestamp_iso = now.to_rfc3339_opts(SecondsFormat::Millis, true);

    entities
        .iter()
        .map(|entity| {
            let mut metrics = BTreeMap::new();
            for (source, per_entity) in snapshot {
                if source.is_host_level() {
                    for values in per_entity.values() {
                        for (name, value) in values {
                            metrics.insert(format!("{source}_{name}"), *value);
                        }
                    }
                } else if let Some(values) = per_entity.get(entity) {
                    for (name, value) in values {
                        metrics.insert(format!("{source}_{name}"), *value);
                    }
                }
            }
            SynchronizedRecord {
                timestamp_unix,
                timestamp_iso: timestamp_iso.clone(),
                entity: entity.clone(),
                metrics,
            }
        })
        .collect()
}

//! Telemetry normalization and synchronization for faultlab.
//!
//! This crate turns heterogeneous metric sources (container-runtime JSON,
//! Prometheus-style text exposition, pushed application metrics) into a
//! uniform sample model, converts monotonic counters into per-second
//! rates, and records timestamp-aligned rows for offline analysis.
//!
//! ## Modules
//!
//! - [`sample`]: the uniform sample model shared by all adapters
//! - [`rate`]: stateful counter-to-rate conversion
//! - [`sources`]: one adapter per exposition format
//! - [`fetch`]: bounded-timeout HTTP scraping with best-effort bodies
//! - [`recorder`]: per-source pollers and the synchronized recorder
//! - [`sink`]: record persistence (CSV, one file per entity)

#![forbid(unsafe_code)]

pub mod fetch;
pub mod rate;
pub mod recorder;
pub mod sample;
pub mod sink;
pub mod sources;

pub use fetch::{FetchError, ScrapeClient};
pub use rate::{RateConverter, RateKey};
pub use recorder::{
    LatestSamples, PolledSource, Recorder, RecorderConfig, SourcePoller, SynchronizedRecord,
};
pub use sample::{MetricKind, MetricSample, SourceKind};
pub use sink::{CsvSink, RecordSink, SinkError};
pub use sources::app_push::{AppPushAdapter, AppPushError, PushClient};
pub use sources::cadvisor::{CadvisorAdapter, CadvisorError};
pub use sources::node_exporter::{NodeExporterAdapter, NodeExporterError};

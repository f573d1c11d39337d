//! Push-style application metrics over a persistent TCP connection.
//!
//! The application speaks newline-delimited JSON. On connect the client
//! sends `{"cmd": "metrics_subscribe"}`; every subsequent line is one
//! JSON object carrying a metric family. Objects that themselves contain
//! a `"cmd"` field are command responses and are ignored. Nested objects
//! and arrays are flattened into underscore-joined gauge names; only
//! numeric leaves become samples.

use crate::recorder::LatestSamples;
use crate::sample::{MetricSample, SourceKind};
use chrono::Utc;
use faultlab_common::EntityId;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

const SUBSCRIBE_CMD: &str = "{\"cmd\": \"metrics_subscribe\"}\n";
const RECONNECT_MIN: Duration = Duration::from_secs(1);
const RECONNECT_MAX: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum AppPushError {
    #[error("invalid pushed metrics JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("pushed metrics line is not a JSON object")]
    NotAnObject,
}

/// Flattens pushed JSON objects into gauge samples.
#[derive(Debug, Clone)]
pub struct AppPushAdapter {
    /// Entity assigned when an object carries no `entity` field.
    default_entity: EntityId,
}

impl AppPushAdapter {
    pub fn new(default_entity: EntityId) -> Self {
        Self { default_entity }
    }

    /// Parse one pushed line into samples. Objects containing a `cmd`
    /// field yield an empty vec.
    pub fn parse(&self, raw: &str) -> Result<Vec<MetricSample>, AppPushError> {
        let root: Value = serde_json::from_str(raw)?;
        let obj = root.as_object().ok_or(AppPushError::NotAnObject)?;

        if obj.contains_key("cmd") {
            debug!("ignoring command response from push source");
            return Ok(Vec::new());
        }

        let entity = obj
            .get("entity")
            .and_then(Value::as_str)
            .map(EntityId::new)
            .unwrap_or_else(|| self.default_entity.clone());

        let sampled_at = Utc::now();
        let mut samples = Vec::new();
        for (key, value) in obj {
            if key == "entity" {
                continue;
            }
            flatten(key, value, &mut |name, v| {
                samples.push(MetricSample::gauge(
                    SourceKind::AppPush,
                    entity.clone(),
                    name,
                    v,
                    sampled_at,
                ));
            });
        }
        Ok(samples)
    }
}

/// Depth-first flatten: nested keys join with `_`, array elements join
/// with their index, non-numeric leaves are dropped.
fn flatten(prefix: &str, value: &Value, emit: &mut impl FnMut(String, f64)) {
    match value {
        Value::Number(n) => {
            if let Some(v) = n.as_f64() {
                emit(prefix.to_string(), v);
            }
        }
        Value::Object(map) => {
            for (key, nested) in map {
                flatten(&format!("{prefix}_{key}"), nested, emit);
            }
        }
        Value::Array(items) => {
            for (idx, nested) in items.iter().enumerate() {
                flatten(&format!("{prefix}_{idx}"), nested, emit);
            }
        }
        _ => {}
    }
}

/// Persistent subscription client for one push source.
///
/// Runs until the task is aborted; connection loss triggers a reconnect
/// with exponential backoff, and the latest samples per entity are kept
/// in the shared [`LatestSamples`] map for the recorder to pick up.
pub struct PushClient {
    addr: String,
    adapter: AppPushAdapter,
    latest: LatestSamples,
}

impl PushClient {
    pub fn new(addr: impl Into<String>, adapter: AppPushAdapter, latest: LatestSamples) -> Self {
        Self {
            addr: addr.into(),
            adapter,
            latest,
        }
    }

    /// Connect, subscribe, and consume pushed lines forever.
    pub async fn run(self) {
        let mut backoff = RECONNECT_MIN;
        loop {
            match self.session().await {
                Ok(()) => {
                    warn!(addr = %self.addr, "push source closed the connection");
                    backoff = RECONNECT_MIN;
                }
                Err(err) => {
                    warn!(addr = %self.addr, error = %err, "push session failed");
                }
            }
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(RECONNECT_MAX);
        }
    }

    /// One connected session; returns Ok on orderly EOF.
    async fn session(&self) -> std::io::Result<()> {
        let mut stream = TcpStream::connect(&self.addr).await?;
        stream.write_all(SUBSCRIBE_CMD.as_bytes()).await?;
        info!(addr = %self.addr, "subscribed to push source");

        let mut lines = BufReader::new(stream).lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            match self.adapter.parse(&line) {
                Ok(samples) if samples.is_empty() => {}
                Ok(samples) => {
                    let entity = samples[0].entity.clone();
                    self.latest.merge_entity(SourceKind::AppPush, entity, samples);
                }
                Err(err) => {
                    warn!(addr = %self.addr, error = %err, "discarding bad pushed line");
                }
            }
        }
        Ok(())
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

    fn adapter() -> AppPushAdapter {
        AppPushAdapter::new(EntityId::new("app0"))
    }

    #[test]
    fn test_flatten_nested_objects_and_arrays() {
        init_test_logging();
        info!("TEST START: test_flatten_nested_objects_and_arrays");

        let raw = r#"{
            "entity": "ue1",
            "dl": { "brate": 1500.5, "mcs": 27 },
            "cells": [ { "rsrp": -80.0 }, { "rsrp": -95.0 } ],
            "status": "connected"
        }"#;
        let samples = adapter().parse(raw).unwrap();

        let get = |name: &str| {
            samples
                .iter()
                .find(|s| s.name == name)
                .unwrap_or_else(|| panic!("missing {name}"))
                .value
        };
        info!(count = samples.len(), "RESULT: flattened samples");
        assert_eq!(samples.len(), 4);
        assert_eq!(get("dl_brate"), 1500.5);
        assert_eq!(get("dl_mcs"), 27.0);
        assert_eq!(get("cells_0_rsrp"), -80.0);
        assert_eq!(get("cells_1_rsrp"), -95.0);
        assert!(samples.iter().all(|s| s.entity.as_str() == "ue1"));

        info!("TEST PASS: test_flatten_nested_objects_and_arrays");
    }

    #[test]
    fn test_default_entity_when_unlabelled() {
        init_test_logging();

        let samples = adapter().parse(r#"{"load": 0.7}"#).unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].entity.as_str(), "app0");
        assert_eq!(samples[0].name, "load");
    }

    #[test]
    fn test_command_responses_ignored() {
        init_test_logging();

        let samples = adapter()
            .parse(r#"{"cmd": "metrics_subscribe", "status": 0}"#)
            .unwrap();
        assert!(samples.is_empty());
    }

    #[test]
    fn test_non_object_lines_rejected() {
        init_test_logging();

        assert!(matches!(
            adapter().parse("[1,2]"),
            Err(AppPushError::NotAnObject)
        ));
        assert!(matches!(adapter().parse("{oops"), Err(AppPushError::Json(_))));
    }
}

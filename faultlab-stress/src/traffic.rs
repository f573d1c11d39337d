//! Drives per-entity bandwidth allocations through pattern slices.
//!
//! At every slice transition the engine computes one allocation per
//! entity, hands each to the [`TrafficDriver`], and appends a row to the
//! traffic log. In aggregate mode the slice set-point is the combined
//! bandwidth of all entities; otherwise every entity follows the full
//! pattern on its own.

use crate::pattern::{split_bandwidth, TrafficPattern};
use chrono::Utc;
use faultlab_common::EntityId;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum TrafficError {
    #[error("no entities configured for traffic generation")]
    NoEntities,

    #[error("failed to write traffic log: {0}")]
    Io(#[from] std::io::Error),
}

/// Bandwidth assigned to one entity for one slice.
#[derive(Debug, Clone, PartialEq)]
pub struct PerEntityAllocation {
    pub slice_index: usize,
    pub entity: EntityId,
    pub bandwidth_mbps: f64,
    pub duration: Duration,
}

/// Applies one allocation to the world (iperf, shaping, a test double).
pub trait TrafficDriver: Send + Sync {
    fn drive(&self, allocation: &PerEntityAllocation) -> anyhow::Result<()>;
}

/// Driver that only logs allocations; useful for dry runs.
pub struct LogDriver;

impl TrafficDriver for LogDriver {
    fn drive(&self, allocation: &PerEntityAllocation) -> anyhow::Result<()> {
        info!(
            entity = %allocation.entity,
            slice = allocation.slice_index,
            bandwidth_mbps = allocation.bandwidth_mbps,
            duration_s = allocation.duration.as_secs_f64(),
            "traffic allocation"
        );
        Ok(())
    }
}

/// Timestamped CSV log of every allocation.
pub struct TrafficLog {
    file: File,
}

impl TrafficLog {
    pub const CSV_HEADER: &'static str =
        "timestamp,timestamp_unix,slice_index,bandwidth_mbps,entity,duration_seconds";

    pub fn create(path: impl AsRef<Path>) -> Result<Self, TrafficError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        if file.metadata()?.len() == 0 {
            writeln!(file, "{}", Self::CSV_HEADER)?;
        }
        Ok(Self { file })
    }

    pub fn record(&mut self, allocation: &PerEntityAllocation) -> Result<(), TrafficError> {
        let now = Utc::now();
        writeln!(
            self.file,
            "{},{},{},{},{},{}",
            now.to_rfc3339(),
            now.timestamp_micros() as f64 / 1e6,
            allocation.slice_index,
            allocation.bandwidth_mbps,
            allocation.entity,
            allocation.duration.as_secs_f64()
        )?;
        self.file.flush()?;
        Ok(())
    }
}

/// Plays a pattern against a set of entities.
pub struct TrafficEngine<D: TrafficDriver> {
    pattern: TrafficPattern,
    entities: Vec<EntityId>,
    /// Split each set-point across entities instead of replicating it.
    aggregate: bool,
    driver: D,
    log: Option<TrafficLog>,
    rng: StdRng,
}

impl<D: TrafficDriver> TrafficEngine<D> {
    pub fn new(
        pattern: TrafficPattern,
        entities: Vec<EntityId>,
        aggregate: bool,
        driver: D,
        log: Option<TrafficLog>,
    ) -> Result<Self, TrafficError> {
        if entities.is_empty() {
            return Err(TrafficError::NoEntities);
        }
        Ok(Self {
            pattern,
            entities,
            aggregate,
            driver,
            log,
            rng: StdRng::from_entropy(),
        })
    }

    #[cfg(test)]
    fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Allocations for one slice. Aggregate weights are drawn fresh at
    /// every call, so each slice transition reshuffles the split.
    pub fn allocations_for_slice(&mut self, slice: usize) -> Vec<PerEntityAllocation> {
        let setpoint = self.pattern.setpoint(slice);
        let duration = self.pattern.slice_duration();

        let shares: Vec<f64> = if self.aggregate {
            split_bandwidth(setpoint, self.entities.len(), &mut self.rng)
        } else {
            vec![setpoint; self.entities.len()]
        };

        self.entities
            .iter()
            .zip(shares)
            .map(|(entity, bandwidth_mbps)| PerEntityAllocation {
                slice_index: slice,
                entity: entity.clone(),
                bandwidth_mbps,
                duration,
            })
            .collect()
    }

    /// Apply one slice's allocations to the driver and the log.
    fn apply_slice(&mut self, slice: usize) {
        let allocations = self.allocations_for_slice(slice);
        for allocation in &allocations {
            if let Err(err) = self.driver.drive(allocation) {
                warn!(entity = %allocation.entity, error = %err, "traffic driver failed");
            }
            if let Some(log) = &mut self.log {
                if let Err(err) = log.record(allocation) {
                    warn!(error = %err, "failed to log traffic allocation");
                }
            }
        }
    }

    /// Play the pattern for `total` wall time, one slice at a time.
    pub async fn run(mut self, total: Duration) {
        let slice_duration = self.pattern.slice_duration();
        let started = tokio::time::Instant::now();
        info!(
            slices = self.pattern.len(),
            slice_s = slice_duration.as_secs_f64(),
            total_s = total.as_secs_f64(),
            aggregate = self.aggregate,
            "traffic engine started"
        );

        loop {
            let elapsed = started.elapsed();
            if elapsed >= total {
                break;
            }
            let slice = self.pattern.slice_index(elapsed);
            self.apply_slice(slice);

            let remaining = total - elapsed;
            tokio::time::sleep(slice_duration.min(remaining)).await;
        }
        info!("traffic engine finished");
    }
}

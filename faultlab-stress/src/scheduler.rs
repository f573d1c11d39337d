//! Stress scenarios over a pluggable applicator.
//!
//! A scheduler round decides which stresses start; the applicator is the
//! side-effect seam (docker exec, tc, or a test double). Every distinct
//! (target, stress type) pair has an idle/active lifecycle: concurrent
//! activations of different pairs are fine, but a pair that is already
//! active cannot start again until its duration elapses.

use crate::events::{EventBus, EventTracker, StressEvent, StressType};
use crate::pattern::{SlopeGate, TrafficPattern};
use faultlab_common::EntityId;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Default Bernoulli probability per stress type per round.
const DEFAULT_PROBABILITY: f64 = 0.2;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("no stress targets configured")]
    NoTargets,

    #[error("no stress types configured")]
    NoStressTypes,

    #[error("{name} range is inverted or non-positive: ({min}, {max})")]
    InvalidRange {
        name: &'static str,
        min: f64,
        max: f64,
    },

    #[error("probability for {stress_type} is {value}, expected [0, 1]")]
    InvalidProbability { stress_type: StressType, value: f64 },

    #[error("{name} is {value}, expected a positive number of seconds")]
    InvalidDuration { name: &'static str, value: f64 },

    #[error("traffic_aware scenario requires a traffic pattern")]
    MissingPattern,
}

/// How the scheduler picks what to apply when.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Independent Bernoulli trial per type at random intervals.
    Random,
    /// Fixed-order sweep over every (type, target) pair.
    Sequential,
    /// Random, gated on the traffic pattern's slope.
    TrafficAware,
}

/// Quantity ranges drawn from for each stress type.
#[derive(Debug, Clone)]
pub struct StressRanges {
    pub cpu_percent: (f64, f64),
    pub memory_mb: (f64, f64),
    pub io_workers: (u32, u32),
    pub network_loss_percent: (f64, f64),
    pub network_latency_ms: (f64, f64),
    pub network_bandwidth_kbps: (f64, f64),
    pub disk_workers: (u32, u32),
}

impl Default for StressRanges {
    fn default() -> Self {
        Self {
            cpu_percent: (20.0, 80.0),
            memory_mb: (100.0, 500.0),
            io_workers: (1, 4),
            network_loss_percent: (1.0, 10.0),
            network_latency_ms: (10.0, 100.0),
            network_bandwidth_kbps: (1000.0, 10000.0),
            disk_workers: (1, 2),
        }
    }
}

impl StressRanges {
    fn validate(&self) -> Result<(), SchedulerError> {
        let checks: [(&'static str, f64, f64); 7] = [
            ("cpu_percent", self.cpu_percent.0, self.cpu_percent.1),
            ("memory_mb", self.memory_mb.0, self.memory_mb.1),
            ("io_workers", self.io_workers.0 as f64, self.io_workers.1 as f64),
            (
                "network_loss_percent",
                self.network_loss_percent.0,
                self.network_loss_percent.1,
            ),
            (
                "network_latency_ms",
                self.network_latency_ms.0,
                self.network_latency_ms.1,
            ),
            (
                "network_bandwidth_kbps",
                self.network_bandwidth_kbps.0,
                self.network_bandwidth_kbps.1,
            ),
            ("disk_workers", self.disk_workers.0 as f64, self.disk_workers.1 as f64),
        ];
        for (name, min, max) in checks {
            if min <= 0.0 || min > max {
                return Err(SchedulerError::InvalidRange { name, min, max });
            }
        }
        Ok(())
    }

    /// Fixed quantities used by the sequential scenario.
    fn sequential_quantity(stress_type: StressType) -> f64 {
        match stress_type {
            StressType::Cpu => 50.0,
            StressType::Memory => 256.0,
            StressType::Io => 2.0,
            StressType::NetworkLoss => 5.0,
            StressType::NetworkLatency => 50.0,
            StressType::NetworkBandwidth => 5000.0,
            StressType::Disk => 1.0,
        }
    }
}

/// Scheduler configuration; validated once at construction.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub scenario: Scenario,
    pub targets: Vec<EntityId>,
    /// Types eligible for activation, in sequential-scenario order.
    pub stress_types: Vec<StressType>,
    /// Per-type probabilities; types not listed use the default.
    pub probabilities: HashMap<StressType, f64>,
    /// Seconds between rounds, drawn uniformly.
    pub interval_range: (f64, f64),
    /// Seconds a random stress runs, drawn uniformly.
    pub duration_range: (f64, f64),
    /// Fixed per-step duration for the sequential scenario.
    pub sequential_duration_secs: f64,
    /// Rest between sequential steps.
    pub rest_secs: f64,
    /// Interface network-class stresses are applied to.
    pub interface: String,
    pub ranges: StressRanges,
    /// Required by the traffic_aware scenario.
    pub pattern: Option<TrafficPattern>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            scenario: Scenario::Random,
            targets: Vec::new(),
            stress_types: StressType::ALL.to_vec(),
            probabilities: HashMap::new(),
            interval_range: (10.0, 60.0),
            duration_range: (5.0, 30.0),
            sequential_duration_secs: 30.0,
            rest_secs: 10.0,
            interface: "eth0".to_string(),
            ranges: StressRanges::default(),
            pattern: None,
        }
    }
}

impl SchedulerConfig {
    fn validate(&self) -> Result<(), SchedulerError> {
        if self.targets.is_empty() {
            return Err(SchedulerError::NoTargets);
        }
        if self.stress_types.is_empty() {
            return Err(SchedulerError::NoStressTypes);
        }
        for (range, name) in [
            (self.interval_range, "interval"),
            (self.duration_range, "duration"),
        ] {
            if range.0 <= 0.0 || range.0 > range.1 {
                return Err(SchedulerError::InvalidRange {
                    name,
                    min: range.0,
                    max: range.1,
                });
            }
        }
        if !self.sequential_duration_secs.is_finite() || self.sequential_duration_secs <= 0.0 {
            return Err(SchedulerError::InvalidDuration {
                name: "sequential_duration_secs",
                value: self.sequential_duration_secs,
            });
        }
        if !self.rest_secs.is_finite() || self.rest_secs < 0.0 {
            return Err(SchedulerError::InvalidDuration {
                name: "rest_secs",
                value: self.rest_secs,
            });
        }
        for (&stress_type, &value) in &self.probabilities {
            if !(0.0..=1.0).contains(&value) {
                return Err(SchedulerError::InvalidProbability { stress_type, value });
            }
        }
        if self.scenario == Scenario::TrafficAware && self.pattern.is_none() {
            return Err(SchedulerError::MissingPattern);
        }
        self.ranges.validate()
    }

    fn probability(&self, stress_type: StressType) -> f64 {
        self.probabilities
            .get(&stress_type)
            .copied()
            .unwrap_or(DEFAULT_PROBABILITY)
    }
}

/// Side-effect seam for applying and reverting stresses.
///
/// `apply` starts a stress that ends on its own after the event's
/// duration; `revert_all` undoes anything persistent (tc rules, load
/// generators) at shutdown.
pub trait StressApplicator: Send + Sync {
    fn apply(&self, event: &StressEvent) -> anyhow::Result<()>;
    fn revert_all(&self) -> anyhow::Result<()>;
}

/// Applicator that only logs; useful for dry runs.
pub struct NoopApplicator;

impl StressApplicator for NoopApplicator {
    fn apply(&self, event: &StressEvent) -> anyhow::Result<()> {
        info!(
            target = %event.target,
            stress_type = %event.stress_type,
            quantity = event.quantity,
            unit = %event.unit,
            duration_s = event.duration_secs,
            "stress applied (noop)"
        );
        Ok(())
    }

    fn revert_all(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

type ActiveSet = Arc<Mutex<HashSet<(EntityId, StressType)>>>;

/// Runs stress scenarios against an applicator.
pub struct StressScheduler<A: StressApplicator> {
    config: SchedulerConfig,
    applicator: Arc<A>,
    tracker: Option<EventTracker>,
    bus: EventBus,
    gate: Option<SlopeGate>,
    active: ActiveSet,
    rng: StdRng,
}

impl<A: StressApplicator> StressScheduler<A> {
    /// Validate the configuration and build the scheduler. Invalid
    /// configuration is an error here, never a per-round condition.
    pub fn new(
        config: SchedulerConfig,
        applicator: Arc<A>,
        tracker: Option<EventTracker>,
        bus: EventBus,
    ) -> Result<Self, SchedulerError> {
        config.validate()?;
        let gate = config.pattern.clone().map(SlopeGate::new);
        Ok(Self {
            config,
            applicator,
            tracker,
            bus,
            gate,
            active: Arc::default(),
            rng: StdRng::from_entropy(),
        })
    }

    #[cfg(test)]
    fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Whether a round starting after `elapsed` may activate anything.
    fn round_allowed(&self, elapsed: Duration) -> bool {
        match (self.config.scenario, &self.gate) {
            (Scenario::TrafficAware, Some(gate)) => gate.is_open(elapsed),
            _ => true,
        }
    }

    /// Draw a quantity for one stress type from the configured ranges.
    fn draw_quantity(&mut self, stress_type: StressType) -> f64 {
        let r = &self.config.ranges;
        match stress_type {
            StressType::Cpu => self.rng.gen_range(r.cpu_percent.0..=r.cpu_percent.1),
            StressType::Memory => self.rng.gen_range(r.memory_mb.0..=r.memory_mb.1),
            StressType::Io => self.rng.gen_range(r.io_workers.0..=r.io_workers.1) as f64,
            StressType::NetworkLoss => self
                .rng
                .gen_range(r.network_loss_percent.0..=r.network_loss_percent.1),
            StressType::NetworkLatency => self
                .rng
                .gen_range(r.network_latency_ms.0..=r.network_latency_ms.1),
            StressType::NetworkBandwidth => self
                .rng
                .gen_range(r.network_bandwidth_kbps.0..=r.network_bandwidth_kbps.1),
            StressType::Disk => self.rng.gen_range(r.disk_workers.0..=r.disk_workers.1) as f64,
        }
    }

    fn interface_for(&self, stress_type: StressType) -> Option<String> {
        stress_type
            .is_network()
            .then(|| self.config.interface.clone())
    }

    /// Decide one round's activations. Every configured type runs an
    /// independent trial, so several stresses may start in one round.
    /// Pairs that win their trial are reserved in the active set.
    fn plan_round(&mut self) -> Vec<StressEvent> {
        let mut events = Vec::new();
        for stress_type in self.config.stress_types.clone() {
            if self.rng.gen::<f64>() >= self.config.probability(stress_type) {
                continue;
            }
            let target = {
                let idx = self.rng.gen_range(0..self.config.targets.len());
                self.config.targets[idx].clone()
            };
            let pair = (target.clone(), stress_type);
            {
                let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
                if !active.insert(pair) {
                    debug!(target = %target, stress_type = %stress_type,
                        "pair already active, skipping");
                    continue;
                }
            }

            let quantity = self.draw_quantity(stress_type);
            let duration = self
                .rng
                .gen_range(self.config.duration_range.0..=self.config.duration_range.1);
            events.push(StressEvent::new(
                target,
                stress_type,
                quantity,
                duration,
                self.interface_for(stress_type),
            ));
        }
        events
    }

    /// Record, broadcast, and apply one event, releasing the pair after
    /// its duration.
    fn activate(&mut self, event: StressEvent) {
        if let Some(tracker) = &mut self.tracker {
            if let Err(err) = tracker.record(&event) {
                warn!(error = %err, "failed to record stress event");
            }
        }
        self.bus.emit(&event);

        if let Err(err) = self.applicator.apply(&event) {
            warn!(target = %event.target, stress_type = %event.stress_type, error = %err,
                "applicator failed");
        }

        let active = self.active.clone();
        let pair = (event.target.clone(), event.stress_type);
        let duration = Duration::from_secs_f64(event.duration_secs);
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            active.lock().unwrap_or_else(|e| e.into_inner()).remove(&pair);
        });
    }

    async fn run_random(&mut self, total: Duration) {
        let started = Instant::now();
        loop {
            let elapsed = started.elapsed();
            if elapsed >= total {
                break;
            }

            if self.round_allowed(elapsed) {
                for event in self.plan_round() {
                    self.activate(event);
                }
            } else {
                debug!(elapsed_s = elapsed.as_secs_f64(), "gate closed, skipping round");
            }

            let interval = self
                .rng
                .gen_range(self.config.interval_range.0..=self.config.interval_range.1);
            let remaining = total.saturating_sub(started.elapsed());
            tokio::time::sleep(Duration::from_secs_f64(interval).min(remaining)).await;
        }
    }

    /// The sequential step order: every target per type, types in
    /// configuration order.
    fn sequential_steps(&self) -> Vec<(StressType, EntityId)> {
        self.config
            .stress_types
            .iter()
            .flat_map(|&stress_type| {
                self.config
                    .targets
                    .iter()
                    .map(move |target| (stress_type, target.clone()))
            })
            .collect()
    }

    async fn run_sequential(&mut self, total: Duration) {
        let started = Instant::now();
        let duration = self.config.sequential_duration_secs;

        for (stress_type, target) in self.sequential_steps() {
            if started.elapsed() >= total {
                break;
            }
            let event = StressEvent::new(
                target,
                stress_type,
                StressRanges::sequential_quantity(stress_type),
                duration,
                self.interface_for(stress_type),
            );
            self.activate(event);

            tokio::time::sleep(Duration::from_secs_f64(duration + self.config.rest_secs)).await;
        }
    }

    /// Run the configured scenario for `total` wall time, then revert.
    pub async fn run(mut self, total: Duration) -> anyhow::Result<()> {
        info!(
            scenario = ?self.config.scenario,
            targets = self.config.targets.len(),
            types = self.config.stress_types.len(),
            total_s = total.as_secs_f64(),
            "stress scheduler started"
        );
        match self.config.scenario {
            Scenario::Random | Scenario::TrafficAware => self.run_random(total).await,
            Scenario::Sequential => self.run_sequential(total).await,
        }
        info!("stress scheduler finished, reverting");
        self.applicator.revert_all()
    }

    /// The applicator, for shutdown paths that need to revert early.
    pub fn applicator(&self) -> Arc<A> {
        self.applicator.clone()
    }
}

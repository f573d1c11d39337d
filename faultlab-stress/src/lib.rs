//! Traffic-pattern driven stress injection for faultlab.
//!
//! [`pattern`] models cyclic bandwidth set-point patterns and the slope
//! gate derived from them; [`traffic`] drives per-entity bandwidth
//! allocations through slice transitions; [`events`] carries stress
//! events to CSV and to broadcast observers; [`scheduler`] runs the
//! stress scenarios against a pluggable applicator.

#![forbid(unsafe_code)]

pub mod events;
pub mod pattern;
pub mod scheduler;
pub mod traffic;

pub use events::{EventBus, EventTracker, StressEvent, StressType, TrackerError};
pub use pattern::{
    split_bandwidth, PatternError, SlopeGate, TrafficPattern, DEFAULT_DIURNAL_PATTERN,
};
pub use scheduler::{
    NoopApplicator, Scenario, SchedulerConfig, SchedulerError, StressApplicator, StressRanges,
    StressScheduler,
};
pub use traffic::{
    LogDriver, PerEntityAllocation, TrafficDriver, TrafficEngine, TrafficError, TrafficLog,
};

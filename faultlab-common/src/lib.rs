//! Shared building blocks for faultlab components.
//!
//! This crate provides the pieces every faultlab binary and library needs:
//! entity identifiers, duration-string parsing for CLI/config values, and
//! tracing-based logging initialization.

#![forbid(unsafe_code)]

pub mod duration;
pub mod logging;
pub mod types;

pub use duration::{parse_duration, parse_duration_secs, DurationError};
pub use logging::{init_logging, LogConfig, LogFormat, LoggingGuards};
pub use types::{parse_entity_list, EntityId};

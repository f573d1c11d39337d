//! Optional TOML configuration for the stress scheduler.
//!
//! Every field has a default, so a partial file only overrides what it
//! names. CLI flags win over the file.

use anyhow::{Context, Result};
use faultlab_stress::{SchedulerConfig, StressRanges, StressType};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StressFileConfig {
    /// Probability per stress type name, e.g. `cpu = 0.3`.
    pub probabilities: HashMap<String, f64>,
    pub min_interval_secs: f64,
    pub max_interval_secs: f64,
    pub min_stress_duration_secs: f64,
    pub max_stress_duration_secs: f64,
    pub sequential_duration_secs: f64,
    pub rest_secs: f64,
    pub interface: String,
    pub cpu_percent: (f64, f64),
    pub memory_mb: (f64, f64),
    pub io_workers: (u32, u32),
    pub network_loss_percent: (f64, f64),
    pub network_latency_ms: (f64, f64),
    pub network_bandwidth_kbps: (f64, f64),
    pub disk_workers: (u32, u32),
}

impl Default for StressFileConfig {
    fn default() -> Self {
        let base = SchedulerConfig::default();
        let ranges = StressRanges::default();
        Self {
            probabilities: HashMap::new(),
            min_interval_secs: base.interval_range.0,
            max_interval_secs: base.interval_range.1,
            min_stress_duration_secs: base.duration_range.0,
            max_stress_duration_secs: base.duration_range.1,
            sequential_duration_secs: base.sequential_duration_secs,
            rest_secs: base.rest_secs,
            interface: base.interface,
            cpu_percent: ranges.cpu_percent,
            memory_mb: ranges.memory_mb,
            io_workers: ranges.io_workers,
            network_loss_percent: ranges.network_loss_percent,
            network_latency_ms: ranges.network_latency_ms,
            network_bandwidth_kbps: ranges.network_bandwidth_kbps,
            disk_workers: ranges.disk_workers,
        }
    }
}

impl StressFileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    /// Fold this file's settings into a scheduler configuration.
    pub fn apply_to(&self, config: &mut SchedulerConfig) -> Result<()> {
        for (name, &probability) in &self.probabilities {
            let stress_type = StressType::from_str(name)
                .with_context(|| format!("unknown stress type {name:?} in config"))?;
            config.probabilities.insert(stress_type, probability);
        }
        config.interval_range = (self.min_interval_secs, self.max_interval_secs);
        config.duration_range = (self.min_stress_duration_secs, self.max_stress_duration_secs);
        config.sequential_duration_secs = self.sequential_duration_secs;
        config.rest_secs = self.rest_secs;
        config.interface = self.interface.clone();
        config.ranges = StressRanges {
            cpu_percent: self.cpu_percent,
            memory_mb: self.memory_mb,
            io_workers: self.io_workers,
            network_loss_percent: self.network_loss_percent,
            network_latency_ms: self.network_latency_ms,
            network_bandwidth_kbps: self.network_bandwidth_kbps,
            disk_workers: self.disk_workers,
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let parsed: StressFileConfig = toml::from_str(
            r#"
            min_interval_secs = 5.0
            max_interval_secs = 15.0

            [probabilities]
            cpu = 0.5
            network_loss = 0.1
            "#,
        )
        .unwrap();

        assert_eq!(parsed.min_interval_secs, 5.0);
        assert_eq!(parsed.rest_secs, 10.0);
        assert_eq!(parsed.cpu_percent, (20.0, 80.0));

        let mut config = SchedulerConfig::default();
        parsed.apply_to(&mut config).unwrap();
        assert_eq!(config.probabilities.get(&StressType::Cpu), Some(&0.5));
        assert_eq!(
            config.probabilities.get(&StressType::NetworkLoss),
            Some(&0.1)
        );
        assert_eq!(config.interval_range, (5.0, 15.0));
    }

    #[test]
    fn test_unknown_stress_type_rejected() {
        let parsed: StressFileConfig = toml::from_str(
            r#"
            [probabilities]
            volcano = 0.5
            "#,
        )
        .unwrap();
        let mut config = SchedulerConfig::default();
        assert!(parsed.apply_to(&mut config).is_err());
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(toml::from_str::<StressFileConfig>("not_a_field = 1\n").is_err());
    }
}

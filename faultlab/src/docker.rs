//! Applies stresses inside docker containers.
//!
//! CPU, memory, io, and disk use stress-ng with its own `--timeout`, so
//! they end on their own. Network shaping uses tc inside the container
//! and has to be removed explicitly: each applied rule is tracked and
//! deleted after the event's duration, and again wholesale on shutdown.

use anyhow::{bail, Context, Result};
use faultlab_common::EntityId;
use faultlab_stress::{StressApplicator, StressEvent, StressType};
use std::collections::HashSet;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

type ShapedSet = Arc<Mutex<HashSet<(EntityId, String)>>>;

pub struct DockerApplicator {
    /// (container, interface) pairs with a live tc rule.
    shaped: ShapedSet,
}

impl DockerApplicator {
    pub fn new() -> Self {
        Self {
            shaped: Arc::default(),
        }
    }

    /// Run a command inside a container. Background commands are spawned
    /// detached; foreground commands are waited on and a non-zero exit
    /// is an error.
    fn docker_exec(container: &EntityId, args: &[String], background: bool) -> Result<()> {
        let mut cmd = Command::new("docker");
        cmd.arg("exec");
        if background {
            cmd.arg("-d");
        }
        cmd.arg(container.as_str()).args(args);
        cmd.stdout(Stdio::null()).stderr(Stdio::piped());
        debug!(container = %container, ?args, background, "docker exec");

        if background {
            cmd.spawn()
                .with_context(|| format!("failed to spawn docker exec in {container}"))?;
            return Ok(());
        }

        let output = cmd
            .output()
            .with_context(|| format!("failed to run docker exec in {container}"))?;
        if !output.status.success() {
            bail!(
                "command failed in {container}: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }

    fn stress_ng_args(event: &StressEvent) -> Vec<String> {
        let timeout = format!("{}s", event.duration_secs as u64);
        let quantity = event.quantity as u64;
        let mut args: Vec<String> = vec!["stress-ng".into()];
        match event.stress_type {
            StressType::Cpu => {
                args.extend(["--cpu".into(), "1".into(), "--cpu-load".into(), quantity.to_string()]);
            }
            StressType::Memory => {
                args.extend(["--vm".into(), "1".into(), "--vm-bytes".into(), format!("{quantity}M")]);
            }
            StressType::Io => {
                args.extend(["--io".into(), quantity.to_string()]);
            }
            StressType::Disk => {
                args.extend(["--hdd".into(), quantity.to_string()]);
            }
            _ => unreachable!("network stresses use tc"),
        }
        args.extend(["--timeout".into(), timeout, "--quiet".into()]);
        args
    }

    fn tc_add_args(event: &StressEvent, interface: &str) -> Vec<String> {
        let mut args: Vec<String> = ["tc", "qdisc", "add", "dev", interface, "root"]
            .map(String::from)
            .to_vec();
        match event.stress_type {
            StressType::NetworkLoss => {
                args.extend(["netem".into(), "loss".into(), format!("{}%", event.quantity)]);
            }
            StressType::NetworkLatency => {
                args.extend(["netem".into(), "delay".into(), format!("{}ms", event.quantity)]);
            }
            StressType::NetworkBandwidth => {
                args.extend([
                    "tbf".into(),
                    "rate".into(),
                    format!("{}kbit", event.quantity as u64),
                    "burst".into(),
                    "32kbit".into(),
                    "latency".into(),
                    "400ms".into(),
                ]);
            }
            _ => unreachable!("non-network stresses use stress-ng"),
        }
        args
    }

    fn remove_rule(shaped: &ShapedSet, container: &EntityId, interface: &str) {
        let args: Vec<String> = ["tc", "qdisc", "del", "dev", interface, "root"]
            .map(String::from)
            .to_vec();
        if let Err(err) = Self::docker_exec(container, &args, false) {
            warn!(container = %container, interface, error = %err, "failed to remove tc rule");
        } else {
            info!(container = %container, interface, "removed tc rule");
        }
        shaped
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&(container.clone(), interface.to_string()));
    }

    fn apply_network(&self, event: &StressEvent) -> Result<()> {
        let interface = event.interface.as_deref().unwrap_or("eth0").to_string();
        Self::docker_exec(&event.target, &Self::tc_add_args(event, &interface), false)?;

        self.shaped
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((event.target.clone(), interface.clone()));

        // The rule outlives the exec; delete it when the duration ends.
        let shaped = self.shaped.clone();
        let container = event.target.clone();
        let duration = Duration::from_secs_f64(event.duration_secs);
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            Self::remove_rule(&shaped, &container, &interface);
        });
        Ok(())
    }
}

impl Default for DockerApplicator {
    fn default() -> Self {
        Self::new()
    }
}

impl StressApplicator for DockerApplicator {
    fn apply(&self, event: &StressEvent) -> Result<()> {
        if event.stress_type.is_network() {
            self.apply_network(event)?;
        } else {
            Self::docker_exec(&event.target, &Self::stress_ng_args(event), true)?;
        }
        info!(
            target = %event.target,
            stress_type = %event.stress_type,
            quantity = event.quantity,
            unit = %event.unit,
            duration_s = event.duration_secs,
            "stress applied"
        );
        Ok(())
    }

    fn revert_all(&self) -> Result<()> {
        let pairs: Vec<(EntityId, String)> = self
            .shaped
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect();
        for (container, interface) in pairs {
            Self::remove_rule(&self.shaped, &container, &interface);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(stress_type: StressType, quantity: f64) -> StressEvent {
        StressEvent::new(
            EntityId::new("cu0"),
            stress_type,
            quantity,
            15.0,
            stress_type.is_network().then(|| "eth0".to_string()),
        )
    }

    #[test]
    fn test_stress_ng_args() {
        let args = DockerApplicator::stress_ng_args(&event(StressType::Cpu, 50.0));
        assert_eq!(
            args,
            vec!["stress-ng", "--cpu", "1", "--cpu-load", "50", "--timeout", "15s", "--quiet"]
        );

        let args = DockerApplicator::stress_ng_args(&event(StressType::Memory, 256.0));
        assert!(args.contains(&"--vm-bytes".to_string()));
        assert!(args.contains(&"256M".to_string()));
    }

    #[test]
    fn test_tc_args_per_network_type() {
        let args = DockerApplicator::tc_add_args(&event(StressType::NetworkLoss, 5.0), "eth0");
        assert_eq!(args[..6], ["tc", "qdisc", "add", "dev", "eth0", "root"].map(String::from));
        assert!(args.contains(&"loss".to_string()));
        assert!(args.contains(&"5%".to_string()));

        let args =
            DockerApplicator::tc_add_args(&event(StressType::NetworkLatency, 50.0), "eth0");
        assert!(args.contains(&"delay".to_string()));
        assert!(args.contains(&"50ms".to_string()));

        let args =
            DockerApplicator::tc_add_args(&event(StressType::NetworkBandwidth, 5000.0), "eth0");
        assert!(args.contains(&"tbf".to_string()));
        assert!(args.contains(&"5000kbit".to_string()));
    }
}

//! iperf3 UDP traffic driver.
//!
//! Each allocation starts one iperf3 client bound to the entity's
//! address, pushing the allocated bandwidth toward a fixed server for
//! the slice duration. Clients are fire-and-forget; iperf3 exits on its
//! own when the slice ends.

use anyhow::{Context, Result};
use faultlab_stress::{PerEntityAllocation, TrafficDriver};
use std::process::{Command, Stdio};
use tracing::debug;

pub struct IperfDriver {
    server_ip: String,
    server_port: u16,
    bind_port_start: u16,
}

impl IperfDriver {
    pub fn new(server_ip: impl Into<String>, server_port: u16, bind_port_start: u16) -> Self {
        Self {
            server_ip: server_ip.into(),
            server_port,
            bind_port_start,
        }
    }

    fn client_args(&self, allocation: &PerEntityAllocation, bind_port: u16) -> Vec<String> {
        vec![
            "-c".into(),
            self.server_ip.clone(),
            "-p".into(),
            self.server_port.to_string(),
            "-u".into(),
            "-b".into(),
            format!("{}M", allocation.bandwidth_mbps),
            "-t".into(),
            allocation.duration.as_secs().to_string(),
            "-B".into(),
            allocation.entity.as_str().to_string(),
            "--cport".into(),
            bind_port.to_string(),
            "-J".into(),
        ]
    }
}

impl TrafficDriver for IperfDriver {
    fn drive(&self, allocation: &PerEntityAllocation) -> Result<()> {
        // Stable per-entity client port so concurrent clients do not
        // collide.
        let offset = (allocation
            .entity
            .as_str()
            .bytes()
            .fold(0u16, |acc, b| acc.wrapping_add(b as u16)))
            % 100;
        let bind_port = self.bind_port_start + offset;

        let args = self.client_args(allocation, bind_port);
        debug!(entity = %allocation.entity, ?args, "starting iperf3 client");
        Command::new("iperf3")
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| {
                format!("failed to start iperf3 client for {}", allocation.entity)
            })?;
        Ok(())
    }
}

//! faultlab command line: telemetry collection, traffic generation, and
//! stress injection for containerized testbeds.

#![forbid(unsafe_code)]

mod config;
mod docker;
mod iperf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use config::StressFileConfig;
use docker::DockerApplicator;
use faultlab_common::{init_logging, parse_duration, parse_entity_list, EntityId, LogConfig};
use faultlab_stress::{
    EventBus, EventTracker, LogDriver, Scenario, SchedulerConfig, StressScheduler,
    TrafficEngine, TrafficLog, TrafficPattern,
};
use faultlab_telemetry::{
    AppPushAdapter, CadvisorAdapter, CsvSink, LatestSamples, NodeExporterAdapter, PolledSource,
    PushClient, Recorder, RecorderConfig, SourcePoller,
};
use iperf::IperfDriver;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "faultlab", about = "Telemetry collection and stress injection")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect synchronized telemetry from the configured sources
    Collect {
        /// Container runtime metrics endpoint (JSON)
        #[arg(long)]
        cadvisor_url: Option<String>,

        /// Host exporter endpoint (text exposition)
        #[arg(long)]
        node_exporter_url: Option<String>,

        /// Push-style application source address (host:port)
        #[arg(long)]
        push_addr: Option<String>,

        /// Comma-separated entities to record
        #[arg(long, default_value = "srscu0,srscu1,srsdu0,srsdu1,srsdu2")]
        entities: String,

        /// Poll interval per source in seconds
        #[arg(long, default_value_t = 5.0)]
        poll_interval: f64,

        /// Record tick interval in seconds
        #[arg(long, default_value_t = 1.0)]
        tick_interval: f64,

        /// Total run duration (e.g. "1h", "30m", "3600")
        #[arg(long, default_value = "1h")]
        duration: String,

        /// Directory for per-entity CSV files
        #[arg(long, default_value = "./metrics_data")]
        output_dir: PathBuf,
    },

    /// Generate bandwidth following a cyclic pattern
    Traffic {
        /// Pattern as a JSON array of Mbps values; omit for the default
        /// diurnal pattern
        #[arg(long)]
        pattern: Option<String>,

        /// Multiply every set-point by this factor
        #[arg(long, default_value_t = 1.0)]
        scale: f64,

        /// Total duration; the pattern is spread evenly across it
        #[arg(long, default_value = "24h")]
        duration: String,

        /// Comma-separated entity addresses receiving traffic
        #[arg(long)]
        entities: String,

        /// Split each set-point across entities instead of replicating it
        #[arg(long)]
        aggregate: bool,

        /// iperf3 server address; omit for a log-only dry run
        #[arg(long)]
        server_ip: Option<String>,

        /// iperf3 server port
        #[arg(long, default_value_t = 5001)]
        server_port: u16,

        /// Traffic log CSV file
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Apply stress scenarios to containers
    Stress {
        /// Scenario to run
        #[arg(long, value_enum, default_value_t = ScenarioArg::Random)]
        scenario: ScenarioArg,

        /// Total duration (e.g. "1h", "30m", "3600")
        #[arg(long, default_value = "1h")]
        duration: String,

        /// Comma-separated target containers
        #[arg(long, default_value = "srscu0,srscu1,srsdu0,srsdu1,srsdu2")]
        containers: String,

        /// Directory for the stress event CSV
        #[arg(long, default_value = "./stress_data")]
        output_dir: PathBuf,

        /// Pattern for the traffic-aware gate (JSON array of Mbps);
        /// omit for the default diurnal pattern
        #[arg(long)]
        pattern: Option<String>,

        /// Cycle the gate pattern repeats over
        #[arg(long, default_value = "24h")]
        pattern_cycle: String,

        /// Optional TOML file with probabilities, ranges, and intervals
        #[arg(long)]
        config: Option<PathBuf>,

        /// Log planned stresses without touching containers
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(ValueEnum, Clone, Copy)]
enum ScenarioArg {
    Random,
    Sequential,
    TrafficAware,
}

impl From<ScenarioArg> for Scenario {
    fn from(arg: ScenarioArg) -> Self {
        match arg {
            ScenarioArg::Random => Scenario::Random,
            ScenarioArg::Sequential => Scenario::Sequential,
            ScenarioArg::TrafficAware => Scenario::TrafficAware,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_env("info").with_stderr();
    if cli.verbose {
        log_config = log_config.with_level("debug");
    }
    let _logging_guards = init_logging(&log_config)?;

    match cli.command {
        Commands::Collect {
            cadvisor_url,
            node_exporter_url,
            push_addr,
            entities,
            poll_interval,
            tick_interval,
            duration,
            output_dir,
        } => {
            run_collect(
                cadvisor_url,
                node_exporter_url,
                push_addr,
                parse_entity_list(&entities),
                Duration::from_secs_f64(poll_interval),
                Duration::from_secs_f64(tick_interval),
                parse_duration(&duration).context("invalid --duration")?,
                output_dir,
            )
            .await
        }
        Commands::Traffic {
            pattern,
            scale,
            duration,
            entities,
            aggregate,
            server_ip,
            server_port,
            output,
        } => {
            run_traffic(
                pattern,
                scale,
                parse_duration(&duration).context("invalid --duration")?,
                parse_entity_list(&entities),
                aggregate,
                server_ip,
                server_port,
                output,
            )
            .await
        }
        Commands::Stress {
            scenario,
            duration,
            containers,
            output_dir,
            pattern,
            pattern_cycle,
            config,
            dry_run,
        } => {
            run_stress(
                scenario.into(),
                parse_duration(&duration).context("invalid --duration")?,
                parse_entity_list(&containers),
                output_dir,
                pattern,
                parse_duration(&pattern_cycle).context("invalid --pattern-cycle")?,
                config,
                dry_run,
            )
            .await
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_collect(
    cadvisor_url: Option<String>,
    node_exporter_url: Option<String>,
    push_addr: Option<String>,
    entities: Vec<EntityId>,
    poll_interval: Duration,
    tick_interval: Duration,
    total: Duration,
    output_dir: PathBuf,
) -> Result<()> {
    anyhow::ensure!(!entities.is_empty(), "no entities configured");
    anyhow::ensure!(
        cadvisor_url.is_some() || node_exporter_url.is_some() || push_addr.is_some(),
        "no telemetry sources configured"
    );

    let latest = LatestSamples::new();
    let mut tasks = Vec::new();

    if let Some(url) = cadvisor_url {
        let poller = SourcePoller::new(
            url,
            poll_interval,
            PolledSource::ContainerRuntime(CadvisorAdapter::new(entities.clone())),
            latest.clone(),
        );
        tasks.push(tokio::spawn(poller.run()));
    }
    if let Some(url) = node_exporter_url {
        let poller = SourcePoller::new(
            url,
            poll_interval,
            PolledSource::HostExporter(NodeExporterAdapter::new(EntityId::new("host"))),
            latest.clone(),
        );
        tasks.push(tokio::spawn(poller.run()));
    }
    if let Some(addr) = push_addr {
        let client = PushClient::new(
            addr,
            AppPushAdapter::new(EntityId::new("app")),
            latest.clone(),
        );
        tasks.push(tokio::spawn(client.run()));
    }

    let sink = CsvSink::new(&output_dir)
        .with_context(|| format!("failed to open output dir {}", output_dir.display()))?;
    let recorder = Recorder::new(
        RecorderConfig {
            tick_interval,
            entities,
        },
        latest,
        sink,
    );
    tasks.push(tokio::spawn(recorder.run()));

    tokio::select! {
        _ = tokio::time::sleep(total) => info!("run duration reached"),
        _ = tokio::signal::ctrl_c() => info!("interrupted"),
    }
    for task in tasks {
        task.abort();
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_traffic(
    pattern: Option<String>,
    scale: f64,
    total: Duration,
    entities: Vec<EntityId>,
    aggregate: bool,
    server_ip: Option<String>,
    server_port: u16,
    output: Option<PathBuf>,
) -> Result<()> {
    let pattern = match pattern {
        Some(raw) => TrafficPattern::from_json(&raw, total).context("invalid --pattern")?,
        None => TrafficPattern::diurnal(total).context("invalid --duration")?,
    }
    .scale(scale);

    let log = output.map(TrafficLog::create).transpose()?;

    let run = async {
        match server_ip {
            Some(server_ip) => {
                let driver = IperfDriver::new(server_ip, server_port, 5100);
                TrafficEngine::new(pattern, entities, aggregate, driver, log)?
                    .run(total)
                    .await;
            }
            None => {
                info!("no --server-ip, logging allocations only");
                TrafficEngine::new(pattern, entities, aggregate, LogDriver, log)?
                    .run(total)
                    .await;
            }
        }
        Ok::<(), anyhow::Error>(())
    };

    tokio::select! {
        result = run => result,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted");
            Ok(())
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_stress(
    scenario: Scenario,
    total: Duration,
    containers: Vec<EntityId>,
    output_dir: PathBuf,
    pattern: Option<String>,
    pattern_cycle: Duration,
    config_path: Option<PathBuf>,
    dry_run: bool,
) -> Result<()> {
    let mut config = SchedulerConfig {
        scenario,
        targets: containers,
        ..SchedulerConfig::default()
    };
    if let Some(path) = &config_path {
        StressFileConfig::load(path)?.apply_to(&mut config)?;
    }
    if scenario == Scenario::TrafficAware {
        config.pattern = Some(match pattern {
            Some(raw) => {
                TrafficPattern::from_json(&raw, pattern_cycle).context("invalid --pattern")?
            }
            None => TrafficPattern::diurnal(pattern_cycle).context("invalid --pattern-cycle")?,
        });
    }

    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("failed to create {}", output_dir.display()))?;
    let tracker = EventTracker::create(output_dir.join("stress_events.csv"))?;

    if dry_run {
        let scheduler = StressScheduler::new(
            config,
            Arc::new(faultlab_stress::NoopApplicator),
            Some(tracker),
            EventBus::default(),
        )?;
        return run_scheduler(scheduler, total).await;
    }

    let scheduler = StressScheduler::new(
        config,
        Arc::new(DockerApplicator::new()),
        Some(tracker),
        EventBus::default(),
    )?;
    run_scheduler(scheduler, total).await
}

async fn run_scheduler<A: faultlab_stress::StressApplicator + 'static>(
    scheduler: StressScheduler<A>,
    total: Duration,
) -> Result<()> {
    let applicator = scheduler.applicator();
    tokio::select! {
        result = scheduler.run(total) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, reverting active stresses");
            applicator.revert_all()
        }
    }
}

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use nexwatch_core::{
    ConfigFile, ControlLoop, DeviceClient, FixtureDriver, HelperDriver, MonitorConfig, Orchestrator, StopReason,
    MONITOR_NAMES,
};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::operator::TerminalOperator;

mod operator;

#[derive(Debug, Parser)]
#[command(name = "nexwatch")]
#[command(about = "Network device drift monitor: learns a baseline, then reports what degrades")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// TOML configuration file; flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    host: Option<String>,

    /// Parsing helper program used to talk to the device.
    #[arg(long)]
    helper: Option<PathBuf>,

    #[arg(long = "helper-arg")]
    helper_args: Vec<String>,

    /// Replay structured output from a directory instead of a live device.
    #[arg(long)]
    fixture_dir: Option<PathBuf>,

    #[arg(long)]
    mac_threshold: Option<f64>,

    #[arg(long)]
    arp_threshold: Option<f64>,

    #[arg(long)]
    routes_threshold: Option<f64>,

    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Previously saved baseline to compare against.
    #[arg(long)]
    baseline_dir: Option<PathBuf>,

    #[arg(long)]
    reconnect_delay_secs: Option<u64>,

    #[arg(long)]
    query_timeout_secs: Option<u64>,

    #[arg(long)]
    parallelism: Option<usize>,

    /// Restrict monitoring to these monitors (repeatable).
    #[arg(long = "monitor")]
    monitors: Vec<String>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Monitor until stopped.
    Run {
        #[arg(long)]
        detailed: bool,
        #[arg(long)]
        cycles: Option<u64>,
    },
    /// Learn the baseline, report one cycle and exit.
    Once {
        #[arg(long)]
        detailed: bool,
    },
    /// Learn and save the baseline only.
    Baseline,
    /// List the available monitors.
    Monitors,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();
    let file = match &cli.config {
        Some(path) => ConfigFile::load(path)?,
        None => ConfigFile::default(),
    };
    let mut config = merge(&cli, &file);

    match cli.command {
        Command::Monitors => {
            for name in MONITOR_NAMES {
                let status = if config.is_enabled(name) { "enabled" } else { "disabled" };
                println!("{name:<12} {status}");
            }
            println!("{:<12} detailed mode only", "all_detail");
            return Ok(());
        }
        Command::Run { detailed, cycles } => {
            config.detailed |= detailed;
            config.max_cycles = cycles;
        }
        Command::Once { detailed } => {
            config.detailed |= detailed;
            config.max_cycles = Some(1);
        }
        Command::Baseline => config.max_cycles = Some(0),
    }
    config.validate()?;

    let fixture_dir = cli.fixture_dir.clone().or_else(|| file.device.fixture_dir.clone());
    if let Some(dir) = fixture_dir {
        info!(dir = %dir.display(), "replaying fixtures");
        return monitor(FixtureDriver::new(dir), config).await;
    }

    let helper = cli.helper.clone().or_else(|| file.device.helper.clone());
    let host = cli.host.clone().or_else(|| file.device.host.clone());
    let (Some(helper), Some(host)) = (helper, host) else {
        bail!("a device is required: pass --fixture-dir, or --helper together with --host");
    };
    let helper_args = if cli.helper_args.is_empty() {
        file.device.helper_args.clone()
    } else {
        cli.helper_args.clone()
    };
    let driver = HelperDriver::new(helper, helper_args, host, config.query_timeout);
    monitor(driver, config).await
}

fn merge(cli: &Cli, file: &ConfigFile) -> MonitorConfig {
    let mut config = file.monitor_config();
    if let Some(value) = cli.mac_threshold {
        config.thresholds.mac_percent = value;
    }
    if let Some(value) = cli.arp_threshold {
        config.thresholds.arp_percent = value;
    }
    if let Some(value) = cli.routes_threshold {
        config.thresholds.routes_percent = value;
    }
    if let Some(dir) = &cli.output_dir {
        config.output_dir = dir.clone();
    }
    if let Some(dir) = &cli.baseline_dir {
        config.baseline_dir = Some(dir.clone());
    }
    if let Some(secs) = cli.reconnect_delay_secs {
        config.reconnect_delay = Duration::from_secs(secs);
    }
    if let Some(secs) = cli.query_timeout_secs {
        config.query_timeout = Duration::from_secs(secs);
    }
    if let Some(parallelism) = cli.parallelism {
        config.parallelism = parallelism;
    }
    if !cli.monitors.is_empty() {
        config.monitors = cli.monitors.clone();
    }
    config
}

async fn monitor<D: DeviceClient>(device: D, config: MonitorConfig) -> Result<()> {
    let (tx, rx) = mpsc::channel(8);
    let forwarder = tokio::spawn(forward_interrupts(tx));

    let orchestrator = Orchestrator::from_config(&config);
    let mut control = ControlLoop::new(device, TerminalOperator, orchestrator, config, rx);
    let result = control.run().await;
    forwarder.abort();

    let summary = result?;
    match summary.stop {
        StopReason::Interrupted => warn!("stopped before a baseline was learned"),
        stop => info!(cycles = summary.cycles, ?stop, "finished"),
    }
    Ok(())
}

async fn forward_interrupts(tx: mpsc::Sender<()>) {
    loop {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "cannot listen for ctrl-c");
            return;
        }
        if tx.send(()).await.is_err() {
            return;
        }
    }
}

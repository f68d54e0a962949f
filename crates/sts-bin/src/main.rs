//! CLI entry point for the IL swept test.
//!
//! # Usage
//!
//! Run a session against the configured instruments:
//! ```bash
//! il-sts run --config config/il_sts.toml
//! ```
//!
//! Run a session against the simulated bench:
//! ```bash
//! il-sts run --simulate
//! ```
//!
//! Check a configuration file:
//! ```bash
//! il-sts check-config --config config/il_sts.toml
//! il-sts check-config --dump
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use il_sts::telemetry::{self, OutputFormat, TracingConfig};
use il_sts::{Session, SessionReport, StdinConsole};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use sts_core::config::DEFAULT_CONFIG_PATH;
use sts_core::device::supported_interfaces;
use sts_core::{DeviceKind, StsConfig};
use sts_driver_mock::MockBench;
use sts_hardware::{Bench, TransportContext};

/// Insertion loss of the simulated device under test, dB.
const SIMULATED_DUT_LOSS_DB: f64 = 3.0;

#[derive(Parser)]
#[command(name = "il-sts")]
#[command(about = "Insertion-loss swept test with a tunable laser, power meter and monitor DAQ", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an interactive test session
    Run {
        /// Configuration file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Use simulated instruments instead of the configured ones
        #[arg(long)]
        simulate: bool,

        /// Log output format
        #[arg(long, value_enum, default_value = "pretty")]
        log_format: OutputFormat,
    },

    /// Load and validate a configuration file
    CheckConfig {
        /// Configuration file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Print the effective configuration, environment overrides applied
        #[arg(long)]
        dump: bool,
    },
}

fn load_config(path: Option<&Path>) -> Result<StsConfig> {
    let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));
    let config = StsConfig::load_from(path)
        .with_context(|| format!("loading configuration from {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            simulate,
            log_format,
        } => {
            let config = load_config(config.as_deref())?;
            telemetry::init(&TracingConfig::from_config(&config)?.with_format(log_format));
            let report = run_session(config, simulate).await?;
            print_report(&report);
            Ok(())
        }
        Commands::CheckConfig { config, dump } => check_config(config.as_deref(), dump),
    }
}

async fn run_session(config: StsConfig, simulate: bool) -> Result<SessionReport> {
    let console = Arc::new(StdinConsole::new());
    if simulate {
        tracing::info!(dut_loss_db = SIMULATED_DUT_LOSS_DB, "Running on the simulated bench");
        let mock = MockBench::new();
        let dut = mock.clone();
        let session = Session::new(config, console)
            .on_dut_connected(move || dut.set_dut_loss_db(SIMULATED_DUT_LOSS_DB));
        return Ok(session.run(mock.bench()).await?);
    }

    let context = TransportContext::open(config.instruments.clone(), &config.timeouts);
    let timeouts = config.timeouts;
    let session = Session::new(config, console);
    let result = async {
        let bench = Bench::from_context(&context, &timeouts).await?;
        session.run(bench).await
    }
    .await;
    context.close().await;
    Ok(result?)
}

fn print_report(report: &SessionReport) {
    println!();
    println!("Measurements: {}", report.measurements);
    for trace in &report.insertion_loss {
        let worst = trace.loss.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        println!("  {}: max IL {worst:.3} dB", trace.channel);
    }
    for file in &report.files {
        println!("  wrote {}", file.display());
    }
}

fn check_config(path: Option<&Path>, dump: bool) -> Result<()> {
    let config = load_config(path)?;
    if dump {
        print!("{}", toml::to_string_pretty(&config).context("serializing configuration")?);
        return Ok(());
    }
    println!("Configuration OK: {}", config.application.name);
    println!(
        "Sweep: {} - {} nm, step {} nm, {} nm/s, {} dBm",
        config.sweep.start_nm,
        config.sweep.stop_nm,
        config.sweep.step_nm,
        config.sweep.speed_nm_per_s,
        config.sweep.power_dbm
    );
    println!();
    println!("{:<6} {:<32} supported", "device", "endpoint");
    for kind in DeviceKind::ALL {
        let supported: Vec<String> = supported_interfaces(kind)
            .iter()
            .map(ToString::to_string)
            .collect();
        println!(
            "{:<6} {:<32} {}",
            kind.to_string(),
            config.instruments.endpoint(kind).to_string(),
            supported.join(", ")
        );
    }
    Ok(())
}

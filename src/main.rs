//! CLI entry point for gfet_daq
//!
//! # Usage
//!
//! List the Keithley 236 units on the bus:
//! ```bash
//! gfet_daq scan
//! ```
//!
//! Record Ids-Vds curves at every gate step, or Rds against Vg:
//! ```bash
//! gfet_daq run ids-vds --config config/gfet.toml
//! gfet_daq run rds --simulate
//! ```
//!
//! Show the configuration after environment overrides:
//! ```bash
//! GFET_BUS__BACKEND=visa gfet_daq config
//! ```
//!
//! Ctrl-C stops a run after the current instrument operation; both units
//! are left in standby.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use gfet_daq::config::{BenchConfig, TransportBackend, DEFAULT_CONFIG_PATH};
use gfet_daq::experiment::{MeasurementEngine, MeasurementKind, RunSettings};
use gfet_daq::hardware::discovery::{assign_roles, discover_k236, resolve_roles};
use gfet_daq::hardware::gpib::SharedTransport;
use gfet_daq::hardware::keithley236::Keithley236;
use gfet_daq::hardware::{driver_timing, open_transport};
use gfet_daq::measurement::PlotModel;
use gfet_daq::tracing_setup;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "gfet_daq")]
#[command(about = "Keithley 236 bench for graphene FET characterization", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Use the simulated bench instead of the configured transport
    #[arg(long, global = true)]
    simulate: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List Keithley 236 units on the bus and the roles they would get
    Scan,

    /// Print the effective configuration as TOML
    Config,

    /// Run a measurement
    Run {
        /// Measurement protocol
        #[arg(value_enum)]
        protocol: Protocol,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Protocol {
    /// Ids-Vds sweep at every gate step
    IdsVds,
    /// Drain-source resistance against gate voltage
    Rds,
}

impl From<Protocol> for MeasurementKind {
    fn from(protocol: Protocol) -> Self {
        match protocol {
            Protocol::IdsVds => MeasurementKind::IdsVdsVsGate,
            Protocol::Rds => MeasurementKind::RdsVsGate,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = BenchConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if cli.simulate {
        config.bus.backend = TransportBackend::Simulated;
    }
    config.validate().map_err(anyhow::Error::msg)?;
    tracing_setup::init_from_config(&config).map_err(anyhow::Error::msg)?;
    info!(name = %config.application.name, backend = ?config.bus.backend, "configuration loaded");

    match cli.command {
        Commands::Config => {
            print!("{}", config.to_toml().context("rendering configuration")?);
            Ok(())
        }
        Commands::Scan => scan(&open_transport(&config.bus)?, &config).await,
        Commands::Run { protocol } => run(open_transport(&config.bus)?, &config, protocol.into()).await,
    }
}

async fn scan(bus: &SharedTransport, config: &BenchConfig) -> Result<()> {
    let found = discover_k236(bus.as_ref(), config.bus.board).await?;
    for unit in &found {
        println!("{}  {}", unit.address, unit.identity.trim());
    }
    let roles = assign_roles(&found, config.bus.board, config.bus.preferred_dut)?;
    println!("DUT evaluator:  {}", roles.dut);
    match roles.gate {
        Some(gate) => println!("Gate generator: {}", gate),
        None => println!("Gate generator: none (Rds runs unavailable)"),
    }
    Ok(())
}

async fn run(bus: SharedTransport, config: &BenchConfig, kind: MeasurementKind) -> Result<()> {
    std::fs::create_dir_all(&config.output.base_dir).with_context(|| {
        format!("creating output directory {}", config.output.base_dir.display())
    })?;

    let roles = resolve_roles(bus.as_ref(), &config.bus).await?;
    let timing = driver_timing(&config.bus);
    let dut = Keithley236::with_timing(bus.clone(), roles.dut, timing);
    let gate = roles
        .gate
        .map(|address| Keithley236::with_timing(bus.clone(), address, timing));
    let engine = MeasurementEngine::new(
        dut,
        gate,
        PlotModel::new(config.plot.max_points),
        RunSettings::from_config(config),
    );

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping measurement");
            on_interrupt.cancel();
        }
    });

    let status = engine.run(kind, cancel).await?;
    println!(
        "{}: {} after {} step(s), {} sample(s) written to {}",
        kind,
        status.state,
        status.step,
        status.sample_count,
        config.output.base_dir.display()
    );
    Ok(())
}

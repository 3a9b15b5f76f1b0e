// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/washwatch

//! washwatch - Shared Laundry Machine Monitor
//!
//! Watches washing machines through smart-plug power readings and door
//! sensors on a local MQTT broker, infers the usage lifecycle per
//! machine, and republishes averaged status records to a TLS cloud
//! broker.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use washwatch::{BrokerBridge, Config, CycleStore, MachineRegistry, NAME, VERSION};

/// washwatch - Shared Laundry Machine Monitor
#[derive(Parser, Debug)]
#[command(name = "washwatch")]
#[command(author = "bad-antics")]
#[command(version = VERSION)]
#[command(about = "Monitors shared washing machines over MQTT and bridges status to the cloud")]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Enable trace-level logging
    #[arg(long)]
    trace: bool,

    /// Data directory override (cycle-count file location)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Run the machine simulator instead of the monitor
    #[arg(long)]
    simulate: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.trace {
        Level::TRACE
    } else if args.debug {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(args.debug)
        .with_line_number(args.debug)
        .with_ansi(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("{} v{} - Shared Laundry Machine Monitor", NAME, VERSION);

    // Load or create configuration
    let config_path = args.config.unwrap_or_else(Config::default_path);
    let mut config = Config::load_or_create(&config_path)?;

    // Override with command line args
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }

    info!("Configuration loaded from {:?}", config_path);
    info!("Monitoring {} machine(s):", config.machines.len());
    for machine in &config.machines {
        info!("  - {} (ID: {})", machine.name, machine.id);
    }

    let rt = tokio::runtime::Runtime::new()?;
    if args.simulate {
        rt.block_on(run_simulator(config))
    } else {
        rt.block_on(run_monitor(config))
    }
}

/// Run the monitor daemon until interrupted
async fn run_monitor(config: Config) -> Result<()> {
    let store = CycleStore::new(config.cycle_file());
    let registry = Arc::new(MachineRegistry::new(&config, store));
    let bridge = BrokerBridge::new(&config, registry);

    let shutdown = spawn_shutdown_listener();

    info!("Monitoring started (press Ctrl+C to exit)");
    bridge.run(&shutdown).await?;

    info!("Shutdown complete");
    Ok(())
}

/// Run the machine simulator until interrupted
async fn run_simulator(config: Config) -> Result<()> {
    let shutdown = spawn_shutdown_listener();

    info!("Simulation started (press Ctrl+C to exit)");
    washwatch::sim::run(&config, &shutdown).await?;

    info!("Simulator stopped");
    Ok(())
}

/// Broadcast a shutdown signal when Ctrl+C arrives
fn spawn_shutdown_listener() -> broadcast::Sender<()> {
    let (shutdown_tx, _) = broadcast::channel(1);
    let tx = shutdown_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received, cleaning up...");
            let _ = tx.send(());
        }
    });
    shutdown_tx
}

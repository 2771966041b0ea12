//! bthle CLI
//!
//! Drives the whole stack (simulated backend, bus, IOCTLs and the WinRT
//! facade) from the command line.

use anyhow::{Context, Result};
use bthle::Runtime;
use bthle_bus::BusConfig;
use bthle_unix::SimHost;
use clap::Parser;
use tracing::info;

// CLI definitions
mod cli;
use cli::{Cli, Commands};

// Command handlers
mod commands;
use commands::Session;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    // Load config
    let config_path = cli.config.clone().unwrap_or_else(BusConfig::default_path);
    info!("Loading config from {:?}", config_path);
    let config = BusConfig::load(&config_path)?;

    let host = match &cli.sim {
        Some(path) => SimHost::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => SimHost::demo(),
    };
    let rt = Runtime::from_host(&host, config)?;
    let session = Session {
        rt,
        format: cli.format,
    };

    let result = run(&session, cli.command, &config_path);
    session.rt.shutdown();
    result
}

fn run(session: &Session, command: Commands, config_path: &std::path::Path) -> Result<()> {
    match command {
        Commands::Radios => commands::query::radios(session),
        Commands::Devices => commands::query::devices(session),
        Commands::Services { address } => commands::query::services(session, address),
        Commands::Characteristics { address, service } => {
            commands::query::characteristics(session, address, service)
        }
        Commands::Read {
            address,
            service,
            characteristic,
        } => commands::gatt::read(session, address, service, characteristic),
        Commands::Write {
            address,
            service,
            characteristic,
            value,
            no_response,
        } => commands::gatt::write(session, address, service, characteristic, &value, no_response),
        Commands::Watch {
            seconds,
            name,
            min_rssi,
        } => commands::watch::watch(session, seconds, name.as_deref(), min_rssi),
        Commands::Notify {
            address,
            service,
            characteristic,
            count,
        } => commands::gatt::notify(session, address, service, characteristic, count),
        Commands::Config { save } => commands::query::config(session, config_path, save),
    }
}

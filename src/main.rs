//! Cluster monitor - periodic per-cluster mining statistics
//!
//! This is the main entry point for the `cmon` binary.

use anyhow::Result;
use clap::Parser;
use cm_cli::Cli;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Config errors are fatal before anything is logged
    let config = cli.resolve_config()?;
    let config_file = cli.config_file();

    // RUST_LOG wins, then --verbose, then the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_filter(&config)));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match &config_file {
        Some(path) => tracing::info!(path = %path.display(), "Loaded config file"),
        None => tracing::info!("No config file found, using defaults"),
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        interval_mins = config.global.interval_mins,
        "Starting cluster monitor"
    );

    cli.run(config).await?;

    Ok(())
}

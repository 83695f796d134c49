//! `cm_cli` - Command-line surface for the cluster monitor
//!
//! This crate provides:
//! - clap-based flag definitions
//! - Config resolution from file, environment and flags
//! - Startup wiring: store connections, aggregator, scheduler

use clap::Parser;
use cm_collect::{MetricsAggregator, Scheduler, SchedulerConfig};
use cm_config::{MonitorConfig, Overrides};
use cm_source::{PgSource, SourceAccessor};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// CLI errors
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Config error: {0}")]
    ConfigError(#[from] cm_config::ConfigError),

    #[error("Source error: {0}")]
    SourceError(#[from] cm_source::SourceError),

    #[error("Store error: {0}")]
    StoreError(#[from] cm_store::StoreError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Main CLI application
#[derive(Parser, Debug)]
#[command(name = "cmon")]
#[command(
    author,
    version,
    about = "Cluster monitor - periodic per-cluster mining statistics"
)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Source (mining) database URL, postgres://...
    #[arg(long, visible_alias = "oula", value_name = "DSN")]
    pub source: Option<String>,

    /// Ops database URL: mysql://..., duckdb://<path> or a file path
    #[arg(long, value_name = "DSN")]
    pub ops: Option<String>,

    /// Minutes between cycles [default: 2]
    #[arg(short, long, value_name = "MINUTES")]
    pub interval: Option<u64>,
}

impl Cli {
    /// Flag values that override the loaded configuration
    #[must_use]
    pub fn overrides(&self) -> Overrides {
        Overrides {
            source_dsn: self.source.clone(),
            ops_dsn: self.ops.clone(),
            interval_mins: self.interval,
        }
    }

    /// Resolve and validate configuration: file, then environment, then flags.
    ///
    /// # Errors
    ///
    /// Returns [`CliError::ConfigError`] if the file cannot be loaded or the
    /// result fails validation.
    pub fn resolve_config(&self) -> Result<MonitorConfig, CliError> {
        Ok(MonitorConfig::resolve(
            self.config.as_deref(),
            &self.overrides(),
        )?)
    }

    /// Config file that [`Self::resolve_config`] reads, if any
    #[must_use]
    pub fn config_file(&self) -> Option<PathBuf> {
        self.config.clone().or_else(MonitorConfig::discover_path)
    }

    /// Default tracing filter when `RUST_LOG` is unset
    #[must_use]
    pub fn log_filter(&self, config: &MonitorConfig) -> String {
        if self.verbose {
            "debug".to_string()
        } else {
            config.global.log_level.clone()
        }
    }

    /// Connect both stores and poll until Ctrl-C.
    ///
    /// # Errors
    ///
    /// Returns [`CliError`] if either store cannot be opened or the signal
    /// handler cannot be installed. Failures after startup are logged, never
    /// returned.
    pub async fn run(&self, config: MonitorConfig) -> Result<(), CliError> {
        let reference_offset = config.reference_offset()?;

        let source = PgSource::connect(config.source_dsn()).await?;
        let registry = cm_store::connect(config.ops_dsn()).await?;
        info!(
            source = source.name(),
            registry = registry.name(),
            "Stores connected"
        );

        let aggregator = MetricsAggregator::new(Arc::new(source), reference_offset);
        let scheduler = Scheduler::new(
            SchedulerConfig::new(config.interval()),
            registry,
            aggregator,
        );

        tokio::select! {
            () = scheduler.run() => {}
            signal = tokio::signal::ctrl_c() => {
                signal?;
                info!("Shutdown signal received, stopping");
            }
        }

        Ok(())
    }
}

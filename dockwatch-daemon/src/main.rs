//! dockwatch-daemon entry point.
//!
//! Parses CLI arguments, loads and validates configuration, initializes
//! logging, and hands control to the [`orchestrator::Orchestrator`].

use anyhow::Result;
use clap::Parser;

use dockwatch_core::config::DockwatchConfig;
use dockwatch_daemon::cli::DaemonCli;
use dockwatch_daemon::{logging, orchestrator};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = DaemonCli::parse();

    let mut config = DockwatchConfig::load(&cli.config)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load {}: {}", cli.config.display(), e))?;

    // CLI overrides beat both the config file and environment variables
    if let Some(level) = &cli.log_level {
        config.general.log_level = level.clone();
    }
    if let Some(format) = &cli.log_format {
        config.general.log_format = format.clone();
    }
    if let Some(pid_file) = &cli.pid_file {
        config.general.pid_file = pid_file.clone();
    }
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

    if cli.validate {
        println!("configuration OK: {}", cli.config.display());
        return Ok(());
    }

    logging::init_tracing(&config.general)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        hosts = config.hosts.len(),
        "dockwatch-daemon starting"
    );

    let mut orchestrator = orchestrator::Orchestrator::build_from_config(config)?;
    orchestrator.run().await?;

    tracing::info!("dockwatch-daemon shut down");
    Ok(())
}

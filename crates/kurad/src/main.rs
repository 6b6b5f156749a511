//! kurad - Kura gateway daemon
//!
//! Connects to the cloud, binds the configured publishers and subscribers,
//! and runs the CAN/serial bridges, heater simulator and asset handler.
//!
//! Usage:
//!   kurad [--config <config.toml>] [--verbose]
//!
//! Without a config file a loopback demo setup runs. SIGHUP re-reads the
//! config file and reconfigures the running components.

mod config;
mod daemon;

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::DaemonConfig;
use crate::daemon::Daemon;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "kurad")]
#[command(about = "Kura gateway daemon")]
struct Args {
    /// Configuration file path (TOML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose {
        "kurad=debug,kura_cloud=debug,kura_gateway=debug,kura_core=debug"
    } else {
        "kurad=info,kura_cloud=info,kura_gateway=info,kura_core=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting kurad (Kura gateway daemon)");

    let config = match &args.config {
        Some(path) => {
            info!(path = %path.display(), "Loading config");
            DaemonConfig::load(path)?
        }
        None => {
            info!("No config file provided, running loopback demo");
            DaemonConfig::demo()
        }
    };

    let daemon = Daemon::build(&config)?;
    daemon.start().await?;
    for (key, value) in daemon.connection().connection_info() {
        info!(%key, %value, "Connection info");
    }

    let result = run_until_shutdown(&daemon, args.config.as_deref()).await;

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, daemon.shutdown())
        .await
        .is_err()
    {
        warn!("Shutdown did not finish within {:?}", SHUTDOWN_TIMEOUT);
    }
    result
}

#[cfg(unix)]
async fn run_until_shutdown(daemon: &Daemon, config_path: Option<&Path>) -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup())?;
    let mut terminate = signal(SignalKind::terminate())?;
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("Interrupt received, shutting down");
                return Ok(());
            }
            _ = terminate.recv() => {
                info!("SIGTERM received, shutting down");
                return Ok(());
            }
            _ = hangup.recv() => reload(daemon, config_path).await,
        }
    }
}

#[cfg(not(unix))]
async fn run_until_shutdown(_daemon: &Daemon, _config_path: Option<&Path>) -> anyhow::Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("Interrupt received, shutting down");
    Ok(())
}

#[cfg_attr(not(unix), allow(dead_code))]
async fn reload(daemon: &Daemon, config_path: Option<&Path>) {
    let Some(path) = config_path else {
        info!("Reload requested but no config file in use");
        return;
    };
    info!(path = %path.display(), "Reloading config");
    match DaemonConfig::load(path) {
        Ok(config) => daemon.reconfigure(&config).await,
        Err(e) => error!(error = %format!("{:#}", e), "Reload failed, keeping current configuration"),
    }
}

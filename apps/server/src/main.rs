//! Transflow Server - standalone realtime call transcription daemon.
//!
//! Bootstraps the Transflow engine (control-plane watcher, orchestrator,
//! recognizer sessions, publisher) and runs it until an external shutdown
//! signal is received.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use transflow_core::bootstrap::bootstrap_services;
use transflow_core::recognizer::SilentRecognizerFactory;

use crate::config::ServerConfig;

/// Transflow Server - headless realtime call transcription daemon.
#[derive(Parser, Debug)]
#[command(name = "transflow-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "TRANSFLOW_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Monitored directory override.
    #[arg(short = 'm', long, env = "TRANSFLOW_MONITOR_DIR")]
    monitor_dir: Option<PathBuf>,

    /// Control-plane database URL override.
    #[arg(long, env = "TRANSFLOW_DATABASE_URL")]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Transflow Server v{}", env!("CARGO_PKG_VERSION"));

    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    if let Some(monitor_dir) = args.monitor_dir {
        config.monitor_dir = monitor_dir;
    }
    if let Some(database_url) = args.database_url {
        config.database_url = database_url;
    }

    log::info!(
        "Configuration: monitor_dir={}, max_streams={}, channel_name={}",
        config.monitor_dir.display(),
        config.max_streams,
        config.channel_name,
    );

    let core_config = config.to_core_config();
    let recognizer_factory = Arc::new(SilentRecognizerFactory);

    let services = bootstrap_services(core_config, recognizer_factory, &config.database_url)
        .await
        .context("Failed to bootstrap services")?;

    log::info!("Services bootstrapped successfully");

    services.spawn_control_plane_watcher();

    log::info!("Background workers started");

    tokio::select! {
        () = services.run_orchestrator_loop() => {
            log::warn!("orchestrator loop exited unexpectedly");
        }
        () = shutdown_signal() => {
            log::info!("Shutdown signal received, cleaning up...");
        }
    }

    services.shutdown().await;

    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

//! UPnP Bridge - headless daemon exposing SSDP discovery over WebSocket.
//!
//! Discovers UPnP devices on the local network and pushes the live device
//! table to browser clients connected on `/ws`.

mod config;

use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use upnp_bridge_core::{api, bootstrap_services};

use crate::config::ServerConfig;

/// UPnP Bridge - SSDP discovery to WebSocket bridge.
#[derive(Parser, Debug)]
#[command(name = "upnp-bridge")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "UPNP_BRIDGE_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind port (overrides config file).
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// Bind address (overrides config file).
    #[arg(short = 'b', long)]
    bind_address: Option<IpAddr>,

    /// SSDP search target (overrides config file).
    #[arg(short = 't', long)]
    search_target: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("UPnP Bridge v{}", env!("CARGO_PKG_VERSION"));

    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Apply CLI overrides
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(addr) = args.bind_address {
        config.bind_address = addr;
    }
    if let Some(target) = args.search_target {
        config.search_target = target;
    }

    log::info!(
        "Configuration: bind={}:{}, search_target={}, interval={}s",
        config.bind_address,
        config.port,
        config.search_target,
        config.search_interval_secs
    );

    let services =
        bootstrap_services(config.to_core_config()).context("Invalid configuration")?;

    // Bind before discovery so a taken port fails fast without touching the network.
    let listener = api::bind(config.bind_address, config.port)
        .await
        .context("Failed to start HTTP server")?;

    services
        .start_background_tasks()
        .context("Failed to start discovery")?;

    log::info!("Background tasks started");

    services.spawn_server(listener);

    shutdown_signal().await;

    log::info!("Shutdown signal received, cleaning up...");

    services.shutdown().await;

    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

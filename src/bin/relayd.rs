//! Relay Daemon - Text-line broadcast relay
//!
//! This binary accepts TCP clients, binds each to the display name sent in
//! its first line, and relays every following line to all connected clients.
//!
//! # Usage
//!
//! ```bash
//! # Start on the default address (127.0.0.1:5000)
//! relayd
//!
//! # Listen on all interfaces
//! relayd --host 0.0.0.0 --port 5000
//!
//! # Configure through the environment
//! RELAY_HOST=0.0.0.0 RELAY_PORT=6000 relayd
//!
//! # Enable debug logging
//! RUST_LOG=relayd=debug relayd
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: Graceful shutdown

use std::process;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use relayd::config::RelayConfig;
use relayd::server::RelayServer;

/// Relay daemon - broadcast text lines between connected clients
#[derive(Parser, Debug)]
#[command(name = "relayd", version, about)]
struct Args {
    /// Host or IP address to bind (overrides RELAY_HOST)
    #[arg(long)]
    host: Option<String>,

    /// TCP port to bind (overrides RELAY_PORT)
    #[arg(short, long)]
    port: Option<u16>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    run_relay(args)
}

/// Runs the relay (async entry point).
#[tokio::main]
async fn run_relay(args: Args) -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("relayd=info".parse()?)
                .add_directive("relay_protocol=info".parse()?),
        )
        .init();

    let config = RelayConfig::from_env()
        .context("Invalid relay configuration")?
        .with_overrides(args.host, args.port);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        addr = %config.bind_addr(),
        "Relay server starting"
    );

    // Create cancellation token for graceful shutdown
    let cancel_token = CancellationToken::new();

    // Setup signal handlers
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let addr = config.bind_addr();
    let server = match RelayServer::bind(config, cancel_token).await {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "Cannot start relay server");
            return Err(e).with_context(|| format!("Failed to listen on {addr}"));
        }
    };

    let bound = server
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or(addr);
    info!(addr = %bound, "Server is ready, waiting for clients");

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Relay server stopped");
    Ok(())
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}

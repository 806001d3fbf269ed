//! Signal relay server -- rendezvous point for WebRTC signaling.
//!
//! An axum WebSocket server where one streamer and any number of viewers
//! join a named room and exchange signaling messages (offers, answers, ICE
//! candidates). The relay never interprets those messages beyond checking
//! that they are JSON objects.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:8080
//! cargo run --bin signal-relay
//!
//! # Run on custom address
//! cargo run --bin signal-relay -- --bind 127.0.0.1:9000
//!
//! # Or via environment variable, as most hosting platforms do
//! PORT=10000 cargo run --bin signal-relay
//! ```

use std::sync::Arc;

use clap::Parser;
use signal_relay::config::{RelayCliArgs, RelayConfig};
use signal_relay::relay::{self, RelayState};

#[tokio::main]
async fn main() {
    let cli = RelayCliArgs::parse();

    // Load config from CLI args + config file + env vars + defaults.
    let config = match RelayConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    // Initialize tracing with the resolved log level.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(addr = %config.bind_addr, "starting signal relay server");

    let state = Arc::new(RelayState::from_config(&config));

    match relay::start_server_with_shutdown(&config.bind_addr, state, shutdown_signal()).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "relay server listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "relay server task failed");
            }
            tracing::info!("relay server stopped");
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start relay server");
            std::process::exit(1);
        }
    }
}

/// Resolves when the process receives Ctrl-C.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

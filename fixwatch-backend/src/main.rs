//! fixwatch reference backend.
//!
//! Accepts error reports and serves the fix-notification and log-stream
//! WebSocket feeds for local development.
//!
//! ```bash
//! cargo run --bin fixwatch-backend -- --bind 127.0.0.1:8000
//! ```

use std::sync::Arc;

use clap::Parser;
use fixwatch_backend::config::{BackendCliArgs, BackendConfig};
use fixwatch_backend::server::{self, BackendState};

#[tokio::main]
async fn main() {
    let cli = BackendCliArgs::parse();

    let config = match BackendConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(addr = %config.bind_addr, "starting fixwatch backend");

    let state = Arc::new(BackendState::new());
    match server::start_server_with_state(&config.bind_addr, state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "backend listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "backend server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start backend");
            std::process::exit(1);
        }
    }
}

//! Inkwell sync server: collaborative documents over WebSocket.
//!
//! Configured through `INKWELL_*` environment variables (see [`config`]),
//! logging through `RUST_LOG`. Documents live in RocksDB when
//! `INKWELL_DATA_DIR` is set and in memory otherwise.

mod config;

use std::process::ExitCode;
use std::sync::Arc;

use inkwell_collab::server::SyncServer;
use log::{error, info, warn};

use config::Settings;

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            error!("Invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    if settings.tokens.is_empty() {
        warn!("No tokens configured; only anonymous connections can be accepted");
    }
    if settings.server.storage_path.is_none() {
        warn!("No data directory configured; documents are kept in memory only");
    }

    info!("Starting Inkwell sync server on {}...", settings.server.bind_addr);
    let server = match SyncServer::with_storage(settings.server, Arc::new(settings.tokens)) {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to open storage: {e}");
            return ExitCode::FAILURE;
        }
    };

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {e}");
            std::future::pending::<()>().await;
        }
        info!("Shutdown requested");
    };
    if let Err(e) = server.run_until(shutdown).await {
        error!("Server error: {e}");
        return ExitCode::FAILURE;
    }
    info!("Stopped");
    ExitCode::SUCCESS
}

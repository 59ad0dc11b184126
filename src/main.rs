//! reMarkable MCP Server
//!
//! Serves the documents of a reMarkable tablet to MCP clients over stdio.

use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use remarkable_mcp_server::config::Config;
use remarkable_mcp_server::mcp::McpServer;
use remarkable_mcp_server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries the protocol, so logs go to stderr
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "remarkable_mcp_server=info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Load configuration
    dotenvy::dotenv().ok();

    // Invalid values fail startup
    let config = Config::from_env().map_err(|e| {
        tracing::error!("Invalid configuration: {}", e);
        e
    })?;

    tracing::info!("Starting reMarkable MCP Server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        transport = ?config.store.transport,
        load_mode = ?config.load_mode(),
        ocr_backend = ?config.ocr.backend,
        "Configuration loaded"
    );

    let state = AppState::new(config)?;
    state.populate_registry().await;
    tracing::info!("{} documents registered at startup", state.registry().len());

    let server = McpServer::new(state.clone());
    let result = tokio::select! {
        result = server.run() => result,
        _ = shutdown_signal() => Ok(()),
    };

    state.shutdown().await;
    tracing::info!("Server shutdown complete");
    result
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
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
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}

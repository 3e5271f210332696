//! # FarView Relay Server
//!
//! Boots the relay: config from the environment, users from disk, then one
//! listener multiplexing the HTTP control plane and the socket channel.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use fv_common::AppConfig;
use fv_server::{app, workers, AppState};

/// Grace window between the shutdown notice and a forced exit.
const SHUTDOWN_DRAIN_SECS: u64 = 5;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Starting FarView relay...");

    let config = AppConfig::load()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {e}"))?;

    let state = AppState::init(config.clone()).await?;
    tracing::info!(users_file = %config.users_file, "User store ready");

    // Start background workers
    let _worker_handles = workers::start_all_workers(state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app(state.clone()).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(state))
    .await?;

    Ok(())
}

async fn shutdown_signal(state: Arc<AppState>) {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C handler");
    tracing::info!("Shutdown signal received, draining connections");

    state.registry.broadcast_shutdown("Server is shutting down");

    // Force exit if the drain outlives the grace window.
    tokio::spawn(async {
        tokio::time::sleep(std::time::Duration::from_secs(SHUTDOWN_DRAIN_SECS)).await;
        tracing::warn!("Drain window expired, forcing exit");
        std::process::exit(0);
    });
}

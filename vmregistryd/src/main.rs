mod api;
mod config;
mod connection;
mod hypervisor;
mod inventory;
mod supervisor;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use anyhow::{Context, Result};
use crate::config::Config;
use crate::connection::Connection;
use crate::hypervisor::virsh::VirshHypervisor;
use crate::inventory::assembler::Assembler;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("vmregistryd=info"))
        )
        .init();

    tracing::info!("Starting vmregistryd");

    // Load config
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/vmregistry/vmregistryd.toml".to_string());

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;

    tracing::info!("Loaded config from {}", config_path);

    // Open the read-only hypervisor session; without it there is nothing to serve
    let hypervisor = Arc::new(VirshHypervisor::new(&config.hypervisor));
    let connection = Connection::connect(hypervisor)
        .await
        .context("Failed to connect to hypervisor")?;
    let connection = Arc::new(connection);

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();

    // Spawn connection supervisor
    let sup_cancel = cancel.clone();
    let sup_config = config.hypervisor.clone();
    let sup_connection = connection.clone();
    let sup_handle = tokio::spawn(async move {
        if let Err(e) = supervisor::run(sup_connection, sup_config, sup_cancel).await {
            tracing::error!("Connection supervisor error: {}", e);
        }
    });

    // Build API router
    let app_state = api::routes::AppState {
        assembler: Arc::new(Assembler::new(config.inventory.clone())),
        connection: connection.clone(),
    };
    let app = api::routes::router(app_state);

    // Bind HTTP server
    let listener = tokio::net::TcpListener::bind(&config.api.listen)
        .await
        .with_context(|| format!("Failed to bind to {}", config.api.listen))?;

    tracing::info!("API listening on {}", config.api.listen);

    // Run server with graceful shutdown
    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutdown signal received");

    // Trigger cancellation
    cancel.cancel();

    // Wait for all tasks to complete
    let _ = tokio::join!(sup_handle, server_handle);

    tracing::info!("Shutdown complete");
    Ok(())
}

//! Main Entrypoint for the Voice Bridge Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Building the tool registry and the EVI dialer.
//! 3. Constructing the Axum router and starting the server.
//! 4. Handling graceful shutdown.

use anyhow::Context;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, filter::LevelFilter};
use voicebridge::{
    audio::RubatoFactory, config::Config, router::create_router, state::AppState,
    ws::provider::hume::HumeDialer,
};
use voicebridge_core::{ToolRegistry, builtin_tools};

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::from_level(config.log_level).into())
                .from_env_lossy(),
        )
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Initialize Shared Services ---
    let tools = ToolRegistry::build(builtin_tools()).context("Invalid tool declarations")?;
    info!(tools = ?tools, "Tool registry ready.");

    let app_state = Arc::new(AppState {
        dialer: Arc::new(HumeDialer::from_config(&config)),
        tools: Arc::new(tools),
        resamplers: Arc::new(RubatoFactory),
        config: Arc::new(config.clone()),
    });

    // --- 4. Start Server ---
    let app = create_router(app_state);
    info!(
        endpoint = %config.hume_endpoint,
        client_rate = config.client_sample_rate,
        upstream_rate = config.upstream_sample_rate,
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server has shut down.");
    Ok(())
}

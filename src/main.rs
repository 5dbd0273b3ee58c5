use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use sparrow_notifier::{
    handlers,
    state::{AppConfig, AppState, EnvComponentLoader},
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let port = AppConfig::from_env()?.port;
    let app_state = Arc::new(AppState::new(Box::new(EnvComponentLoader)));

    let app = handlers::router(app_state.clone());

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!("Server listening on port {}", port);
    tracing::info!("Health check: http://localhost:{}/health", port);

    // Not fatal: /init-firebase retries once credentials are in place
    if let Err(e) = app_state.lifecycle.initialize().await {
        tracing::warn!("Notification listeners not started: {}", e);
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    app_state.lifecycle.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutting down");
}

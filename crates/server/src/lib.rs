//! Presence & Direct-Message Relay Server Library
//!
//! Clients connect over a WebSocket, sign in, exchange directed messages
//! and typing indicators, and query their chat history. Presence lives in
//! memory; messages are persisted before they are delivered.

pub mod chat;
pub mod core;

use axum::{routing::get, Router};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::core::{AppState, RelayConfig};

/// Install the global tracing subscriber. `RUST_LOG` overrides the default `info`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // A second call (tests, embedding) keeps the subscriber already set.
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Full HTTP application: relay socket, query routes and health check.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(chat::handlers::router(state.clone()))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(tower_http::cors::CorsLayer::permissive())
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

pub async fn run() -> anyhow::Result<()> {
    init_tracing();

    info!("=== Relay Server ===");

    let config = RelayConfig::from_env();
    info!("Storage: {:?} at {:?}", config.storage, config.data_dir);

    let log = config.open_log().await?;
    let auth = config.authenticator();
    let addr = config.bind_addr;

    let state = AppState::new(config, log, auth);
    let app = app(state);

    info!("Relay listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

async fn health_check() -> &'static str {
    "OK - Relay Server"
}

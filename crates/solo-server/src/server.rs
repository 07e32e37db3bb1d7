//! Router assembly and the serve loop

use crate::config::ServerConfig;
use crate::handlers::{generate, health, keys, models};
use crate::state::AppState;
use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Build the axum [`Router`] over `state`.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/generate_apikey", post(keys::generate_apikey))
        .route("/load_model", post(models::load_model))
        .route("/unload_model", post(models::unload_model))
        .route("/status", get(models::status))
        .route("/generate", post(generate::generate))
        .route("/health", get(health::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind to the configured address and serve until ctrl-c.
pub async fn serve(config: &ServerConfig, state: Arc<AppState>) -> std::io::Result<()> {
    let app = build_router(state);
    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "solo server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

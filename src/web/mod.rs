//! HTTP trigger for ingestion runs.
//!
//! - `POST /ingest` - bearer-authenticated; runs every enabled feed and
//!   returns a JSON array of per-feed results
//! - `GET /health` - liveness check

mod auth;
mod error;
mod handlers;

use axum::{
    routing::{get, post},
    Router,
};
use secrecy::SecretString;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::ingest::Ingestor;

pub use auth::AuthError;
pub use error::{ApiError, ErrorCode};

/// Shared state for handlers.
pub struct AppState {
    pub ingestor: Ingestor,
    /// `None` rejects every trigger.
    pub secret: Option<SecretString>,
}

/// Build the router with request tracing.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ingest", post(handlers::trigger_ingest))
        .route("/health", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

/// Serve until Ctrl-C.
pub async fn serve(bind: &str, state: AppState) -> std::io::Result<()> {
    if state.secret.is_none() {
        tracing::warn!("No trigger secret configured; POST /ingest will reject every request");
    }

    let listener = TcpListener::bind(bind).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!("Trigger endpoint listening on http://{}", local_addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

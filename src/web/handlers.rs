use axum::{extract::State, http::HeaderMap, Json};
use std::sync::Arc;

use super::auth;
use super::error::ApiError;
use super::AppState;
use crate::ingest::FeedReport;

/// `GET /health`
pub async fn health() -> &'static str {
    "ok"
}

/// `POST /ingest`: authenticate, run every enabled feed, return one result per feed.
pub async fn trigger_ingest(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<FeedReport>>, ApiError> {
    auth::verify(&headers, state.secret.as_ref())?;

    tracing::info!("Ingestion run triggered");
    let report = state.ingestor.run().await.map_err(|e| {
        tracing::error!(error = %e, "Ingestion run could not start");
        ApiError::internal("Failed to list feeds")
    })?;

    Ok(Json(report.responses()))
}

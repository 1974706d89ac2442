//! System endpoints: health check and storage setup.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;
use utoipa::ToSchema;

use crate::api::dto::SetupResponse;
use crate::app_state::AppState;
use crate::error::{AppError, ErrorResponse};
use crate::persistence::Collection;

/// Health check response.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    status: String,
    timestamp: String,
    version: String,
    scheduler_running: bool,
}

/// `GET /health`: Service health status.
#[utoipa::path(
    get,
    path = "/health",
    tag = "System",
    summary = "Health check",
    description = "Returns service health status, version, current timestamp and whether this process runs jobs.",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
    )
)]
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            timestamp: Utc::now().to_rfc3339(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            scheduler_running: state.scheduler().is_running().await,
        }),
    )
}

/// `GET /setup`: Create tables and schedule the daily purge.
///
/// # Errors
///
/// Returns [`AppError::Persistence`] if the database rejects the schema.
#[utoipa::path(
    get,
    path = "/setup",
    tag = "System",
    summary = "Prepare storage",
    description = "Creates the document collections and the job table if missing, then schedules the daily snapshot purge. Safe to call repeatedly.",
    responses(
        (status = 200, description = "Storage ready", body = SetupResponse),
        (status = 500, description = "Storage failure", body = ErrorResponse),
    )
)]
pub async fn setup_handler(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    state.accounts.setup().await?;
    Ok(Json(SetupResponse {
        success: true,
        collections: Collection::ALL
            .iter()
            .map(|c| c.table_name().to_string())
            .collect(),
    }))
}

/// System routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_handler))
        .route("/setup", get(setup_handler))
}

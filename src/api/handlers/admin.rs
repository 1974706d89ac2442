//! Admin endpoints guarded by the `Admin-Token` header.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::Value;

use crate::api::auth::AdminAuth;
use crate::api::dto::{CountResponse, JobSummaryDto, WipeResponse};
use crate::app_state::AppState;
use crate::domain::AccountId;
use crate::error::{AppError, ErrorResponse};

/// `POST /wipe/{account_id}`: Queue the deletion of an account.
///
/// # Errors
///
/// Returns [`AppError::Unauthorized`] without a valid admin token.
#[utoipa::path(
    post,
    path = "/wipe/{account_id}",
    tag = "Admin",
    summary = "Delete an account",
    description = "Queues a one-shot job that cancels the account's refresh jobs, then removes its credential and snapshots.",
    params(
        ("account_id" = String, Path, description = "Account id"),
        ("Admin-Token" = String, Header, description = "Admin token"),
    ),
    responses(
        (status = 200, description = "Deletion queued", body = WipeResponse),
        (status = 401, description = "Invalid token", body = ErrorResponse),
    )
)]
pub async fn wipe_account(
    _admin: AdminAuth,
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let account_id = AccountId::parse(&account_id)?;
    let job = state.accounts.request_deletion(&account_id).await?;
    tracing::info!(%account_id, job_id = %job.id, "account deletion queued");
    Ok(Json(WipeResponse {
        success: true,
        job_id: job.id,
    }))
}

/// `POST /edit/{account_id}`: Merge admin attributes into an account.
///
/// # Errors
///
/// Returns [`AppError::Validation`] for a malformed body or a protected
/// field, [`AppError::NotFound`] for an unknown account.
#[utoipa::path(
    post,
    path = "/edit/{account_id}",
    tag = "Admin",
    summary = "Edit account attributes",
    description = "Deep-merges the JSON object body into the stored credential. `accountId` and `refreshToken` cannot be edited.",
    params(
        ("account_id" = String, Path, description = "Account id"),
        ("Admin-Token" = String, Header, description = "Admin token"),
    ),
    request_body = serde_json::Value,
    responses(
        (status = 200, description = "Updated account", body = serde_json::Value),
        (status = 400, description = "Invalid data", body = ErrorResponse),
        (status = 401, description = "Invalid token", body = ErrorResponse),
        (status = 404, description = "Account not found", body = ErrorResponse),
    )
)]
pub async fn edit_account(
    _admin: AdminAuth,
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let account_id = AccountId::parse(&account_id)?;
    let patch: Value = serde_json::from_slice(&body)
        .map_err(|e| AppError::Validation(format!("invalid data: {e}")))?;
    Ok(Json(state.accounts.edit(&account_id, &patch).await?))
}

/// `POST /refresh`: Refresh every account now.
///
/// # Errors
///
/// Returns the first scheduling error.
#[utoipa::path(
    post,
    path = "/refresh",
    tag = "Admin",
    summary = "Refresh all accounts",
    description = "Queues an immediate one-shot refresh for every connected account.",
    params(
        ("Admin-Token" = String, Header, description = "Admin token"),
    ),
    responses(
        (status = 200, description = "Refreshes queued", body = CountResponse),
        (status = 401, description = "Invalid token", body = ErrorResponse),
    )
)]
pub async fn refresh_all(
    _admin: AdminAuth,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(CountResponse::new(state.accounts.refresh_all().await?)))
}

/// `POST /reschedule`: Re-create every recurring job.
///
/// # Errors
///
/// Returns the first scheduling error.
#[utoipa::path(
    post,
    path = "/reschedule",
    tag = "Admin",
    summary = "Reschedule jobs",
    description = "Re-upserts the hourly refresh of every account and the daily snapshot purge.",
    params(
        ("Admin-Token" = String, Header, description = "Admin token"),
    ),
    responses(
        (status = 200, description = "Jobs rescheduled", body = CountResponse),
        (status = 401, description = "Invalid token", body = ErrorResponse),
    )
)]
pub async fn reschedule(
    _admin: AdminAuth,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(CountResponse::new(state.accounts.reschedule_all().await?)))
}

/// `GET /jobs`: List scheduled jobs.
///
/// # Errors
///
/// Returns [`AppError::Persistence`] on storage failure.
#[utoipa::path(
    get,
    path = "/jobs",
    tag = "Admin",
    summary = "List jobs",
    description = "Returns every scheduled job with its state and run history.",
    params(
        ("Admin-Token" = String, Header, description = "Admin token"),
    ),
    responses(
        (status = 200, description = "Scheduled jobs", body = Vec<JobSummaryDto>),
        (status = 401, description = "Invalid token", body = ErrorResponse),
    )
)]
pub async fn list_jobs(
    _admin: AdminAuth,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let now = Utc::now();
    let jobs: Vec<JobSummaryDto> = state
        .accounts
        .jobs()
        .await?
        .into_iter()
        .map(|job| JobSummaryDto::from_job(job, now))
        .collect();
    Ok(Json(jobs))
}

/// Admin routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/wipe/{account_id}", post(wipe_account))
        .route("/edit/{account_id}", post(edit_account))
        .route("/refresh", post(refresh_all))
        .route("/reschedule", post(reschedule))
        .route("/jobs", get(list_jobs))
}

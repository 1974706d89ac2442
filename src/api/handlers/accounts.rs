//! Read-only account endpoints: list, details, latest snapshot, ranking.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use crate::app_state::AppState;
use crate::domain::AccountId;
use crate::error::{AppError, ErrorResponse};

/// `GET /`: List connected accounts.
///
/// # Errors
///
/// Returns [`AppError::Persistence`] on storage failure.
#[utoipa::path(
    get,
    path = "/",
    tag = "Accounts",
    summary = "List accounts",
    description = "Returns every connected account with its health score and failure flag. Refresh tokens are never included.",
    responses(
        (status = 200, description = "Connected accounts", body = Vec<serde_json::Value>),
    )
)]
pub async fn list_accounts(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.accounts.list_accounts().await?))
}

/// `GET /get/{account_id}`: Account details with the latest snapshot.
///
/// # Errors
///
/// Returns [`AppError::NotFound`] if the account is unknown.
#[utoipa::path(
    get,
    path = "/get/{account_id}",
    tag = "Accounts",
    summary = "Get account",
    description = "Returns the account (without secrets) and its latest snapshot, which is `null` before the first refresh.",
    params(
        ("account_id" = String, Path, description = "Account id"),
    ),
    responses(
        (status = 200, description = "Account and snapshot", body = serde_json::Value),
        (status = 404, description = "Account not found", body = ErrorResponse),
    )
)]
pub async fn get_account(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let account_id = AccountId::parse(&account_id)?;
    Ok(Json(state.accounts.account_view(&account_id).await?))
}

/// `GET /json/{account_id}`: Latest snapshot.
///
/// # Errors
///
/// Returns [`AppError::NotFound`] if the account is unknown or not yet
/// refreshed.
#[utoipa::path(
    get,
    path = "/json/{account_id}",
    tag = "Accounts",
    summary = "Latest snapshot",
    description = "Returns the most recent snapshot of the account.",
    params(
        ("account_id" = String, Path, description = "Account id"),
    ),
    responses(
        (status = 200, description = "Latest snapshot", body = serde_json::Value),
        (status = 404, description = "No account or no data", body = ErrorResponse),
    )
)]
pub async fn account_json(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let account_id = AccountId::parse(&account_id)?;
    Ok(Json(state.accounts.latest_snapshot(&account_id).await?))
}

/// `GET /rank`: Latest snapshot of every account.
///
/// # Errors
///
/// Returns [`AppError::Persistence`] on storage failure.
#[utoipa::path(
    get,
    path = "/rank",
    tag = "Accounts",
    summary = "Rank accounts",
    description = "Returns the latest snapshot of every account that has been refreshed at least once.",
    responses(
        (status = 200, description = "Latest snapshots", body = Vec<serde_json::Value>),
    )
)]
pub async fn rank(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.accounts.ranking().await?))
}

/// Account routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_accounts))
        .route("/get/{account_id}", get(get_account))
        .route("/json/{account_id}", get(account_json))
        .route("/rank", get(rank))
}

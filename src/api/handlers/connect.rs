//! OAuth connection flow: `/add/{kind}` and `/callback`.

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Redirect};
use axum::routing::get;
use axum::Router;

use crate::api::dto::CallbackParams;
use crate::app_state::AppState;
use crate::error::{AppError, ErrorResponse};
use crate::remote::LoginEnvironment;

/// `GET /add/{kind}`: Start connecting an account.
///
/// # Errors
///
/// Returns [`AppError::Internal`] if the configured login URL is invalid.
#[utoipa::path(
    get,
    path = "/add/{kind}",
    tag = "Accounts",
    summary = "Connect an account",
    description = "Redirects to the authorization page. `sandbox` selects the sandbox login host; any other value selects production.",
    params(
        ("kind" = String, Path, description = "`production` or `sandbox`"),
    ),
    responses(
        (status = 303, description = "Redirect to the authorization page"),
    )
)]
pub async fn add_account(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let env = LoginEnvironment::from_kind(&kind);
    let url = state.oauth.authorization_url(env)?;
    tracing::debug!(env = env.as_state(), "redirecting to authorization page");
    Ok(Redirect::to(&url))
}

/// `GET /callback`: Finish connecting an account.
///
/// # Errors
///
/// Returns [`AppError::Validation`] without a code, [`AppError::Upstream`]
/// if the exchange or identity lookup fails, or a storage error.
#[utoipa::path(
    get,
    path = "/callback",
    tag = "Accounts",
    summary = "OAuth callback",
    description = "Exchanges the authorization code, looks up the identity, stores the encrypted credential, schedules the hourly refresh and redirects to the account list.",
    params(CallbackParams),
    responses(
        (status = 303, description = "Account connected"),
        (status = 400, description = "Missing code or access denied", body = ErrorResponse),
        (status = 502, description = "Token exchange failed", body = ErrorResponse),
    )
)]
pub async fn oauth_callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Result<impl IntoResponse, AppError> {
    if let Some(error) = params.error {
        let detail = params.error_description.unwrap_or_default();
        return Err(AppError::Validation(format!("authorization denied: {error} {detail}")));
    }
    let code = params
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AppError::Validation("missing authorization code".into()))?;
    let env = LoginEnvironment::from_state(params.state.as_deref());

    let grant = state.oauth.exchange_code(&code, env).await?;
    let identity = state.oauth.identity(&grant).await?;
    let credential = state
        .accounts
        .connect(&identity, &grant, state.oauth.login_url(env))
        .await?;
    tracing::info!(account_id = %credential.account_id, "account connected");
    Ok(Redirect::to("/"))
}

/// OAuth routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/add/{kind}", get(add_account))
        .route("/callback", get(oauth_callback))
}

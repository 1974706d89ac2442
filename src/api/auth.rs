//! Admin token check for the maintenance endpoints.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::app_state::AppState;
use crate::error::AppError;

/// Header carrying the admin token.
pub const ADMIN_TOKEN_HEADER: &str = "Admin-Token";

/// Compares two byte strings in time independent of where they differ.
#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Extractor that admits requests carrying the configured admin token.
///
/// Every request is rejected when no admin token is configured.
#[derive(Debug, Clone, Copy)]
pub struct AdminAuth;

impl FromRequestParts<AppState> for AdminAuth {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.admin_token.as_deref() else {
            return Err(AppError::Unauthorized("admin endpoints are disabled".into()));
        };
        let presented = parts
            .headers
            .get(ADMIN_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if constant_time_eq(presented.as_bytes(), expected.as_bytes()) {
            Ok(Self)
        } else {
            tracing::warn!(path = %parts.uri.path(), "rejected admin request");
            Err(AppError::Unauthorized("invalid token".into()))
        }
    }
}

//! Service error types with HTTP status code mapping.
//!
//! [`AppError`] is the central error type for the service. Each variant
//! maps to a numeric error code, an HTTP status code and a structured JSON
//! error response.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

use crate::remote::RemoteError;

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "success": false,
///   "error": {
///     "code": 2001,
///     "message": "not found: no such account 00D000000000001"
///   }
/// }
/// ```
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Always `false` for error payloads.
    pub success: bool,
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Numeric error code (see code ranges on [`AppError`]).
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
}

/// Server-side error enum with HTTP status code mapping.
///
/// # Error Code Ranges
///
/// | Range     | Category         | HTTP Status                 |
/// |-----------|------------------|-----------------------------|
/// | 1000–1999 | Validation/Auth  | 400 Bad Request / 401       |
/// | 2000–2999 | Not Found        | 404 Not Found               |
/// | 3000–3999 | Server           | 500 Internal Server Error   |
/// | 4000–4999 | Upstream / Jobs  | 502 Bad Gateway / 504       |
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A remote query failed (transport or query error on any page).
    #[error("remote query failed: {0}")]
    RemoteQuery(#[from] RemoteError),

    /// A referenced account, snapshot or job does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A job handler exceeded its execution ceiling.
    #[error("job {kind} timed out after {limit_secs}s")]
    JobTimeout {
        /// Job kind name.
        kind: String,
        /// Execution ceiling that was exceeded, in seconds.
        limit_secs: u64,
    },

    /// Malformed input.
    #[error("invalid request: {0}")]
    Validation(String),

    /// Document or job store failure.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Missing or invalid admin token.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Encryption or decryption of a stored token failed.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// OAuth token exchange or identity lookup failed.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::Validation(_) => 1001,
            Self::Unauthorized(_) => 1002,
            Self::NotFound(_) => 2001,
            Self::Internal(_) => 3000,
            Self::Persistence(_) => 3001,
            Self::Crypto(_) => 3002,
            Self::RemoteQuery(_) => 4001,
            Self::Upstream(_) => 4002,
            Self::JobTimeout { .. } => 4003,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Persistence(_) | Self::Crypto(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::RemoteQuery(_) | Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::JobTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Returns `true` for the timeout failure raised by the scheduler.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::JobTimeout { .. })
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, code = self.error_code(), "request failed");
        }
        let body = ErrorResponse {
            success: false,
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}

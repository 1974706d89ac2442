//! DTOs for the account and OAuth endpoints.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

/// Query string of the OAuth redirect back to `/callback`.
#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct CallbackParams {
    /// Authorization code to exchange.
    pub code: Option<String>,
    /// Login environment chosen on `/add/{kind}`.
    pub state: Option<String>,
    /// Error code when the operator denied access.
    pub error: Option<String>,
    /// Human-readable error detail.
    pub error_description: Option<String>,
}

/// Response of `/wipe/{account_id}`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WipeResponse {
    /// Always `true`.
    pub success: bool,
    /// Id of the queued deletion job.
    pub job_id: Uuid,
}

/// Response of `/setup`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SetupResponse {
    /// Always `true`.
    pub success: bool,
    /// Collections that are now present.
    pub collections: Vec<String>,
}

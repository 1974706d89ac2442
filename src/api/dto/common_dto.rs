//! Shared DTO types used across multiple endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Acknowledgement carrying the number of affected items.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CountResponse {
    /// Always `true`.
    pub success: bool,
    /// Jobs queued or rescheduled.
    pub count: usize,
}

impl CountResponse {
    /// Wraps `count`.
    #[must_use]
    pub const fn new(count: usize) -> Self {
        Self {
            success: true,
            count,
        }
    }
}

//! Remote query client abstraction.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{AccountCredential, ApiUsage, QueryEngine, QueryResult};
use crate::error::AppError;

/// Failure reported by the remote system or the transport to it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RemoteError {
    /// Upstream error code (e.g. `INVALID_TYPE`).
    #[serde(default, alias = "errorCode", skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Error class name (e.g. `HttpError`, `TimeoutError`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Human-readable message.
    #[serde(default)]
    pub message: String,
}

impl RemoteError {
    /// Error with an upstream code.
    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            name: None,
            message: message.into(),
        }
    }

    /// Error with an error class name only.
    pub fn named(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: None,
            name: Some(name.into()),
            message: message.into(),
        }
    }

    /// Short descriptor stored on a failed answer: the code, else the
    /// name, else the message.
    #[must_use]
    pub fn descriptor(&self) -> String {
        self.code
            .as_deref()
            .or(self.name.as_deref())
            .filter(|s| !s.is_empty())
            .map_or_else(|| self.message.clone(), str::to_string)
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.code, &self.name) {
            (Some(code), _) => write!(f, "{code}: {}", self.message),
            (None, Some(name)) => write!(f, "{name}: {}", self.message),
            (None, None) => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for RemoteError {}

/// An authenticated connection to one account's query API.
#[async_trait]
pub trait RemoteClient: Send + Sync + fmt::Debug {
    /// Runs `soql` on `engine` and returns the first page.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] on transport or query failure.
    async fn query(&self, engine: QueryEngine, soql: &str) -> Result<QueryResult, RemoteError>;

    /// Fetches the page at `next_records_url`.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] on transport or query failure.
    async fn query_more(
        &self,
        engine: QueryEngine,
        next_records_url: &str,
    ) -> Result<QueryResult, RemoteError>;

    /// Last API quota usage observed on this connection, if any.
    fn api_usage(&self) -> Option<ApiUsage>;
}

/// Builds [`RemoteClient`]s from stored credentials.
#[async_trait]
pub trait RemoteConnector: Send + Sync + fmt::Debug {
    /// Opens a client for `credential`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Crypto`] if the stored token cannot be opened.
    async fn connect(&self, credential: &AccountCredential) -> Result<Arc<dyn RemoteClient>, AppError>;
}

//! Type-safe account identifier.
//!
//! [`AccountId`] wraps the remote organization id so that account
//! identifiers cannot be confused with other strings (usernames, job ids).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Stable identifier of a connected account.
///
/// Assigned by the remote system (a 15 or 18 character org id) and used as
/// the unique key of the credential document, the `accountId` field of
/// every snapshot and the uniqueness key of its refresh job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    /// Validates and wraps a raw identifier.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Validation`] if the id is empty or contains
    /// anything other than ASCII letters and digits.
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(AppError::Validation("account id must not be empty".into()));
        }
        if !trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(AppError::Validation(format!(
                "account id must be alphanumeric: {trimmed}"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for AccountId {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for AccountId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

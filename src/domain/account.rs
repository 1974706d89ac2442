//! Account credential document.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::AccountId;

/// Health score shown until the first refresh completes.
pub const SYNCING_SCORE: &str = "Syncing..";

/// Health score (and API usage answer) when the value is unavailable.
pub const ERROR_SCORE: &str = "ERR";

/// Stored credential and status of one connected account.
///
/// Serialized with camelCase keys; admin-supplied attributes that are not
/// part of the fixed schema are kept in `extra` and round-trip untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountCredential {
    /// Unique key of the document.
    pub account_id: AccountId,
    /// Username the account was connected with.
    pub username: String,
    /// Base URL for API calls.
    pub instance_url: String,
    /// Login host used for token refresh (production or sandbox).
    pub login_url: String,
    /// Refresh token sealed by [`crate::crypto::TokenCipher`].
    pub refresh_token: String,
    /// Last health score: `"87%"`, `"ERR"` or `"Syncing.."`.
    pub health_check_score: String,
    /// Set when every question of the last refresh failed.
    #[serde(default)]
    pub failed: bool,
    /// Free-form admin attributes merged in by `/edit`.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AccountCredential {
    /// Builds the credential stored on a fresh OAuth connection.
    #[must_use]
    pub fn connected(
        account_id: AccountId,
        username: String,
        instance_url: String,
        login_url: String,
        sealed_refresh_token: String,
    ) -> Self {
        Self {
            account_id,
            username,
            instance_url,
            login_url,
            refresh_token: sealed_refresh_token,
            health_check_score: SYNCING_SCORE.to_string(),
            failed: false,
            extra: Map::new(),
        }
    }

    /// Returns the credential as a JSON document without the sealed token.
    #[must_use]
    pub fn public_view(&self) -> Value {
        let mut doc = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Value::Object(map) = &mut doc {
            map.remove("refreshToken");
        }
        doc
    }
}

/// Recursively merges `patch` into `target`.
///
/// Objects are merged key by key; any other value in `patch` replaces the
/// value in `target`. `null` values in the patch are ignored.
pub fn deep_merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target_map), Value::Object(patch_map)) => {
            for (key, patch_value) in patch_map {
                if patch_value.is_null() {
                    continue;
                }
                match target_map.get_mut(key) {
                    Some(existing) => deep_merge(existing, patch_value),
                    None => {
                        target_map.insert(key.clone(), patch_value.clone());
                    }
                }
            }
        }
        (target, patch) => {
            if !patch.is_null() {
                *target = patch.clone();
            }
        }
    }
}

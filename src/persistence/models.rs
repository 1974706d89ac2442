//! Database models for document collections.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AppError;

/// A named document collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    /// Account credential documents, one per account.
    Credentials,
    /// Snapshot documents, many per account.
    Snapshots,
}

impl Collection {
    /// Every collection, in creation order.
    pub const ALL: [Self; 2] = [Self::Credentials, Self::Snapshots];

    /// Backing table name.
    #[must_use]
    pub const fn table_name(&self) -> &'static str {
        match self {
            Self::Credentials => "credentials",
            Self::Snapshots => "snapshots",
        }
    }
}

/// A stored document row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredDoc {
    /// Auto-increment row ID; insertion order.
    pub id: i64,
    /// JSONB document body.
    pub body: Value,
    /// Server-side creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl StoredDoc {
    /// Deserializes the body into `T`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Persistence`] if the body does not match `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, AppError> {
        serde_json::from_value(self.body.clone()).map_err(|e| {
            AppError::Persistence(format!("document {} is malformed: {e}", self.id))
        })
    }
}

/// Row ordering by insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// Oldest first.
    #[default]
    Ascending,
    /// Newest first.
    Descending,
}

/// Ordering and limit for [`super::DocumentStore::find_docs`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FindOptions {
    /// Insertion order.
    pub order: SortOrder,
    /// Maximum number of rows, unlimited when `None`.
    pub limit: Option<usize>,
}

impl FindOptions {
    /// Newest document only.
    #[must_use]
    pub const fn latest() -> Self {
        Self {
            order: SortOrder::Descending,
            limit: Some(1),
        }
    }
}

/// JSON containment with PostgreSQL `@>` semantics.
///
/// Objects match when every filter key is contained in the value; arrays
/// match when every filter element is contained in some value element;
/// scalars match by equality.
#[must_use]
pub fn json_contains(value: &Value, filter: &Value) -> bool {
    match (value, filter) {
        (Value::Object(a), Value::Object(b)) => b
            .iter()
            .all(|(k, fv)| a.get(k).is_some_and(|av| json_contains(av, fv))),
        (Value::Array(a), Value::Array(b)) => {
            b.iter().all(|fb| a.iter().any(|av| json_contains(av, fb)))
        }
        (a, b) => a == b,
    }
}

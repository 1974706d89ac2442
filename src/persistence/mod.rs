//! Persistence layer: JSON document collections and the job table.
//!
//! Provides the [`DocumentStore`] trait for credential and snapshot
//! documents, with a PostgreSQL implementation (`JSONB` tables queried by
//! containment) and an in-memory implementation for development and
//! tests. [`AccountRepository`] adds the typed account operations on top.

pub mod memory;
pub mod models;
pub mod postgres;
pub mod repository;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::AppError;

pub use memory::MemoryDocumentStore;
pub use models::{Collection, FindOptions, SortOrder, StoredDoc, json_contains};
pub use postgres::{PostgresDocumentStore, PostgresJobStore};
pub use repository::{AccountRepository, CredentialRecord};

/// Schemaless document storage keyed by an auto-increment id.
///
/// Filters use JSON containment (see [`json_contains`]): a document
/// matches when the filter is a sub-document of its body.
#[async_trait]
pub trait DocumentStore: Send + Sync + fmt::Debug {
    /// Creates the backing tables if they do not exist.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Persistence`] on storage failure.
    async fn ensure_collections(&self) -> Result<(), AppError>;

    /// Returns the documents containing `filter`, ordered by insertion.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Persistence`] on storage failure.
    async fn find_docs(
        &self,
        collection: Collection,
        filter: &Value,
        options: FindOptions,
    ) -> Result<Vec<StoredDoc>, AppError>;

    /// Inserts a new document.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Persistence`] on storage failure.
    async fn insert_doc(&self, collection: Collection, body: &Value) -> Result<StoredDoc, AppError>;

    /// Replaces the body of an existing document. Never inserts.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] if the document no longer exists and
    /// [`AppError::Persistence`] on storage failure.
    async fn update_doc(
        &self,
        collection: Collection,
        id: i64,
        body: &Value,
    ) -> Result<StoredDoc, AppError>;

    /// Upserts by primary key: updates `id` when given, inserts otherwise.
    ///
    /// # Errors
    ///
    /// See [`DocumentStore::update_doc`] and [`DocumentStore::insert_doc`].
    async fn save_doc(
        &self,
        collection: Collection,
        id: Option<i64>,
        body: &Value,
    ) -> Result<StoredDoc, AppError> {
        match id {
            Some(id) => self.update_doc(collection, id, body).await,
            None => self.insert_doc(collection, body).await,
        }
    }

    /// Inserts `body` only while a document matching `guard_filter` exists
    /// in `guard`, atomically. Returns `None` when the guard fails.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Persistence`] on storage failure.
    async fn insert_doc_if(
        &self,
        collection: Collection,
        body: &Value,
        guard: Collection,
        guard_filter: &Value,
    ) -> Result<Option<StoredDoc>, AppError>;

    /// Deletes the documents containing `filter`. Returns the count removed.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Persistence`] on storage failure.
    async fn destroy(&self, collection: Collection, filter: &Value) -> Result<u64, AppError>;

    /// Deletes the documents created before `cutoff`. Returns the count removed.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Persistence`] on storage failure.
    async fn delete_older_than(
        &self,
        collection: Collection,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, AppError>;
}

//! In-memory document store.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::RwLock;

use super::models::{Collection, FindOptions, SortOrder, StoredDoc, json_contains};
use super::DocumentStore;
use crate::error::AppError;

#[derive(Debug, Default)]
struct Tables {
    next_id: i64,
    docs: HashMap<Collection, Vec<StoredDoc>>,
}

impl Tables {
    fn insert(&mut self, collection: Collection, body: &Value) -> StoredDoc {
        self.next_id += 1;
        let doc = StoredDoc {
            id: self.next_id,
            body: body.clone(),
            created_at: Utc::now(),
        };
        self.docs.entry(collection).or_default().push(doc.clone());
        doc
    }

    fn any_match(&self, collection: Collection, filter: &Value) -> bool {
        self.docs
            .get(&collection)
            .is_some_and(|docs| docs.iter().any(|d| json_contains(&d.body, filter)))
    }
}

/// Process-local [`DocumentStore`].
///
/// All collections share one lock, which makes the guarded insert atomic
/// with respect to deletes.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    tables: RwLock<Tables>,
}

impl MemoryDocumentStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in `collection`.
    pub async fn count(&self, collection: Collection) -> usize {
        self.tables
            .read()
            .await
            .docs
            .get(&collection)
            .map_or(0, Vec::len)
    }

    /// Overrides the creation time of a document.
    #[cfg(test)]
    pub(crate) async fn backdate(&self, collection: Collection, id: i64, at: DateTime<Utc>) {
        let mut tables = self.tables.write().await;
        if let Some(doc) = tables
            .docs
            .get_mut(&collection)
            .and_then(|docs| docs.iter_mut().find(|d| d.id == id))
        {
            doc.created_at = at;
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn ensure_collections(&self) -> Result<(), AppError> {
        let mut tables = self.tables.write().await;
        for collection in Collection::ALL {
            tables.docs.entry(collection).or_default();
        }
        Ok(())
    }

    async fn find_docs(
        &self,
        collection: Collection,
        filter: &Value,
        options: FindOptions,
    ) -> Result<Vec<StoredDoc>, AppError> {
        let tables = self.tables.read().await;
        let Some(docs) = tables.docs.get(&collection) else {
            return Ok(Vec::new());
        };
        let matching = docs.iter().filter(|d| json_contains(&d.body, filter));
        let limit = options.limit.unwrap_or(usize::MAX);
        let found = match options.order {
            SortOrder::Ascending => matching.take(limit).cloned().collect(),
            SortOrder::Descending => matching.rev().take(limit).cloned().collect(),
        };
        Ok(found)
    }

    async fn insert_doc(&self, collection: Collection, body: &Value) -> Result<StoredDoc, AppError> {
        Ok(self.tables.write().await.insert(collection, body))
    }

    async fn update_doc(
        &self,
        collection: Collection,
        id: i64,
        body: &Value,
    ) -> Result<StoredDoc, AppError> {
        let mut tables = self.tables.write().await;
        let doc = tables
            .docs
            .get_mut(&collection)
            .and_then(|docs| docs.iter_mut().find(|d| d.id == id))
            .ok_or_else(|| {
                AppError::NotFound(format!("document {id} in {}", collection.table_name()))
            })?;
        doc.body = body.clone();
        Ok(doc.clone())
    }

    async fn insert_doc_if(
        &self,
        collection: Collection,
        body: &Value,
        guard: Collection,
        guard_filter: &Value,
    ) -> Result<Option<StoredDoc>, AppError> {
        let mut tables = self.tables.write().await;
        if !tables.any_match(guard, guard_filter) {
            return Ok(None);
        }
        Ok(Some(tables.insert(collection, body)))
    }

    async fn destroy(&self, collection: Collection, filter: &Value) -> Result<u64, AppError> {
        let mut tables = self.tables.write().await;
        let Some(docs) = tables.docs.get_mut(&collection) else {
            return Ok(0);
        };
        let before = docs.len();
        docs.retain(|d| !json_contains(&d.body, filter));
        Ok(u64::try_from(before - docs.len()).unwrap_or(u64::MAX))
    }

    async fn delete_older_than(
        &self,
        collection: Collection,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let mut tables = self.tables.write().await;
        let Some(docs) = tables.docs.get_mut(&collection) else {
            return Ok(0);
        };
        let before = docs.len();
        docs.retain(|d| d.created_at >= cutoff);
        Ok(u64::try_from(before - docs.len()).unwrap_or(u64::MAX))
    }
}

//! Typed account operations over a [`DocumentStore`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Value, json};

use super::models::{Collection, FindOptions};
use super::DocumentStore;
use crate::domain::{AccountCredential, AccountId, Snapshot};
use crate::error::AppError;

/// A credential document together with its row id.
#[derive(Debug, Clone)]
pub struct CredentialRecord {
    /// Row id in the credentials collection.
    pub id: i64,
    /// Decoded credential.
    pub credential: AccountCredential,
    /// When the account was first connected.
    pub created_at: DateTime<Utc>,
}

/// Account-scoped reads and writes of credentials and snapshots.
#[derive(Debug, Clone)]
pub struct AccountRepository {
    store: Arc<dyn DocumentStore>,
}

fn account_filter(account_id: &AccountId) -> Value {
    json!({ "accountId": account_id.as_str() })
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Value, AppError> {
    serde_json::to_value(value).map_err(|e| AppError::Internal(format!("encode failed: {e}")))
}

impl AccountRepository {
    /// Wraps a document store.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Creates the collections if missing.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Persistence`] on storage failure.
    pub async fn ensure_collections(&self) -> Result<(), AppError> {
        self.store.ensure_collections().await
    }

    /// Looks up the credential of `account_id`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Persistence`] on storage failure or a malformed document.
    pub async fn find_credential(
        &self,
        account_id: &AccountId,
    ) -> Result<Option<CredentialRecord>, AppError> {
        let docs = self
            .store
            .find_docs(
                Collection::Credentials,
                &account_filter(account_id),
                FindOptions::latest(),
            )
            .await?;
        docs.first()
            .map(|doc| {
                Ok(CredentialRecord {
                    id: doc.id,
                    credential: doc.decode()?,
                    created_at: doc.created_at,
                })
            })
            .transpose()
    }

    /// Loads the credential of `account_id`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] if the account is not connected.
    pub async fn get_credential(&self, account_id: &AccountId) -> Result<CredentialRecord, AppError> {
        self.find_credential(account_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("no such account {account_id}")))
    }

    /// Lists every connected account, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Persistence`] on storage failure.
    pub async fn list_credentials(&self) -> Result<Vec<CredentialRecord>, AppError> {
        let docs = self
            .store
            .find_docs(Collection::Credentials, &json!({}), FindOptions::default())
            .await?;
        docs.iter()
            .map(|doc| {
                Ok(CredentialRecord {
                    id: doc.id,
                    credential: doc.decode()?,
                    created_at: doc.created_at,
                })
            })
            .collect()
    }

    /// Inserts or replaces the credential keyed by its account id.
    ///
    /// Admin attributes of an existing document are kept unless the new
    /// credential sets them.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Persistence`] on storage failure.
    pub async fn upsert_credential(
        &self,
        credential: &AccountCredential,
    ) -> Result<CredentialRecord, AppError> {
        let existing = self.find_credential(&credential.account_id).await?;
        let mut merged = credential.clone();
        if let Some(existing) = &existing {
            for (key, value) in &existing.credential.extra {
                merged.extra.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
        let body = encode(&merged)?;
        let doc = self
            .store
            .save_doc(Collection::Credentials, existing.map(|e| e.id), &body)
            .await?;
        Ok(CredentialRecord {
            id: doc.id,
            credential: merged,
            created_at: doc.created_at,
        })
    }

    /// Applies `patch` to the stored credential and writes it back.
    ///
    /// Update-only: a credential deleted in the meantime is not re-created.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] if the account is gone.
    pub async fn patch_credential<F>(
        &self,
        account_id: &AccountId,
        patch: F,
    ) -> Result<AccountCredential, AppError>
    where
        F: FnOnce(&mut AccountCredential) + Send,
    {
        let mut record = self.get_credential(account_id).await?;
        patch(&mut record.credential);
        let body = encode(&record.credential)?;
        self.store
            .update_doc(Collection::Credentials, record.id, &body)
            .await
            .map_err(|e| match e {
                AppError::NotFound(_) => AppError::NotFound(format!("no such account {account_id}")),
                other => other,
            })?;
        Ok(record.credential)
    }

    /// Persists a snapshot while its account still exists.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] if the account was deleted, which
    /// keeps a late refresh from leaving orphaned snapshots behind.
    pub async fn save_snapshot(&self, snapshot: &Snapshot) -> Result<i64, AppError> {
        let body = encode(snapshot)?;
        let filter = account_filter(&snapshot.account_id);
        let doc = self
            .store
            .insert_doc_if(Collection::Snapshots, &body, Collection::Credentials, &filter)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("no such account {}", snapshot.account_id))
            })?;
        Ok(doc.id)
    }

    /// Returns the most recent snapshot of `account_id`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] if the account has no snapshot yet.
    pub async fn latest_snapshot(&self, account_id: &AccountId) -> Result<Snapshot, AppError> {
        let docs = self
            .store
            .find_docs(
                Collection::Snapshots,
                &account_filter(account_id),
                FindOptions::latest(),
            )
            .await?;
        docs.first()
            .ok_or_else(|| AppError::NotFound(format!("no data for account {account_id}")))?
            .decode()
    }

    /// Deletes the credential, then every snapshot of `account_id`.
    ///
    /// Returns `(credentials, snapshots)` removed.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Persistence`] on storage failure.
    pub async fn delete_account_data(&self, account_id: &AccountId) -> Result<(u64, u64), AppError> {
        let filter = account_filter(account_id);
        let credentials = self.store.destroy(Collection::Credentials, &filter).await?;
        let snapshots = self.store.destroy(Collection::Snapshots, &filter).await?;
        Ok((credentials, snapshots))
    }

    /// Deletes snapshots created before `cutoff`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Persistence`] on storage failure.
    pub async fn purge_snapshots_before(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        self.store.delete_older_than(Collection::Snapshots, cutoff).await
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::persistence::MemoryDocumentStore;
    use crate::test_support::credential;

    fn repository() -> AccountRepository {
        AccountRepository::new(Arc::new(MemoryDocumentStore::new()))
    }

    #[tokio::test]
    async fn upsert_is_keyed_by_account_id() {
        let repo = repository();
        let mut cred = credential("00D1");
        let Ok(first) = repo.upsert_credential(&cred).await else {
            panic!("upsert failed");
        };
        cred.username = "new@acme.com".into();
        let Ok(second) = repo.upsert_credential(&cred).await else {
            panic!("upsert failed");
        };
        assert_eq!(first.id, second.id);
        let Ok(all) = repo.list_credentials().await else {
            panic!("list failed");
        };
        assert_eq!(all.len(), 1);
        assert_eq!(all.first().map(|r| r.credential.username.as_str()), Some("new@acme.com"));
    }

    #[tokio::test]
    async fn reconnect_keeps_admin_attributes() {
        let repo = repository();
        let mut cred = credential("00D1");
        cred.extra.insert("team".into(), json!("security"));
        let _ = repo.upsert_credential(&cred).await;
        let fresh = credential("00D1");
        let Ok(record) = repo.upsert_credential(&fresh).await else {
            panic!("upsert failed");
        };
        assert_eq!(record.credential.extra.get("team"), Some(&json!("security")));
    }

    #[tokio::test]
    async fn patch_after_delete_does_not_resurrect() {
        let repo = repository();
        let cred = credential("00D1");
        let _ = repo.upsert_credential(&cred).await;
        let _ = repo.delete_account_data(&cred.account_id).await;
        let result = repo
            .patch_credential(&cred.account_id, |c| c.failed = true)
            .await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
        assert!(matches!(repo.list_credentials().await, Ok(v) if v.is_empty()));
    }

    #[tokio::test]
    async fn snapshot_requires_live_account() {
        let repo = repository();
        let cred = credential("00D1");
        let snapshot = Snapshot {
            time: Utc::now(),
            account_id: cred.account_id.clone(),
            answers: Vec::new(),
        };
        assert!(matches!(
            repo.save_snapshot(&snapshot).await,
            Err(AppError::NotFound(_))
        ));
        let _ = repo.upsert_credential(&cred).await;
        assert!(repo.save_snapshot(&snapshot).await.is_ok());
        let Ok(latest) = repo.latest_snapshot(&cred.account_id).await else {
            panic!("latest failed");
        };
        assert_eq!(latest.account_id, cred.account_id);
    }

    #[tokio::test]
    async fn latest_snapshot_missing_is_not_found() {
        let repo = repository();
        let Ok(id) = AccountId::parse("00D9") else {
            panic!("valid id rejected");
        };
        assert!(matches!(
            repo.latest_snapshot(&id).await,
            Err(AppError::NotFound(_))
        ));
    }
}

//! Account service: connection, queries, admin edits, deletion and the
//! scheduling that ties accounts to their jobs.

use std::sync::Arc;

use chrono::Utc;
use futures_util::future::{join_all, try_join_all};
use serde::Serialize;
use serde_json::{Value, json};

use crate::config::JobConfig;
use crate::crypto::TokenCipher;
use crate::domain::{AccountCredential, AccountId, Job, JobKind, Snapshot, deep_merge};
use crate::error::AppError;
use crate::persistence::AccountRepository;
use crate::remote::{Identity, TokenGrant};
use crate::scheduler::Scheduler;

/// Credential fields an admin edit may not touch.
const PROTECTED_FIELDS: [&str; 2] = ["accountId", "refreshToken"];

/// Unique key of the daily snapshot purge.
fn purge_key() -> Value {
    json!({ "id": 1 })
}

fn account_payload(account_id: &AccountId) -> Value {
    json!({ "accountId": account_id.as_str() })
}

/// An account without secrets, with its latest snapshot if any.
#[derive(Debug, Clone, Serialize)]
pub struct AccountView {
    /// Public credential document.
    pub account: Value,
    /// Most recent snapshot, `null` before the first refresh.
    pub snapshot: Option<Snapshot>,
}

/// Orchestrates account lifecycle operations.
#[derive(Debug, Clone)]
pub struct AccountService {
    repository: AccountRepository,
    scheduler: Scheduler,
    cipher: Arc<TokenCipher>,
    jobs: JobConfig,
}

impl AccountService {
    /// Creates the service.
    #[must_use]
    pub fn new(
        repository: AccountRepository,
        scheduler: Scheduler,
        cipher: Arc<TokenCipher>,
        jobs: JobConfig,
    ) -> Self {
        Self {
            repository,
            scheduler,
            cipher,
            jobs,
        }
    }

    /// The job scheduler.
    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// The account repository.
    #[must_use]
    pub fn repository(&self) -> &AccountRepository {
        &self.repository
    }

    /// Creates tables idempotently and schedules the daily purge.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Persistence`] on storage failure.
    pub async fn setup(&self) -> Result<(), AppError> {
        self.repository.ensure_collections().await?;
        self.scheduler.ensure_schema().await?;
        self.schedule_purge().await?;
        tracing::info!("storage ready");
        Ok(())
    }

    /// Stores the credential of a freshly authorized account and schedules
    /// its recurring refresh.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Upstream`] if no refresh token was granted,
    /// [`AppError::Validation`] for a malformed account id, or a storage
    /// error.
    pub async fn connect(
        &self,
        identity: &Identity,
        grant: &TokenGrant,
        login_url: &str,
    ) -> Result<AccountCredential, AppError> {
        let account_id = AccountId::parse(&identity.organization_id)?;
        let refresh_token = grant.refresh_token.as_deref().ok_or_else(|| {
            AppError::Upstream("authorization granted no refresh token".into())
        })?;
        let sealed = self.cipher.encrypt_str(refresh_token)?;

        let credential = AccountCredential::connected(
            account_id.clone(),
            identity.username.clone(),
            grant.instance_url.clone(),
            login_url.to_string(),
            sealed,
        );
        let record = self.repository.upsert_credential(&credential).await?;
        tracing::info!(%account_id, username = %identity.username, "stored credentials");

        self.schedule_refresh(&account_id).await?;
        Ok(record.credential)
    }

    /// Creates or reschedules the recurring refresh of `account_id`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Persistence`] on storage failure.
    pub async fn schedule_refresh(&self, account_id: &AccountId) -> Result<Job, AppError> {
        let payload = account_payload(account_id);
        self.scheduler
            .schedule_recurring(
                JobKind::RefreshAccount,
                payload.clone(),
                &payload,
                self.jobs.refresh_interval,
            )
            .await
    }

    /// Creates or reschedules the daily snapshot purge.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Persistence`] on storage failure.
    pub async fn schedule_purge(&self) -> Result<Job, AppError> {
        self.scheduler
            .schedule_recurring(
                JobKind::PurgeOldSnapshots,
                json!({}),
                &purge_key(),
                self.jobs.purge_interval,
            )
            .await
    }

    /// Lists connected accounts without their secrets.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Persistence`] on storage failure.
    pub async fn list_accounts(&self) -> Result<Vec<Value>, AppError> {
        let records = self.repository.list_credentials().await?;
        Ok(records.iter().map(|r| r.credential.public_view()).collect())
    }

    /// Latest snapshot of `account_id`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] if the account is unknown or has no
    /// snapshot yet.
    pub async fn latest_snapshot(&self, account_id: &AccountId) -> Result<Snapshot, AppError> {
        self.repository.get_credential(account_id).await?;
        self.repository.latest_snapshot(account_id).await
    }

    /// Account details together with the latest snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] if the account is unknown.
    pub async fn account_view(&self, account_id: &AccountId) -> Result<AccountView, AppError> {
        let record = self.repository.get_credential(account_id).await?;
        let snapshot = match self.repository.latest_snapshot(account_id).await {
            Ok(snapshot) => Some(snapshot),
            Err(AppError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };
        Ok(AccountView {
            account: record.credential.public_view(),
            snapshot,
        })
    }

    /// Latest snapshot of every account, fetched concurrently.
    ///
    /// Accounts that have not been refreshed yet are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Persistence`] on storage failure.
    pub async fn ranking(&self) -> Result<Vec<Snapshot>, AppError> {
        let records = self.repository.list_credentials().await?;
        let lookups = records
            .iter()
            .map(|r| self.repository.latest_snapshot(&r.credential.account_id));
        let mut ranking = Vec::with_capacity(records.len());
        for result in join_all(lookups).await {
            match result {
                Ok(snapshot) => ranking.push(snapshot),
                Err(AppError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(ranking)
    }

    /// Deep-merges admin attributes into the credential of `account_id`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Validation`] if `patch` is not an object, touches
    /// a protected field or yields an invalid credential, and
    /// [`AppError::NotFound`] if the account is unknown.
    pub async fn edit(&self, account_id: &AccountId, patch: &Value) -> Result<Value, AppError> {
        let Value::Object(fields) = patch else {
            return Err(AppError::Validation("edit payload must be a JSON object".into()));
        };
        if let Some(field) = PROTECTED_FIELDS.iter().find(|f| fields.contains_key(**f)) {
            return Err(AppError::Validation(format!("{field} cannot be edited")));
        }

        let record = self.repository.get_credential(account_id).await?;
        let mut doc = serde_json::to_value(&record.credential)
            .map_err(|e| AppError::Internal(format!("encode failed: {e}")))?;
        deep_merge(&mut doc, patch);
        let merged: AccountCredential = serde_json::from_value(doc)
            .map_err(|e| AppError::Validation(format!("invalid attributes: {e}")))?;

        let updated = self
            .repository
            .patch_credential(account_id, move |stored| *stored = merged)
            .await?;
        tracing::info!(%account_id, fields = fields.len(), "credential edited");
        Ok(updated.public_view())
    }

    /// Enqueues the deletion of `account_id`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Persistence`] on storage failure.
    pub async fn request_deletion(&self, account_id: &AccountId) -> Result<Job, AppError> {
        self.scheduler
            .run_now(JobKind::DeleteAccount, account_payload(account_id))
            .await
    }

    /// Cancels the refresh jobs of `account_id`, then deletes its
    /// credential and snapshots.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Persistence`] on storage failure; nothing is
    /// deleted if cancellation fails.
    pub async fn delete_account(&self, account_id: &AccountId) -> Result<(), AppError> {
        let jobs = self
            .scheduler
            .cancel(JobKind::RefreshAccount, account_payload(account_id))
            .await?;
        tracing::info!(%account_id, jobs, "deleted jobs");

        let (credentials, snapshots) = self.repository.delete_account_data(account_id).await?;
        tracing::info!(%account_id, credentials, snapshots, "deleted credentials and data");
        Ok(())
    }

    /// Enqueues an immediate refresh of every account.
    ///
    /// # Errors
    ///
    /// Returns the first scheduling error.
    pub async fn refresh_all(&self) -> Result<usize, AppError> {
        let records = self.repository.list_credentials().await?;
        let jobs = try_join_all(records.iter().map(|r| {
            self.scheduler
                .run_now(JobKind::RefreshAccount, account_payload(&r.credential.account_id))
        }))
        .await?;
        tracing::info!(count = jobs.len(), "refresh queued for every account");
        Ok(jobs.len())
    }

    /// Re-upserts the recurring refresh of every account and the purge.
    ///
    /// # Errors
    ///
    /// Returns the first scheduling error.
    pub async fn reschedule_all(&self) -> Result<usize, AppError> {
        let records = self.repository.list_credentials().await?;
        let jobs = try_join_all(
            records
                .iter()
                .map(|r| self.schedule_refresh(&r.credential.account_id)),
        )
        .await?;
        self.schedule_purge().await?;
        tracing::info!(count = jobs.len(), "rescheduled every account");
        Ok(jobs.len())
    }

    /// Deletes snapshots older than the retention period.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Persistence`] on storage failure.
    pub async fn purge_old_snapshots(&self) -> Result<u64, AppError> {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(self.jobs.snapshot_retention_days));
        let removed = self.repository.purge_snapshots_before(cutoff).await?;
        tracing::info!(removed, %cutoff, "deleted old records");
        Ok(removed)
    }

    /// Lists every scheduled job.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Persistence`] on storage failure.
    pub async fn jobs(&self) -> Result<Vec<Job>, AppError> {
        self.scheduler.jobs().await
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use crate::domain::JobSchedule;
    use crate::persistence::MemoryDocumentStore;
    use crate::scheduler::MemoryJobStore;
    use crate::test_support::{cipher, credential};
    use std::time::Duration;

    fn service() -> AccountService {
        let repo = AccountRepository::new(Arc::new(MemoryDocumentStore::new()));
        let scheduler = Scheduler::new(
            Arc::new(MemoryJobStore::new()),
            SchedulerConfig::default(),
            Duration::from_secs(600),
        );
        AccountService::new(repo, scheduler, Arc::new(cipher()), JobConfig::default())
    }

    fn grant(refresh: Option<&str>) -> TokenGrant {
        let Ok(grant) = serde_json::from_value::<TokenGrant>(json!({
            "access_token": "00Dxx!access",
            "refresh_token": refresh,
            "instance_url": "https://acme.my.salesforce.com",
            "id": "https://login.salesforce.com/id/00D1/005x"
        })) else {
            panic!("grant fixture rejected");
        };
        grant
    }

    fn identity(org: &str) -> Identity {
        Identity {
            organization_id: org.into(),
            username: "ops@acme.com".into(),
        }
    }

    #[tokio::test]
    async fn connect_seals_token_and_schedules_refresh() {
        let svc = service();
        let Ok(cred) = svc
            .connect(&identity("00D1"), &grant(Some("5Aep861")), "https://login.salesforce.com")
            .await
        else {
            panic!("connect failed");
        };
        assert_eq!(cred.health_check_score, "Syncing..");
        assert_ne!(cred.refresh_token, "5Aep861");
        assert_eq!(cipher().decrypt_str(&cred.refresh_token).ok().as_deref(), Some("5Aep861"));

        // reconnecting keeps a single recurring job
        let _ = svc
            .connect(&identity("00D1"), &grant(Some("5Aep862")), "https://login.salesforce.com")
            .await;
        let Ok(jobs) = svc.jobs().await else {
            panic!("jobs failed");
        };
        assert_eq!(jobs.len(), 1);
        let Some(job) = jobs.first() else {
            panic!("no job");
        };
        assert_eq!(job.kind, JobKind::RefreshAccount);
        assert_eq!(job.schedule, JobSchedule::every(Duration::from_secs(3600)));
        assert_eq!(job.payload, json!({"accountId": "00D1"}));

        let Ok(accounts) = svc.list_accounts().await else {
            panic!("list failed");
        };
        assert_eq!(accounts.len(), 1);
        assert!(accounts.iter().all(|a| a.get("refreshToken").is_none()));
    }

    #[tokio::test]
    async fn connect_without_refresh_token_fails() {
        let svc = service();
        let result = svc
            .connect(&identity("00D1"), &grant(None), "https://login.salesforce.com")
            .await;
        assert!(matches!(result, Err(AppError::Upstream(_))));
    }

    #[tokio::test]
    async fn delete_cancels_jobs_then_removes_data() {
        let svc = service();
        let cred = credential("00D1");
        let _ = svc.repository().upsert_credential(&cred).await;
        let _ = svc.schedule_refresh(&cred.account_id).await;
        let _ = svc
            .repository()
            .save_snapshot(&Snapshot {
                time: Utc::now(),
                account_id: cred.account_id.clone(),
                answers: Vec::new(),
            })
            .await;
        let mut events = svc.scheduler().subscribe();

        assert!(svc.delete_account(&cred.account_id).await.is_ok());
        assert!(matches!(
            events.try_recv(),
            Ok(crate::domain::JobEvent::Cancelled { removed: 1, .. })
        ));
        assert!(matches!(svc.jobs().await, Ok(v) if v.is_empty()));
        assert!(matches!(svc.list_accounts().await, Ok(v) if v.is_empty()));

        // a refresh finishing after the deletion cannot bring the account back
        let late = svc
            .repository()
            .save_snapshot(&Snapshot {
                time: Utc::now(),
                account_id: cred.account_id.clone(),
                answers: Vec::new(),
            })
            .await;
        assert!(matches!(late, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn edit_merges_attributes_and_protects_secrets() {
        let svc = service();
        let cred = credential("00D1");
        let _ = svc.repository().upsert_credential(&cred).await;

        let patch = json!({"attributes": [{"name": "Tier 1", "color": "blue"}], "owner": {"team": "sec"}});
        let Ok(view) = svc.edit(&cred.account_id, &patch).await else {
            panic!("edit failed");
        };
        assert_eq!(view.get("owner"), Some(&json!({"team": "sec"})));
        let _ = svc.edit(&cred.account_id, &json!({"owner": {"lead": "kim"}})).await;
        let Ok(stored) = svc.repository().get_credential(&cred.account_id).await else {
            panic!("credential missing");
        };
        assert_eq!(
            stored.credential.extra.get("owner"),
            Some(&json!({"team": "sec", "lead": "kim"}))
        );

        for bad in [json!({"refreshToken": "x"}), json!({"accountId": "00D2"}), json!([1])] {
            assert!(matches!(
                svc.edit(&cred.account_id, &bad).await,
                Err(AppError::Validation(_))
            ));
        }
        let Ok(missing) = AccountId::parse("00D9") else {
            panic!("valid id rejected");
        };
        assert!(matches!(
            svc.edit(&missing, &json!({"a": 1})).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn ranking_skips_accounts_without_data() {
        let svc = service();
        for id in ["00D1", "00D2"] {
            let _ = svc.repository().upsert_credential(&credential(id)).await;
        }
        let Ok(first) = AccountId::parse("00D1") else {
            panic!("valid id rejected");
        };
        let _ = svc
            .repository()
            .save_snapshot(&Snapshot {
                time: Utc::now(),
                account_id: first.clone(),
                answers: Vec::new(),
            })
            .await;
        let Ok(ranking) = svc.ranking().await else {
            panic!("ranking failed");
        };
        assert_eq!(ranking.len(), 1);
        assert_eq!(ranking.first().map(|s| &s.account_id), Some(&first));

        let Ok(view) = svc.account_view(&first).await else {
            panic!("view failed");
        };
        assert!(view.snapshot.is_some());
        assert!(view.account.get("refreshToken").is_none());
    }

    #[tokio::test]
    async fn refresh_all_and_reschedule_enqueue_jobs() {
        let svc = service();
        for id in ["00D1", "00D2", "00D3"] {
            let _ = svc.repository().upsert_credential(&credential(id)).await;
        }
        assert_eq!(svc.refresh_all().await.ok(), Some(3));
        assert_eq!(svc.reschedule_all().await.ok(), Some(3));
        assert_eq!(svc.reschedule_all().await.ok(), Some(3));
        let Ok(jobs) = svc.jobs().await else {
            panic!("jobs failed");
        };
        let once = jobs.iter().filter(|j| j.schedule == JobSchedule::Once).count();
        let purge = jobs.iter().filter(|j| j.kind == JobKind::PurgeOldSnapshots).count();
        assert_eq!(once, 3);
        assert_eq!(purge, 1);
        assert_eq!(jobs.len(), 3 + 3 + 1);
    }

    #[tokio::test]
    async fn setup_is_idempotent() {
        let svc = service();
        assert!(svc.setup().await.is_ok());
        assert!(svc.setup().await.is_ok());
        assert_eq!(svc.jobs().await.map(|j| j.len()).ok(), Some(1));
    }
}

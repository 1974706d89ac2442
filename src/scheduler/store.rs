//! Job persistence trait and the in-memory store.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::{Job, JobKind};
use crate::error::AppError;
use crate::persistence::json_contains;

/// Durable job table shared by every worker.
#[async_trait]
pub trait JobStore: Send + Sync + fmt::Debug {
    /// Creates the job table if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Persistence`] on storage failure.
    async fn ensure_schema(&self) -> Result<(), AppError>;

    /// Inserts `job`, or updates the job with the same `(kind, unique_key)`:
    /// its payload, schedule and next run are replaced, its id, lock and
    /// run history are kept.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Persistence`] on storage failure.
    async fn upsert_unique(&self, job: Job) -> Result<Job, AppError>;

    /// Inserts `job` unconditionally.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Persistence`] on storage failure.
    async fn insert(&self, job: Job) -> Result<Job, AppError>;

    /// Deletes jobs of `kind` whose payload contains `filter`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Persistence`] on storage failure.
    async fn remove_matching(&self, kind: JobKind, filter: &Value) -> Result<u64, AppError>;

    /// Locks up to `limit` due jobs of the given kinds until `lock_until`
    /// and stamps their `last_run_at`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Persistence`] on storage failure.
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        lock_until: DateTime<Utc>,
        kinds: &[JobKind],
        limit: usize,
    ) -> Result<Vec<Job>, AppError>;

    /// Extends the lock of a running job. Returns `false` if the job is gone.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Persistence`] on storage failure.
    async fn renew_lock(&self, id: Uuid, until: DateTime<Utc>) -> Result<bool, AppError>;

    /// Writes the result of a run: updates a kept job, deletes the others.
    /// A job removed while running stays removed.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Persistence`] on storage failure.
    async fn record_run(&self, job: &Job, keep: bool) -> Result<(), AppError>;

    /// Drops the lock of a job so another worker can claim it.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Persistence`] on storage failure.
    async fn release_lock(&self, id: Uuid) -> Result<(), AppError>;

    /// Every job, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Persistence`] on storage failure.
    async fn list(&self) -> Result<Vec<Job>, AppError>;
}

/// Process-local [`JobStore`].
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<Uuid, Job>>,
    renewals: AtomicUsize,
}

impl MemoryJobStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful lock renewals so far.
    #[must_use]
    pub fn renewals(&self) -> usize {
        self.renewals.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn ensure_schema(&self) -> Result<(), AppError> {
        Ok(())
    }

    async fn upsert_unique(&self, job: Job) -> Result<Job, AppError> {
        let mut jobs = self.jobs.lock().await;
        if job.unique_key.is_some() {
            if let Some(existing) = jobs
                .values_mut()
                .find(|j| j.kind == job.kind && j.unique_key == job.unique_key)
            {
                existing.payload = job.payload;
                existing.schedule = job.schedule;
                existing.next_run_at = job.next_run_at;
                return Ok(existing.clone());
            }
        }
        jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn insert(&self, job: Job) -> Result<Job, AppError> {
        self.jobs.lock().await.insert(job.id, job.clone());
        Ok(job)
    }

    async fn remove_matching(&self, kind: JobKind, filter: &Value) -> Result<u64, AppError> {
        let mut jobs = self.jobs.lock().await;
        let before = jobs.len();
        jobs.retain(|_, j| !(j.kind == kind && json_contains(&j.payload, filter)));
        Ok(u64::try_from(before - jobs.len()).unwrap_or(u64::MAX))
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        lock_until: DateTime<Utc>,
        kinds: &[JobKind],
        limit: usize,
    ) -> Result<Vec<Job>, AppError> {
        let mut jobs = self.jobs.lock().await;
        let mut due: Vec<&mut Job> = jobs
            .values_mut()
            .filter(|j| kinds.contains(&j.kind) && j.is_claimable(now))
            .collect();
        due.sort_by_key(|j| (j.next_run_at, j.created_at));
        Ok(due
            .into_iter()
            .take(limit)
            .map(|job| {
                job.locked_until = Some(lock_until);
                job.last_run_at = Some(now);
                job.clone()
            })
            .collect())
    }

    async fn renew_lock(&self, id: Uuid, until: DateTime<Utc>) -> Result<bool, AppError> {
        let mut jobs = self.jobs.lock().await;
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(false);
        };
        job.locked_until = Some(until);
        self.renewals.fetch_add(1, Ordering::Relaxed);
        Ok(true)
    }

    async fn record_run(&self, job: &Job, keep: bool) -> Result<(), AppError> {
        let mut jobs = self.jobs.lock().await;
        if !keep {
            jobs.remove(&job.id);
            return Ok(());
        }
        if let Some(stored) = jobs.get_mut(&job.id) {
            stored.locked_until = None;
            stored.next_run_at = job.next_run_at;
            stored.last_finished_at = job.last_finished_at;
            stored.failed_at = job.failed_at;
            stored.fail_reason.clone_from(&job.fail_reason);
            stored.fail_count = job.fail_count;
        }
        Ok(())
    }

    async fn release_lock(&self, id: Uuid) -> Result<(), AppError> {
        if let Some(job) = self.jobs.lock().await.get_mut(&id) {
            job.locked_until = None;
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Job>, AppError> {
        let mut jobs: Vec<Job> = self.jobs.lock().await.values().cloned().collect();
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::JobSchedule;
    use serde_json::json;
    use std::time::Duration;

    fn refresh_job(account: &str, now: DateTime<Utc>) -> Job {
        Job::new(
            JobKind::RefreshAccount,
            json!({"accountId": account}),
            Some(format!("{{\"accountId\":\"{account}\"}}")),
            JobSchedule::every(Duration::from_secs(3600)),
            now,
        )
    }

    #[tokio::test]
    async fn upsert_keeps_one_job_per_key() {
        let store = MemoryJobStore::new();
        let now = Utc::now();
        let Ok(first) = store.upsert_unique(refresh_job("00D1", now)).await else {
            panic!("upsert failed");
        };
        let Ok(second) = store.upsert_unique(refresh_job("00D1", now)).await else {
            panic!("upsert failed");
        };
        assert_eq!(first.id, second.id);
        let _ = store.upsert_unique(refresh_job("00D2", now)).await;
        assert_eq!(store.list().await.map(|j| j.len()).ok(), Some(2));
    }

    #[tokio::test]
    async fn claim_locks_due_jobs_only() {
        let store = MemoryJobStore::new();
        let now = Utc::now();
        let mut later = refresh_job("00D2", now);
        later.next_run_at = now + chrono::Duration::hours(1);
        let _ = store.insert(refresh_job("00D1", now)).await;
        let _ = store.insert(later).await;

        let lock = now + chrono::Duration::minutes(10);
        let Ok(claimed) = store.claim_due(now, lock, &JobKind::ALL, 10).await else {
            panic!("claim failed");
        };
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed.first().and_then(|j| j.locked_until), Some(lock));

        // locked jobs are not claimed twice
        let again = store.claim_due(now, lock, &JobKind::ALL, 10).await;
        assert!(matches!(again, Ok(v) if v.is_empty()));
    }

    #[tokio::test]
    async fn claim_skips_undefined_kinds() {
        let store = MemoryJobStore::new();
        let now = Utc::now();
        let _ = store.insert(refresh_job("00D1", now)).await;
        let claimed = store
            .claim_due(now, now, &[JobKind::PurgeOldSnapshots], 10)
            .await;
        assert!(matches!(claimed, Ok(v) if v.is_empty()));
    }

    #[tokio::test]
    async fn remove_matching_uses_payload_containment() {
        let store = MemoryJobStore::new();
        let now = Utc::now();
        let _ = store.insert(refresh_job("00D1", now)).await;
        let _ = store.insert(refresh_job("00D2", now)).await;
        let removed = store
            .remove_matching(JobKind::RefreshAccount, &json!({"accountId": "00D1"}))
            .await;
        assert_eq!(removed.ok(), Some(1));
        assert_eq!(store.list().await.map(|j| j.len()).ok(), Some(1));
    }

    #[tokio::test]
    async fn record_run_does_not_resurrect_removed_job() {
        let store = MemoryJobStore::new();
        let now = Utc::now();
        let Ok(job) = store.insert(refresh_job("00D1", now)).await else {
            panic!("insert failed");
        };
        let _ = store.remove_matching(JobKind::RefreshAccount, &json!({})).await;
        assert!(store.record_run(&job, true).await.is_ok());
        assert!(matches!(store.list().await, Ok(v) if v.is_empty()));
        assert_eq!(store.renew_lock(job.id, now).await.ok(), Some(false));
    }
}

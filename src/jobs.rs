//! Handlers of the three job kinds and their registration.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::JobConfig;
use crate::domain::{Job, JobKind};
use crate::error::AppError;
use crate::scheduler::{JobHandler, JobOptions, Scheduler};
use crate::service::{AccountRefresh, AccountService};

/// `refreshAccount`: runs the battery against the account in the payload.
#[derive(Debug)]
pub struct RefreshAccountHandler {
    refresh: AccountRefresh,
}

impl RefreshAccountHandler {
    /// Wraps the refresh workflow.
    #[must_use]
    pub fn new(refresh: AccountRefresh) -> Self {
        Self { refresh }
    }
}

#[async_trait]
impl JobHandler for RefreshAccountHandler {
    async fn run(&self, job: &Job) -> Result<(), AppError> {
        let account_id = job.account_id()?;
        self.refresh.refresh(&account_id).await.map(|_| ())
    }
}

/// `purgeOldSnapshots`: drops snapshots past the retention period.
#[derive(Debug)]
pub struct PurgeOldSnapshotsHandler {
    accounts: AccountService,
}

impl PurgeOldSnapshotsHandler {
    /// Wraps the account service.
    #[must_use]
    pub fn new(accounts: AccountService) -> Self {
        Self { accounts }
    }
}

#[async_trait]
impl JobHandler for PurgeOldSnapshotsHandler {
    async fn run(&self, _job: &Job) -> Result<(), AppError> {
        tracing::info!("deleting old records");
        self.accounts.purge_old_snapshots().await.map(|_| ())
    }
}

/// `deleteAccount`: cancels the account's jobs and removes its data.
#[derive(Debug)]
pub struct DeleteAccountHandler {
    accounts: AccountService,
}

impl DeleteAccountHandler {
    /// Wraps the account service.
    #[must_use]
    pub fn new(accounts: AccountService) -> Self {
        Self { accounts }
    }
}

#[async_trait]
impl JobHandler for DeleteAccountHandler {
    async fn run(&self, job: &Job) -> Result<(), AppError> {
        let account_id = job.account_id()?;
        tracing::info!(%account_id, "deleting account");
        self.accounts.delete_account(&account_id).await
    }
}

/// Defines every job kind on `scheduler`.
///
/// Refreshes get the bounded lock, periodic renewal and execution
/// ceiling from `config`; the other kinds only the lock lifetime.
pub async fn register_job_kinds(
    scheduler: &Scheduler,
    config: &JobConfig,
    refresh: AccountRefresh,
    accounts: &AccountService,
) {
    scheduler
        .define(
            JobKind::RefreshAccount,
            Arc::new(RefreshAccountHandler::new(refresh)),
            JobOptions::long_running(config.lock_lifetime, config.job_timeout, config.lock_renewal),
        )
        .await;
    scheduler
        .define(
            JobKind::PurgeOldSnapshots,
            Arc::new(PurgeOldSnapshotsHandler::new(accounts.clone())),
            JobOptions::with_lock_lifetime(config.lock_lifetime),
        )
        .await;
    scheduler
        .define(
            JobKind::DeleteAccount,
            Arc::new(DeleteAccountHandler::new(accounts.clone())),
            JobOptions::with_lock_lifetime(config.lock_lifetime),
        )
        .await;
}

//! The account refresh workflow: load, connect, fan out, assemble, persist.

use std::sync::Arc;

use crate::domain::{AccountId, Question, Snapshot};
use crate::error::AppError;
use crate::persistence::AccountRepository;
use crate::remote::RemoteConnector;

use super::assembler::SnapshotAssembler;
use super::fanout::FanOutExecutor;

/// Refreshes one account end to end.
#[derive(Debug, Clone)]
pub struct AccountRefresh {
    repository: AccountRepository,
    connector: Arc<dyn RemoteConnector>,
    questions: Arc<[Question]>,
    executor: FanOutExecutor,
    assembler: SnapshotAssembler,
}

impl AccountRefresh {
    /// Creates the workflow over the given battery.
    #[must_use]
    pub fn new(
        repository: AccountRepository,
        connector: Arc<dyn RemoteConnector>,
        questions: Arc<[Question]>,
        executor: FanOutExecutor,
    ) -> Self {
        let assembler = SnapshotAssembler::new(repository.clone());
        Self {
            repository,
            connector,
            questions,
            executor,
            assembler,
        }
    }

    /// Runs the battery against `account_id` and stores the resulting snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] if the account is not connected (or
    /// was deleted mid-refresh), [`AppError::Crypto`] if its token cannot
    /// be opened, or [`AppError::Persistence`] on storage failure.
    pub async fn refresh(&self, account_id: &AccountId) -> Result<Snapshot, AppError> {
        let result = self.run(account_id).await;
        match &result {
            Ok(snapshot) => {
                tracing::info!(%account_id, answers = snapshot.answers.len(), "account refreshed");
            }
            Err(e) => tracing::error!(%account_id, error = %e, "account refresh failed"),
        }
        result
    }

    async fn run(&self, account_id: &AccountId) -> Result<Snapshot, AppError> {
        tracing::info!(%account_id, "syncing");
        let record = self.repository.get_credential(account_id).await?;
        let client = self.connector.connect(&record.credential).await?;

        let outcome = self
            .executor
            .run_all(account_id, client.as_ref(), &self.questions)
            .await;
        let snapshot = self
            .assembler
            .assemble(
                &record.credential,
                outcome,
                self.questions.len(),
                client.api_usage(),
            )
            .await?;

        let id = self.repository.save_snapshot(&snapshot).await?;
        tracing::debug!(%account_id, snapshot_id = id, "snapshot saved");
        Ok(snapshot)
    }
}

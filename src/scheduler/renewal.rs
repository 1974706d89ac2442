//! Periodic lock renewal for long-running jobs.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::JobStore;

/// Renews a job's lock on a fixed period until dropped.
///
/// Scoped to one invocation: dropping the guard aborts the timer, so the
/// renewal stops on success, failure, timeout and panic alike.
#[derive(Debug)]
pub struct LockRenewal {
    handle: JoinHandle<()>,
}

impl LockRenewal {
    /// Starts renewing `job_id` every `every`, extending its lock by `lifetime`.
    #[must_use]
    pub fn spawn(
        store: Arc<dyn JobStore>,
        job_id: Uuid,
        every: Duration,
        lifetime: Duration,
    ) -> Self {
        let lifetime = chrono::Duration::from_std(lifetime).unwrap_or(chrono::Duration::minutes(10));
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
            loop {
                ticker.tick().await;
                match store.renew_lock(job_id, Utc::now() + lifetime).await {
                    Ok(true) => tracing::debug!(%job_id, "renewed job lock"),
                    Ok(false) => {
                        tracing::warn!(%job_id, "job vanished while running, stopping lock renewal");
                        break;
                    }
                    Err(e) => tracing::warn!(%job_id, error = %e, "lock renewal failed"),
                }
            }
        });
        Self { handle }
    }
}

impl Drop for LockRenewal {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

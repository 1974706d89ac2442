//! Job handler trait and per-kind execution options.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::Job;
use crate::error::AppError;

/// Runs one job invocation.
///
/// Handlers must be idempotent: a job whose worker crashed is claimed
/// again once its lock expires, so an invocation can run more than once.
#[async_trait]
pub trait JobHandler: Send + Sync + fmt::Debug {
    /// Executes `job`.
    ///
    /// # Errors
    ///
    /// Any error marks the invocation failed; recurring jobs keep their
    /// schedule.
    async fn run(&self, job: &Job) -> Result<(), AppError>;
}

/// Locking and timeout policy of one job kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobOptions {
    /// Lease granted on claim and on every renewal.
    pub lock_lifetime: Duration,
    /// Execution ceiling; the handler is abandoned when it is exceeded.
    pub timeout: Option<Duration>,
    /// Lock renewal period while the handler runs.
    pub renew_every: Option<Duration>,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            lock_lifetime: Duration::from_secs(600),
            timeout: None,
            renew_every: None,
        }
    }
}

impl JobOptions {
    /// Lock lifetime only, no timeout or renewal.
    #[must_use]
    pub fn with_lock_lifetime(lock_lifetime: Duration) -> Self {
        Self {
            lock_lifetime,
            ..Self::default()
        }
    }

    /// Bounded job with periodic lock renewal.
    #[must_use]
    pub fn long_running(lock_lifetime: Duration, timeout: Duration, renew_every: Duration) -> Self {
        Self {
            lock_lifetime,
            timeout: Some(timeout),
            renew_every: Some(renew_every),
        }
    }
}

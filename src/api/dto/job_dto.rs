//! DTOs for the job listing endpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::domain::{Job, JobState};

/// One scheduled job as shown to admins.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct JobSummaryDto {
    /// Job id.
    pub id: Uuid,
    /// Job kind (`refreshAccount`, `purgeOldSnapshots`, `deleteAccount`).
    pub kind: String,
    /// Handler input.
    #[schema(value_type = Object)]
    pub payload: Value,
    /// `scheduled`, `locked` or `failed`.
    pub state: String,
    /// Interval of a recurring job; absent for one-shot jobs.
    pub interval_secs: Option<u64>,
    /// Next due time.
    pub next_run_at: DateTime<Utc>,
    /// Lock deadline while running.
    pub locked_until: Option<DateTime<Utc>>,
    /// Start of the last run.
    pub last_run_at: Option<DateTime<Utc>>,
    /// End of the last run.
    pub last_finished_at: Option<DateTime<Utc>>,
    /// Reason of the last failure.
    pub fail_reason: Option<String>,
    /// Number of failed runs.
    pub fail_count: u32,
}

impl JobSummaryDto {
    /// Summarizes `job` as of `now`.
    #[must_use]
    pub fn from_job(job: Job, now: DateTime<Utc>) -> Self {
        let state = match job.state(now) {
            JobState::Scheduled => "scheduled",
            JobState::Locked => "locked",
            JobState::Failed => "failed",
        };
        Self {
            id: job.id,
            kind: job.kind.to_string(),
            interval_secs: job.schedule.interval().map(|i| i.num_seconds().unsigned_abs()),
            state: state.to_string(),
            payload: job.payload,
            next_run_at: job.next_run_at,
            locked_until: job.locked_until,
            last_run_at: job.last_run_at,
            last_finished_at: job.last_finished_at,
            fail_reason: job.fail_reason,
            fail_count: job.fail_count,
        }
    }
}

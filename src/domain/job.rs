//! Scheduled job records and lifecycle events.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::AccountId;
use crate::error::AppError;

/// The job kinds the worker knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobKind {
    /// Refresh one account's snapshot.
    RefreshAccount,
    /// Delete snapshots older than the retention window.
    PurgeOldSnapshots,
    /// Cancel jobs and delete all data of one account.
    DeleteAccount,
}

impl JobKind {
    /// Every kind, in registration order.
    pub const ALL: [Self; 3] = [
        Self::RefreshAccount,
        Self::PurgeOldSnapshots,
        Self::DeleteAccount,
    ];

    /// Stable wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RefreshAccount => "refreshAccount",
            Self::PurgeOldSnapshots => "purgeOldSnapshots",
            Self::DeleteAccount => "deleteAccount",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| AppError::Validation(format!("unknown job kind: {s}")))
    }
}

/// When a job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum JobSchedule {
    /// Runs every `interval_secs`, forever.
    #[serde(rename_all = "camelCase")]
    Recurring {
        /// Interval between runs in seconds.
        interval_secs: u64,
    },
    /// Runs once, then is removed.
    Once,
}

impl JobSchedule {
    /// Builds a recurring schedule.
    #[must_use]
    pub fn every(interval: Duration) -> Self {
        Self::Recurring {
            interval_secs: interval.as_secs(),
        }
    }

    /// Interval of a recurring schedule.
    #[must_use]
    pub fn interval(&self) -> Option<chrono::Duration> {
        match self {
            Self::Recurring { interval_secs } => {
                i64::try_from(*interval_secs).ok().map(chrono::Duration::seconds)
            }
            Self::Once => None,
        }
    }
}

/// Coarse state derived from a job record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobState {
    /// Waiting for `next_run_at`.
    Scheduled,
    /// Claimed by a worker whose lock has not expired.
    Locked,
    /// Last run failed; a recurring job is still scheduled.
    Failed,
}

/// How one invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Handler returned `Ok`.
    Completed,
    /// Handler returned an error or was abandoned at the timeout.
    Failed {
        /// Error message recorded on the job.
        reason: String,
        /// Whether the failure is the execution ceiling.
        timed_out: bool,
    },
}

/// One scheduled job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Row identifier.
    pub id: Uuid,
    /// Handler selector.
    pub kind: JobKind,
    /// Handler input, typically `{"accountId": ...}`.
    pub payload: Value,
    /// Canonical JSON of the uniqueness key; at most one job per `(kind, key)`.
    pub unique_key: Option<String>,
    /// Recurrence.
    pub schedule: JobSchedule,
    /// Earliest time of the next run.
    pub next_run_at: DateTime<Utc>,
    /// Lease held by the worker running the job.
    pub locked_until: Option<DateTime<Utc>>,
    /// Start of the last run.
    pub last_run_at: Option<DateTime<Utc>>,
    /// End of the last run.
    pub last_finished_at: Option<DateTime<Utc>>,
    /// Time of the last failure.
    pub failed_at: Option<DateTime<Utc>>,
    /// Message of the last failure.
    pub fail_reason: Option<String>,
    /// Number of failed runs.
    pub fail_count: u32,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// Creates a job due at `now`.
    #[must_use]
    pub fn new(
        kind: JobKind,
        payload: Value,
        unique_key: Option<String>,
        schedule: JobSchedule,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            payload,
            unique_key,
            schedule,
            next_run_at: now,
            locked_until: None,
            last_run_at: None,
            last_finished_at: None,
            failed_at: None,
            fail_reason: None,
            fail_count: 0,
            created_at: now,
        }
    }

    /// Returns `true` when the job is due and not held by a live lock.
    #[must_use]
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.next_run_at <= now && self.locked_until.is_none_or(|until| until <= now)
    }

    /// Coarse state at `now`.
    #[must_use]
    pub fn state(&self, now: DateTime<Utc>) -> JobState {
        if self.locked_until.is_some_and(|until| until > now) {
            JobState::Locked
        } else if self.failed_at.is_some() && self.failed_at >= self.last_finished_at {
            JobState::Failed
        } else {
            JobState::Scheduled
        }
    }

    /// Records the end of an invocation and computes the next run.
    ///
    /// Returns `false` for a one-shot job, which should be removed.
    pub fn finish(&mut self, outcome: &JobOutcome, now: DateTime<Utc>) -> bool {
        self.locked_until = None;
        self.last_finished_at = Some(now);
        if let JobOutcome::Failed { reason, .. } = outcome {
            self.failed_at = Some(now);
            self.fail_reason = Some(reason.clone());
            self.fail_count = self.fail_count.saturating_add(1);
        }
        match self.schedule.interval() {
            Some(interval) => {
                let base = self.last_run_at.unwrap_or(now);
                self.next_run_at = (base + interval).max(now);
                true
            }
            None => false,
        }
    }

    /// Reads `payload.accountId`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Validation`] if the field is missing or invalid.
    pub fn account_id(&self) -> Result<AccountId, AppError> {
        let raw = self
            .payload
            .get("accountId")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                AppError::Validation(format!("job {} has no accountId in its payload", self.id))
            })?;
        AccountId::parse(raw)
    }
}

/// Lifecycle event published by the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    /// A worker claimed the job and started its handler.
    Started {
        /// Job id.
        job_id: Uuid,
        /// Job kind.
        kind: JobKind,
        /// Job payload.
        payload: Value,
        /// Event time.
        timestamp: DateTime<Utc>,
    },
    /// The handler returned `Ok`.
    Completed {
        /// Job id.
        job_id: Uuid,
        /// Job kind.
        kind: JobKind,
        /// Job payload.
        payload: Value,
        /// Wall time of the run.
        duration_ms: u64,
        /// Event time.
        timestamp: DateTime<Utc>,
    },
    /// The handler failed or was abandoned at the timeout.
    Failed {
        /// Job id.
        job_id: Uuid,
        /// Job kind.
        kind: JobKind,
        /// Job payload.
        payload: Value,
        /// Failure message.
        error: String,
        /// Whether the failure is the execution ceiling.
        timed_out: bool,
        /// Event time.
        timestamp: DateTime<Utc>,
    },
    /// Jobs were removed by `cancel`.
    Cancelled {
        /// Cancelled kind.
        kind: JobKind,
        /// Containment filter used.
        filter: Value,
        /// Number of jobs removed.
        removed: u64,
        /// Event time.
        timestamp: DateTime<Utc>,
    },
}

impl JobEvent {
    /// Kind of the job the event is about.
    #[must_use]
    pub const fn kind(&self) -> JobKind {
        match self {
            Self::Started { kind, .. }
            | Self::Completed { kind, .. }
            | Self::Failed { kind, .. }
            | Self::Cancelled { kind, .. } => *kind,
        }
    }

    /// Id of the job, absent on cancellation events.
    #[must_use]
    pub const fn job_id(&self) -> Option<Uuid> {
        match self {
            Self::Started { job_id, .. }
            | Self::Completed { job_id, .. }
            | Self::Failed { job_id, .. } => Some(*job_id),
            Self::Cancelled { .. } => None,
        }
    }

    /// `true` for `Completed` and `Failed`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    fn recurring(now: DateTime<Utc>) -> Job {
        Job::new(
            JobKind::RefreshAccount,
            json!({"accountId": "00D1"}),
            Some("{\"accountId\":\"00D1\"}".into()),
            JobSchedule::every(Duration::from_secs(3600)),
            now,
        )
    }

    #[test]
    fn kind_round_trips_through_wire_name() {
        for kind in JobKind::ALL {
            let parsed: Result<JobKind, _> = kind.as_str().parse();
            assert_eq!(parsed.ok(), Some(kind));
        }
        assert!("refreshOrg".parse::<JobKind>().is_err());
        assert_eq!(
            serde_json::to_value(JobKind::PurgeOldSnapshots).ok(),
            Some(json!("purgeOldSnapshots"))
        );
    }

    #[test]
    fn recurring_job_is_rescheduled_from_last_run() {
        let start = Utc::now();
        let mut job = recurring(start);
        job.last_run_at = Some(start);
        let finished = start + chrono::Duration::minutes(3);
        assert!(job.finish(&JobOutcome::Completed, finished));
        assert_eq!(job.next_run_at, start + chrono::Duration::hours(1));
        assert!(job.locked_until.is_none());
    }

    #[test]
    fn overdue_recurring_job_runs_no_earlier_than_now() {
        let start = Utc::now();
        let mut job = recurring(start);
        job.last_run_at = Some(start);
        let finished = start + chrono::Duration::hours(2);
        job.finish(&JobOutcome::Completed, finished);
        assert_eq!(job.next_run_at, finished);
    }

    #[test]
    fn failure_keeps_schedule_and_records_reason() {
        let start = Utc::now();
        let mut job = recurring(start);
        job.last_run_at = Some(start);
        let outcome = JobOutcome::Failed {
            reason: "boom".into(),
            timed_out: false,
        };
        assert!(job.finish(&outcome, start));
        assert_eq!(job.fail_count, 1);
        assert_eq!(job.fail_reason.as_deref(), Some("boom"));
        assert_eq!(job.state(start), JobState::Failed);
        assert_eq!(job.next_run_at, start + chrono::Duration::hours(1));
    }

    #[test]
    fn one_shot_job_is_not_kept() {
        let now = Utc::now();
        let mut job = Job::new(JobKind::DeleteAccount, json!({}), None, JobSchedule::Once, now);
        assert!(!job.finish(&JobOutcome::Completed, now));
    }

    #[test]
    fn claimable_respects_due_time_and_lock() {
        let now = Utc::now();
        let mut job = recurring(now);
        assert!(job.is_claimable(now));
        job.locked_until = Some(now + chrono::Duration::minutes(10));
        assert!(!job.is_claimable(now));
        assert_eq!(job.state(now), JobState::Locked);
        // an expired lease makes the job claimable again
        assert!(job.is_claimable(now + chrono::Duration::minutes(11)));
        job.locked_until = None;
        job.next_run_at = now + chrono::Duration::seconds(1);
        assert!(!job.is_claimable(now));
    }

    #[test]
    fn account_id_reads_payload() {
        let job = recurring(Utc::now());
        assert_eq!(job.account_id().ok().map(|id| id.to_string()), Some("00D1".into()));
        let bare = Job::new(JobKind::RefreshAccount, json!({}), None, JobSchedule::Once, Utc::now());
        assert!(matches!(bare.account_id(), Err(AppError::Validation(_))));
    }
}

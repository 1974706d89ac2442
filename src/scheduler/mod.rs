//! Persistent job scheduler.
//!
//! Jobs live in a [`JobStore`]; a dispatcher task polls it for due jobs,
//! locks them and runs the handler registered for their kind. A job whose
//! worker dies keeps its lock only until the lock expires, after which any
//! worker may claim it again: execution is at-least-once.
//!
//! ```text
//! Scheduled ──claim──▶ Locked(running) ──▶ Completed ─┐
//!     ▲                      │                        │ recurring
//!     │                      └──────────▶ Failed ─────┤
//!     └───────────────────────────────────────────────┘
//! ```

pub mod handler;
pub mod renewal;
pub mod store;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{Mutex, Notify, OwnedSemaphorePermit, RwLock, Semaphore, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::domain::{EventBus, Job, JobEvent, JobKind, JobOutcome, JobSchedule};
use crate::error::AppError;

pub use handler::{JobHandler, JobOptions};
pub use renewal::LockRenewal;
pub use store::{JobStore, MemoryJobStore};

#[derive(Debug, Clone)]
struct Definition {
    handler: Arc<dyn JobHandler>,
    options: JobOptions,
}

#[derive(Debug)]
struct Inner {
    store: Arc<dyn JobStore>,
    config: SchedulerConfig,
    claim_lifetime: Duration,
    events: EventBus,
    definitions: RwLock<HashMap<JobKind, Definition>>,
    wake: Notify,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    slots: Arc<Semaphore>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    running: Mutex<HashSet<Uuid>>,
}

/// Handle to the job scheduler. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}

impl Scheduler {
    /// Creates a stopped scheduler over `store`.
    ///
    /// `claim_lifetime` is the lock granted when a job is claimed, before
    /// its kind's own lock lifetime applies.
    #[must_use]
    pub fn new(store: Arc<dyn JobStore>, config: SchedulerConfig, claim_lifetime: Duration) -> Self {
        let slots = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
        let events = EventBus::new(config.event_bus_capacity);
        Self {
            inner: Arc::new(Inner {
                store,
                config,
                claim_lifetime,
                events,
                definitions: RwLock::new(HashMap::new()),
                wake: Notify::new(),
                shutdown: CancellationToken::new(),
                tracker: TaskTracker::new(),
                slots,
                dispatcher: Mutex::new(None),
                running: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Subscribes to job lifecycle events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.inner.events.subscribe()
    }

    /// Creates the job table if missing.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Persistence`] on storage failure.
    pub async fn ensure_schema(&self) -> Result<(), AppError> {
        self.inner.store.ensure_schema().await
    }

    /// Registers the handler of `kind`, replacing any previous one.
    pub async fn define(&self, kind: JobKind, handler: Arc<dyn JobHandler>, options: JobOptions) {
        tracing::debug!(%kind, ?options, "job kind defined");
        self.inner
            .definitions
            .write()
            .await
            .insert(kind, Definition { handler, options });
    }

    /// Creates or reschedules the recurring job identified by
    /// `(kind, unique_key)`. The job is due immediately.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Validation`] for a zero interval and
    /// [`AppError::Persistence`] on storage failure.
    pub async fn schedule_recurring(
        &self,
        kind: JobKind,
        payload: Value,
        unique_key: &Value,
        interval: Duration,
    ) -> Result<Job, AppError> {
        if interval.as_secs() == 0 {
            return Err(AppError::Validation(format!(
                "recurring {kind} job needs an interval of at least one second"
            )));
        }
        let key = serde_json::to_string(unique_key)
            .map_err(|e| AppError::Validation(format!("unique key is not serializable: {e}")))?;
        let job = Job::new(kind, payload, Some(key), JobSchedule::every(interval), Utc::now());
        let job = self.inner.store.upsert_unique(job).await?;
        tracing::info!(job_id = %job.id, %kind, interval_secs = interval.as_secs(), "recurring job scheduled");
        self.inner.wake.notify_one();
        Ok(job)
    }

    /// Enqueues a one-shot job due now.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Persistence`] on storage failure.
    pub async fn run_now(&self, kind: JobKind, payload: Value) -> Result<Job, AppError> {
        let job = Job::new(kind, payload, None, JobSchedule::Once, Utc::now());
        let job = self.inner.store.insert(job).await?;
        tracing::info!(job_id = %job.id, %kind, "job queued");
        self.inner.wake.notify_one();
        Ok(job)
    }

    /// Removes every job of `kind` whose payload contains `filter`.
    ///
    /// A matching job that is already running finishes its current
    /// invocation but is not rescheduled.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Persistence`] on storage failure.
    pub async fn cancel(&self, kind: JobKind, filter: Value) -> Result<u64, AppError> {
        let removed = self.inner.store.remove_matching(kind, &filter).await?;
        tracing::info!(%kind, %filter, removed, "jobs cancelled");
        self.inner.events.publish(JobEvent::Cancelled {
            kind,
            filter,
            removed,
            timestamp: Utc::now(),
        });
        Ok(removed)
    }

    /// Lists every scheduled job.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Persistence`] on storage failure.
    pub async fn jobs(&self) -> Result<Vec<Job>, AppError> {
        self.inner.store.list().await
    }

    /// Returns `true` while the dispatcher is running.
    pub async fn is_running(&self) -> bool {
        self.inner.dispatcher.lock().await.is_some()
    }

    /// Starts the dispatcher. Calling it again is a no-op.
    ///
    /// A scheduler cannot be restarted after [`Scheduler::stop`].
    pub async fn start(&self) {
        let mut dispatcher = self.inner.dispatcher.lock().await;
        if dispatcher.is_some() || self.inner.shutdown.is_cancelled() {
            return;
        }
        tracing::info!(
            max_concurrency = self.inner.config.max_concurrency,
            poll_secs = self.inner.config.poll_interval.as_secs(),
            "scheduler started"
        );
        *dispatcher = Some(tokio::spawn(dispatch_loop(Arc::clone(&self.inner))));
    }

    /// Stops claiming jobs and waits for running handlers up to the
    /// shutdown grace period.
    ///
    /// Handlers still running after the grace period are abandoned and
    /// their locks released so another worker can pick the jobs up.
    /// Registered handlers are dropped.
    pub async fn stop(&self) {
        self.inner.shutdown.cancel();
        let handle = self.inner.dispatcher.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "dispatcher task ended abnormally");
            }
        }

        self.inner.tracker.close();
        let grace = self.inner.config.shutdown_grace;
        if tokio::time::timeout(grace, self.inner.tracker.wait()).await.is_err() {
            let abandoned: Vec<Uuid> = self.inner.running.lock().await.drain().collect();
            tracing::warn!(count = abandoned.len(), "abandoning running jobs at shutdown");
            for id in abandoned {
                if let Err(e) = self.inner.store.release_lock(id).await {
                    tracing::warn!(job_id = %id, error = %e, "failed to release job lock");
                }
            }
        }

        self.inner.definitions.write().await.clear();
        tracing::info!("scheduler stopped");
    }
}

async fn dispatch_loop(inner: Arc<Inner>) {
    loop {
        dispatch_due(&inner).await;
        tokio::select! {
            () = inner.shutdown.cancelled() => break,
            () = inner.wake.notified() => {}
            () = tokio::time::sleep(inner.config.poll_interval) => {}
        }
    }
    tracing::debug!("dispatcher exited");
}

async fn dispatch_due(inner: &Arc<Inner>) {
    let kinds: Vec<JobKind> = inner.definitions.read().await.keys().copied().collect();
    let available = inner.slots.available_permits();
    if kinds.is_empty() || available == 0 {
        return;
    }

    let now = Utc::now();
    let lock_until = now + to_chrono(inner.claim_lifetime);
    let jobs = match inner.store.claim_due(now, lock_until, &kinds, available).await {
        Ok(jobs) => jobs,
        Err(e) => {
            tracing::error!(error = %e, "failed to claim due jobs");
            return;
        }
    };

    for job in jobs {
        let Ok(permit) = Arc::clone(&inner.slots).try_acquire_owned() else {
            if let Err(e) = inner.store.release_lock(job.id).await {
                tracing::warn!(job_id = %job.id, error = %e, "failed to release job lock");
            }
            continue;
        };
        inner.tracker.spawn(execute(Arc::clone(inner), job, permit));
    }
}

fn join_result(joined: Result<Result<(), AppError>, tokio::task::JoinError>) -> Result<(), AppError> {
    match joined {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(AppError::Internal("job handler panicked".into())),
        Err(e) => Err(AppError::Internal(format!("job handler aborted: {e}"))),
    }
}

async fn execute(inner: Arc<Inner>, mut job: Job, _permit: OwnedSemaphorePermit) {
    let definition = inner.definitions.read().await.get(&job.kind).cloned();
    let Some(Definition { handler, options }) = definition else {
        tracing::warn!(job_id = %job.id, kind = %job.kind, "no handler defined, releasing job");
        if let Err(e) = inner.store.release_lock(job.id).await {
            tracing::warn!(job_id = %job.id, error = %e, "failed to release job lock");
        }
        return;
    };

    if options.lock_lifetime != inner.claim_lifetime {
        let until = Utc::now() + to_chrono(options.lock_lifetime);
        if let Err(e) = inner.store.renew_lock(job.id, until).await {
            tracing::warn!(job_id = %job.id, error = %e, "failed to set job lock lifetime");
        }
    }

    inner.running.lock().await.insert(job.id);
    tracing::info!(job_id = %job.id, kind = %job.kind, payload = %job.payload, "job started");
    inner.events.publish(JobEvent::Started {
        job_id: job.id,
        kind: job.kind,
        payload: job.payload.clone(),
        timestamp: Utc::now(),
    });

    let started = Instant::now();
    let renewal = options.renew_every.map(|every| {
        LockRenewal::spawn(Arc::clone(&inner.store), job.id, every, options.lock_lifetime)
    });

    let run_job = job.clone();
    let mut task = tokio::spawn(async move { handler.run(&run_job).await });
    let result = match options.timeout {
        Some(limit) => match tokio::time::timeout(limit, &mut task).await {
            Ok(joined) => join_result(joined),
            Err(_) => {
                // The handler keeps running detached; only its outcome is dropped.
                tracing::warn!(job_id = %job.id, kind = %job.kind, limit_secs = limit.as_secs(), "job timed out, abandoning handler");
                Err(AppError::JobTimeout {
                    kind: job.kind.to_string(),
                    limit_secs: limit.as_secs(),
                })
            }
        },
        None => join_result(task.await),
    };
    drop(renewal);

    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    let now = Utc::now();
    let outcome = match &result {
        Ok(()) => JobOutcome::Completed,
        Err(e) => JobOutcome::Failed {
            reason: e.to_string(),
            timed_out: e.is_timeout(),
        },
    };
    let keep = job.finish(&outcome, now);
    if let Err(e) = inner.store.record_run(&job, keep).await {
        tracing::error!(job_id = %job.id, error = %e, "failed to record job run");
    }
    inner.running.lock().await.remove(&job.id);

    let event = match outcome {
        JobOutcome::Completed => {
            tracing::info!(job_id = %job.id, kind = %job.kind, duration_ms, "job completed");
            JobEvent::Completed {
                job_id: job.id,
                kind: job.kind,
                payload: job.payload,
                duration_ms,
                timestamp: now,
            }
        }
        JobOutcome::Failed { reason, timed_out } => {
            tracing::error!(job_id = %job.id, kind = %job.kind, error = %reason, timed_out, "job failed");
            JobEvent::Failed {
                job_id: job.id,
                kind: job.kind,
                payload: job.payload,
                error: reason,
                timed_out,
                timestamp: now,
            }
        }
    };
    inner.events.publish(event);
    inner.wake.notify_one();
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Handler that sleeps for `delay` on the accounts listed in `slow`.
    #[derive(Debug, Default)]
    struct ScriptedHandler {
        slow: Vec<String>,
        delay: Duration,
        fail: bool,
        runs: AtomicUsize,
    }

    #[async_trait]
    impl JobHandler for ScriptedHandler {
        async fn run(&self, job: &Job) -> Result<(), AppError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            let account = job.account_id()?;
            if self.slow.iter().any(|s| s == account.as_str()) {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail {
                return Err(AppError::Internal("scripted failure".into()));
            }
            Ok(())
        }
    }

    fn scheduler(store: Arc<MemoryJobStore>) -> Scheduler {
        let config = SchedulerConfig {
            poll_interval: Duration::from_secs(5),
            max_concurrency: 20,
            shutdown_grace: Duration::from_secs(1),
            event_bus_capacity: 256,
        };
        Scheduler::new(store, config, Duration::from_secs(600))
    }

    async fn next_outcome(rx: &mut broadcast::Receiver<JobEvent>) -> JobEvent {
        let Some(event) = crate::domain::next_terminal(rx).await else {
            panic!("event bus closed");
        };
        event
    }

    fn event_account(event: &JobEvent) -> Option<String> {
        match event {
            JobEvent::Completed { payload, .. } | JobEvent::Failed { payload, .. } => payload
                .get("accountId")
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        }
    }

    #[tokio::test]
    async fn duplicate_recurring_schedule_keeps_one_job() {
        let store = Arc::new(MemoryJobStore::new());
        let scheduler = scheduler(Arc::clone(&store));
        let payload = json!({"accountId": "00D1"});
        for _ in 0..2 {
            let scheduled = scheduler
                .schedule_recurring(
                    JobKind::RefreshAccount,
                    payload.clone(),
                    &payload,
                    Duration::from_secs(3600),
                )
                .await;
            assert!(scheduled.is_ok());
        }
        let Ok(jobs) = scheduler.jobs().await else {
            panic!("list failed");
        };
        assert_eq!(jobs.len(), 1);
    }

    #[tokio::test]
    async fn zero_interval_is_rejected() {
        let scheduler = scheduler(Arc::new(MemoryJobStore::new()));
        let result = scheduler
            .schedule_recurring(JobKind::PurgeOldSnapshots, json!({}), &json!({"id": 1}), Duration::ZERO)
            .await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn cancel_removes_matching_jobs_and_publishes() {
        let scheduler = scheduler(Arc::new(MemoryJobStore::new()));
        let mut rx = scheduler.subscribe();
        for account in ["00D1", "00D2"] {
            let payload = json!({"accountId": account});
            let _ = scheduler
                .schedule_recurring(JobKind::RefreshAccount, payload.clone(), &payload, Duration::from_secs(3600))
                .await;
        }
        let removed = scheduler
            .cancel(JobKind::RefreshAccount, json!({"accountId": "00D1"}))
            .await;
        assert_eq!(removed.ok(), Some(1));
        let Ok(JobEvent::Cancelled { removed, .. }) = rx.recv().await else {
            panic!("expected cancellation event");
        };
        assert_eq!(removed, 1);
        assert_eq!(scheduler.jobs().await.map(|j| j.len()).ok(), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn one_shot_job_runs_and_is_removed() {
        let store = Arc::new(MemoryJobStore::new());
        let scheduler = scheduler(Arc::clone(&store));
        let handler = Arc::new(ScriptedHandler::default());
        scheduler
            .define(JobKind::DeleteAccount, Arc::clone(&handler) as Arc<dyn JobHandler>, JobOptions::default())
            .await;
        let mut rx = scheduler.subscribe();
        scheduler.start().await;

        let queued = scheduler
            .run_now(JobKind::DeleteAccount, json!({"accountId": "00D1"}))
            .await;
        assert!(queued.is_ok());

        let event = next_outcome(&mut rx).await;
        assert!(matches!(event, JobEvent::Completed { kind: JobKind::DeleteAccount, .. }));
        assert_eq!(handler.runs.load(Ordering::SeqCst), 1);
        assert!(matches!(scheduler.jobs().await, Ok(v) if v.is_empty()));
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_recurring_job_keeps_schedule() {
        let store = Arc::new(MemoryJobStore::new());
        let scheduler = scheduler(Arc::clone(&store));
        let handler = Arc::new(ScriptedHandler {
            fail: true,
            ..ScriptedHandler::default()
        });
        scheduler
            .define(JobKind::RefreshAccount, handler, JobOptions::default())
            .await;
        let mut rx = scheduler.subscribe();
        let payload = json!({"accountId": "00D1"});
        let _ = scheduler
            .schedule_recurring(JobKind::RefreshAccount, payload.clone(), &payload, Duration::from_secs(3600))
            .await;
        scheduler.start().await;

        let event = next_outcome(&mut rx).await;
        assert!(matches!(event, JobEvent::Failed { timed_out: false, .. }));
        scheduler.stop().await;

        let Ok(jobs) = scheduler.jobs().await else {
            panic!("list failed");
        };
        let Some(job) = jobs.first() else {
            panic!("recurring job vanished");
        };
        assert_eq!(job.fail_count, 1);
        assert!(job.locked_until.is_none());
        assert!(job.next_run_at > Utc::now());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_abandons_slow_account_without_blocking_others() {
        let store = Arc::new(MemoryJobStore::new());
        let scheduler = scheduler(Arc::clone(&store));
        let handler = Arc::new(ScriptedHandler {
            slow: vec!["00DSLOW".into()],
            delay: Duration::from_secs(3 * 3600),
            ..ScriptedHandler::default()
        });
        scheduler
            .define(
                JobKind::RefreshAccount,
                handler,
                JobOptions::long_running(
                    Duration::from_secs(600),
                    Duration::from_secs(45 * 60),
                    Duration::from_secs(60),
                ),
            )
            .await;
        let mut rx = scheduler.subscribe();
        for account in ["00DSLOW", "00DFAST"] {
            let payload = json!({"accountId": account});
            let _ = scheduler
                .schedule_recurring(JobKind::RefreshAccount, payload.clone(), &payload, Duration::from_secs(3600))
                .await;
        }
        let started = tokio::time::Instant::now();
        scheduler.start().await;

        let first = next_outcome(&mut rx).await;
        assert_eq!(event_account(&first).as_deref(), Some("00DFAST"));
        assert!(matches!(first, JobEvent::Completed { .. }));
        assert!(started.elapsed() < Duration::from_secs(60));

        let second = next_outcome(&mut rx).await;
        assert_eq!(event_account(&second).as_deref(), Some("00DSLOW"));
        let JobEvent::Failed { error, timed_out, .. } = second else {
            panic!("expected the slow account to fail");
        };
        assert!(timed_out);
        assert_eq!(error, "job refreshAccount timed out after 2700s");
        assert!(started.elapsed() >= Duration::from_secs(45 * 60));

        // renewed once a minute while running, then stopped
        let renewals = store.renewals();
        assert!(renewals >= 44, "renewals: {renewals}");
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(store.renewals(), renewals);

        scheduler.stop().await;
        let Ok(jobs) = scheduler.jobs().await else {
            panic!("list failed");
        };
        assert_eq!(jobs.len(), 2);
        assert!(jobs.iter().all(|j| j.locked_until.is_none()));
    }

    #[tokio::test(start_paused = true)]
    async fn start_is_idempotent_and_stop_halts_dispatch() {
        let scheduler = scheduler(Arc::new(MemoryJobStore::new()));
        scheduler.start().await;
        scheduler.start().await;
        assert!(scheduler.is_running().await);
        scheduler.stop().await;
        assert!(!scheduler.is_running().await);
        scheduler.start().await;
        assert!(!scheduler.is_running().await);
    }
}

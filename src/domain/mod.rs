//! Domain layer: accounts, questions, snapshots, jobs and the event bus.
//!
//! This module contains the server-side domain model: account identity
//! and stored credentials, the fixed question battery, the snapshot and
//! answer documents, scheduled job records, and the broadcast bus for job
//! lifecycle events.

pub mod account;
pub mod account_id;
pub mod event_bus;
pub mod job;
pub mod question;
pub mod snapshot;

pub use account::{AccountCredential, ERROR_SCORE, SYNCING_SCORE, deep_merge};
pub use account_id::AccountId;
pub use event_bus::{EventBus, next_terminal};
pub use job::{Job, JobEvent, JobKind, JobOutcome, JobSchedule, JobState};
pub use question::{QueryEngine, Question, RecordFilter, default_battery, question_hash};
pub use snapshot::{Answer, ApiUsage, QueryResult, Snapshot};

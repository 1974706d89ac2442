//! Service layer: business logic orchestration.
//!
//! [`AccountRefresh`] runs the question battery against one account through
//! the [`FanOutExecutor`] and turns the answers into a snapshot with the
//! [`SnapshotAssembler`]. [`AccountService`] backs the HTTP surface and
//! ties accounts to their scheduled jobs.

pub mod account_service;
pub mod assembler;
pub mod fanout;
pub mod refresh;

pub use account_service::{AccountService, AccountView};
pub use assembler::{SnapshotAssembler, failure_transition, format_api_usage, health_check_score};
pub use fanout::{FanOutExecutor, FanOutOutcome};
pub use refresh::AccountRefresh;

//! # orgwatch
//!
//! Health dashboard for connected remote accounts.
//!
//! Accounts are connected through OAuth. Every hour a scheduled job runs a
//! fixed battery of diagnostic queries against each account, with bounded
//! concurrency and full pagination, and stores the answers as a
//! timestamped snapshot. The latest snapshots are served as JSON.
//!
//! ## Architecture
//!
//! ```text
//! Clients (HTTP)
//!     │
//!     ├── REST Handlers (api/)
//!     │
//!     ├── AccountService ─── Scheduler (scheduler/) ─── job handlers (jobs)
//!     │                          │
//!     ├── AccountRefresh ◀───────┘
//!     │     ├── FanOutExecutor ─── run_query ─── RemoteClient (remote/)
//!     │     └── SnapshotAssembler
//!     │
//!     └── PostgreSQL / in-memory persistence
//! ```

pub mod api;
pub mod app_state;
pub mod config;
pub mod crypto;
pub mod domain;
pub mod error;
pub mod jobs;
pub mod persistence;
pub mod remote;
pub mod scheduler;
pub mod service;

#[cfg(test)]
mod test_support;

//! Business services layer.
//!
//! This module contains the core services that make triage decisions,
//! coordinating between providers, storage, and domain types.
//!
//! # Architecture
//!
//! Services sit between the command-line entry point and the
//! infrastructure layer:
//!
//! ```text
//! Entry point (CLI, scheduler)
//!          |
//!          v
//!    Services Layer  <-- You are here
//!          |
//!          v
//! Infrastructure (Providers, Storage)
//! ```
//!
//! # Services Overview
//!
//! - [`BatchRunner`]: Time-boxed control loop over one mailbox
//! - [`TriageEngine`]: Per-message decision state machine
//! - [`RetryingClassifier`]: Total classification with bounded retry
//! - [`DenylistService`]: Blocked-sender lifecycle and grace periods
//! - [`Announcer`]: Batched digests of new blocks

mod announcer;
mod classifier;
mod denylist;
mod engine;
mod runner;

pub use announcer::Announcer;
pub use classifier::{ClassifierSettings, RetryingClassifier};
pub use denylist::{
    normalize_address, DenylistError, DenylistLookup, DenylistResult, DenylistService,
    DenylistStore,
};
pub use engine::{AuditError, AuditLog, Decision, TriageEngine, TriageSettings};
pub use runner::{BatchRunner, RunSummary, RunnerSettings};

//! Domain layer types for the cull triage engine.
//!
//! This module contains the core types used throughout the application:
//! mail messages, denylist entries, and the triage decision vocabulary.

mod denylist;
mod message;
mod triage;
mod types;

pub use denylist::{DenylistEntry, EntrySource};
pub use message::{Address, MailMessage};
pub use triage::{
    AuditRecord, BlockStyle, FallbackVerdict, TriageAction, Verdict, VerdictLabel,
};
pub use types::{MessageId, ThreadId};

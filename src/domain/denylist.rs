//! Denylist domain types.
//!
//! Represents blocked senders and the lifecycle metadata used to decide
//! whether a block is still provisional or has settled.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A blocked sender.
///
/// The address is stored in normalized form (trimmed, lowercased) so a
/// sender maps to exactly one entry regardless of how it appeared on the
/// wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenylistEntry {
    /// Normalized sender address.
    pub address: String,
    /// When the sender was first blocked.
    pub added_at: DateTime<Utc>,
    /// When the block was last re-applied or re-confirmed.
    pub last_confirmed_at: DateTime<Utc>,
    /// How the entry got onto the list.
    pub source: EntrySource,
    /// Whether the block has already been included in a notification digest.
    pub announced: bool,
}

impl DenylistEntry {
    /// Creates a fresh, unannounced entry added at `now`.
    pub fn new(address: impl Into<String>, source: EntrySource, now: DateTime<Utc>) -> Self {
        Self {
            address: address.into(),
            added_at: now,
            last_confirmed_at: now,
            source,
            announced: false,
        }
    }
}

/// How a denylist entry was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntrySource {
    /// Added by the triage pipeline after a classification.
    Auto,
    /// Added by the operator.
    Manual,
}

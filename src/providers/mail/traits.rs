//! Mailbox provider trait definition.
//!
//! This module defines the [`Mailbox`] trait which abstracts over mail
//! backends (Gmail API today, IMAP later). The triage engine and batch runner
//! only ever talk to this trait, so a run can be driven against a fake
//! mailbox in tests.

use async_trait::async_trait;

use crate::domain::{Address, MailMessage, MessageId, ThreadId};

/// Result type alias for mailbox operations.
pub type Result<T> = std::result::Result<T, MailboxError>;

/// Errors that can occur during mailbox operations.
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    /// Authentication failed or credentials expired.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Network or connection error.
    #[error("connection error: {0}")]
    Connection(String),

    /// Rate limit exceeded.
    #[error("rate limit exceeded, retry after {retry_after_secs:?} seconds")]
    RateLimited {
        /// Seconds to wait before retrying, if known.
        retry_after_secs: Option<u64>,
    },

    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid request or parameters.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Abstraction over a mail backend for a single mailbox.
///
/// Implementations are expected to be cheap to share behind an `Arc` once
/// authenticated; only [`authenticate`](Mailbox::authenticate) needs `&mut`.
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Authenticates with the mail backend.
    ///
    /// Must be called before any other operation.
    async fn authenticate(&mut self) -> Result<()>;

    /// Lists inbox messages that have not yet been triaged, oldest first.
    async fn list_unseen(&self, limit: u32) -> Result<Vec<MessageId>>;

    /// Fetches the full content of a single message.
    async fn fetch_message(&self, id: &MessageId) -> Result<MailMessage>;

    /// Returns the sender addresses of every message in a thread.
    async fn thread_senders(&self, thread_id: &ThreadId) -> Result<Vec<Address>>;

    /// Returns the sender addresses of every message in every thread that
    /// has at least one message matching a search query.
    ///
    /// The query uses the backend's native search syntax (e.g. Gmail's
    /// `from:alice@example.com newer_than:7d`). Expanding to whole threads
    /// lets callers see who replied, not just who matched.
    async fn search_thread_senders(&self, query: &str) -> Result<Vec<Address>>;

    /// Removes a message from the inbox without deleting it.
    async fn archive(&self, id: &MessageId) -> Result<()>;

    /// Moves a message to the trash.
    async fn trash(&self, id: &MessageId) -> Result<()>;

    /// Applies a label to a message, creating the label if needed.
    async fn add_label(&self, id: &MessageId, label: &str) -> Result<()>;

    /// Marks a message as triaged so later runs skip it.
    async fn mark_seen(&self, id: &MessageId) -> Result<()>;
}

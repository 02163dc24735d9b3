//! Notification channel trait definition.
//!
//! Batched announcements leave the system through a [`NotifyChannel`]. The
//! announcer composes a [`Digest`] and hands it off; everything about the
//! wire format belongs to the channel implementation.

use async_trait::async_trait;

/// Result type alias for notification operations.
pub type Result<T> = std::result::Result<T, NotifyError>;

/// Errors that can occur while delivering a notification.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// Transport-level failure.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The channel's API returned a non-success HTTP status.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body or error description.
        message: String,
    },

    /// The channel answered but reported a failure of its own.
    #[error("rejected by channel: {0}")]
    Rejected(String),

    /// Response body did not match the expected shape.
    #[error("invalid response format: {0}")]
    InvalidResponse(String),

    /// Authentication failed (bad or expired token).
    #[error("authentication failed: {0}")]
    Authentication(String),
}

/// One batched announcement: a machine-readable attachment plus a short
/// human-readable summary.
#[derive(Debug, Clone, PartialEq)]
pub struct Digest {
    /// Attachment file name (e.g. `blocked-senders.txt`).
    pub filename: String,
    /// Attachment content, one record per line.
    pub content: String,
    /// Summary text posted alongside the attachment.
    pub summary: String,
}

/// Outbound channel for batched announcements.
#[async_trait]
pub trait NotifyChannel: Send + Sync {
    /// Channel name for logging.
    fn name(&self) -> &str;

    /// Delivers one digest.
    ///
    /// Must only return `Ok` once the channel has accepted the full payload;
    /// callers use the result to decide whether entries count as announced.
    async fn send_digest(&self, digest: &Digest) -> Result<()>;
}

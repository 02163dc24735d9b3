//! Mail message domain types.
//!
//! Represents the slice of an inbound message the triage pipeline needs:
//! who sent it, what it says, and which thread it belongs to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{MessageId, ThreadId};

/// An email address with optional display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    /// Email address.
    pub email: String,
    /// Display name (e.g., "John Doe").
    pub name: Option<String>,
}

impl Address {
    /// Creates a new address with just an email.
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: None,
        }
    }

    /// Creates a new address with email and display name.
    pub fn with_name(email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: Some(name.into()),
        }
    }

    /// Returns the display representation of this address.
    ///
    /// If a name is present, returns "Name <email>", otherwise just the email.
    pub fn display(&self) -> String {
        match &self.name {
            Some(name) => format!("{} <{}>", name, self.email),
            None => self.email.clone(),
        }
    }

    /// Returns the domain part of the address, lowercased.
    ///
    /// Returns `None` when the address has no `@` or nothing after it.
    pub fn domain(&self) -> Option<String> {
        let (_, domain) = self.email.rsplit_once('@')?;
        let domain = domain.trim();
        if domain.is_empty() {
            None
        } else {
            Some(domain.to_lowercase())
        }
    }
}

/// An inbound mail message as seen by the triage pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailMessage {
    /// Unique identifier for this message.
    pub id: MessageId,
    /// Thread (conversation) this message belongs to.
    pub thread_id: ThreadId,
    /// Sender address.
    pub from: Address,
    /// Message subject line.
    pub subject: Option<String>,
    /// Short preview of the message content.
    pub snippet: String,
    /// Plain text body content.
    pub body_text: Option<String>,
    /// Date and time the message was received.
    pub received_at: DateTime<Utc>,
}

impl MailMessage {
    /// Returns the best available text for classification: the plain body
    /// when present, otherwise the provider snippet.
    pub fn classification_text(&self) -> &str {
        match &self.body_text {
            Some(body) if !body.is_empty() => body,
            _ => &self.snippet,
        }
    }

    /// Returns the subject, or an empty string when the message has none.
    pub fn subject_or_empty(&self) -> &str {
        self.subject.as_deref().unwrap_or("")
    }
}

//! Triage decision vocabulary.
//!
//! The classifier produces a [`Verdict`]; the triage pipeline turns it into
//! exactly one [`TriageAction`] per message and records an [`AuditRecord`]
//! describing what was done and why.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::MessageId;

/// Classification outcome for a single message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    /// What the classifier thinks the message is.
    pub label: VerdictLabel,
    /// Classifier confidence in the label, in `[0.0, 1.0]`.
    pub confidence: f32,
    /// One-line explanation of the call.
    pub reason: String,
}

impl Verdict {
    /// Creates a zero-confidence verdict used when classification could not
    /// produce a usable answer. The reason carries the diagnostic.
    pub fn fallback(label: VerdictLabel, reason: impl Into<String>) -> Self {
        Self {
            label,
            confidence: 0.0,
            reason: reason.into(),
        }
    }
}

/// The three labels a classification can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerdictLabel {
    /// Unsolicited outreach the user did not ask for.
    Spam,
    /// Wanted correspondence.
    Legitimate,
    /// The classifier could not decide.
    Uncertain,
}

impl VerdictLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerdictLabel::Spam => "spam",
            VerdictLabel::Legitimate => "legitimate",
            VerdictLabel::Uncertain => "uncertain",
        }
    }

    /// Parses a label, ignoring case and surrounding whitespace.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "spam" => Some(VerdictLabel::Spam),
            "legitimate" => Some(VerdictLabel::Legitimate),
            "uncertain" => Some(VerdictLabel::Uncertain),
            _ => None,
        }
    }
}

/// Which label a degraded classification falls back to.
///
/// `Uncertain` keeps the message in the inbox without asserting anything;
/// `Legitimate` is the more conservative reading of the same outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackVerdict {
    Uncertain,
    Legitimate,
}

impl FallbackVerdict {
    pub fn label(self) -> VerdictLabel {
        match self {
            FallbackVerdict::Uncertain => VerdictLabel::Uncertain,
            FallbackVerdict::Legitimate => VerdictLabel::Legitimate,
        }
    }
}

/// The single action taken for a processed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriageAction {
    /// Left alone because the thread already has a trusted participant.
    SkipRelatedThread,
    /// Removed because the sender is on the denylist past its grace period.
    BlockDenylisted,
    /// Removed because the classifier called it spam with high confidence.
    BlockByClassification,
    /// Sender released from the denylist during the grace period.
    UnblockGracePeriod,
    /// Left in the inbox.
    Keep,
}

impl TriageAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriageAction::SkipRelatedThread => "skip_related_thread",
            TriageAction::BlockDenylisted => "block_denylisted",
            TriageAction::BlockByClassification => "block_by_classification",
            TriageAction::UnblockGracePeriod => "unblock_grace_period",
            TriageAction::Keep => "keep",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "skip_related_thread" => Some(TriageAction::SkipRelatedThread),
            "block_denylisted" => Some(TriageAction::BlockDenylisted),
            "block_by_classification" => Some(TriageAction::BlockByClassification),
            "unblock_grace_period" => Some(TriageAction::UnblockGracePeriod),
            "keep" => Some(TriageAction::Keep),
            _ => None,
        }
    }

    /// Whether this action removed the message from the inbox.
    pub fn removed_message(&self) -> bool {
        matches!(
            self,
            TriageAction::BlockDenylisted | TriageAction::BlockByClassification
        )
    }
}

/// How blocked messages leave the inbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockStyle {
    /// Archive the message and apply the blocked label when one is configured.
    Archive,
    /// Move the message to trash.
    Trash,
}

/// One row of the append-only history of triage decisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// When the decision was made.
    pub timestamp: DateTime<Utc>,
    /// The message the decision applies to.
    pub message_id: MessageId,
    /// Sender address as seen on the message.
    pub sender: String,
    /// Message subject, empty when the message had none.
    pub subject: String,
    /// Label behind the decision.
    pub label: VerdictLabel,
    /// Action taken.
    pub action: TriageAction,
    /// One-line explanation of the decision.
    pub reason: String,
}

//! Application settings and configuration types.
//!
//! Settings are persisted to `~/.config/cull/settings.json` (or XDG equivalent)
//! and loaded at startup before each run.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::domain::{BlockStyle, FallbackVerdict};

/// Top-level application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Mailbox connection configuration.
    pub mailbox: MailboxSettings,
    /// Classifier backend configuration.
    pub classifier: ClassifierSettings,
    /// Triage decision configuration.
    pub triage: TriageSettings,
    /// Batch run configuration.
    pub runner: RunnerSettings,
    /// Notification channel configuration.
    pub notify: NotifySettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mailbox: MailboxSettings::default(),
            classifier: ClassifierSettings::default(),
            triage: TriageSettings::default(),
            runner: RunnerSettings::default(),
            notify: NotifySettings::default(),
        }
    }
}

/// Mailbox connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailboxSettings {
    /// Keychain identifier for the OAuth credential bundle.
    pub credentials_keychain_id: String,
    /// Label marking messages the engine has already reviewed.
    pub processed_label: String,
}

impl Default for MailboxSettings {
    fn default() -> Self {
        Self {
            credentials_keychain_id: "gmail".to_string(),
            processed_label: "cull/processed".to_string(),
        }
    }
}

/// Classifier backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierSettings {
    /// Model identifier.
    pub model: String,
    /// Keychain identifier for the API key.
    pub api_key_keychain_id: String,
    /// Custom API endpoint (for proxies or compatible APIs).
    pub base_url: Option<Url>,
    /// Total classification calls allowed per message, first try included.
    pub max_attempts: u32,
    /// Pause between retries of a transient failure.
    pub retry_cooldown_seconds: u64,
    /// HTTP statuses worth retrying.
    pub retryable_statuses: Vec<u16>,
    /// Cap on body characters sent to the backend.
    pub max_body_chars: usize,
    /// Label a degraded classification falls back to.
    pub fallback_label: FallbackVerdict,
    /// Pause before each classification call, spacing requests out
    /// across the run.
    pub classify_delay_ms: u64,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            model: "gemini-2.0-flash".to_string(),
            api_key_keychain_id: "gemini".to_string(),
            base_url: None,
            max_attempts: 3,
            retry_cooldown_seconds: 30,
            retryable_statuses: vec![429, 500, 503],
            max_body_chars: 4000,
            fallback_label: FallbackVerdict::Uncertain,
            classify_delay_ms: 1000,
        }
    }
}

/// Triage decision configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageSettings {
    /// Domains whose participation in a thread exempts it from triage.
    pub trusted_domains: Vec<String>,
    /// Days a new denylist entry stays reversible.
    pub grace_period_days: u32,
    /// Minimum confidence for a spam verdict to block.
    pub spam_threshold: f32,
    /// How blocked messages leave the inbox.
    pub block_style: BlockStyle,
    /// Label applied to blocked messages, when set.
    pub blocked_label: Option<String>,
    /// Label applied to low-confidence spam left in the inbox, when set.
    pub low_confidence_label: Option<String>,
}

impl Default for TriageSettings {
    fn default() -> Self {
        Self {
            trusted_domains: Vec::new(),
            grace_period_days: 7,
            spam_threshold: 0.8,
            block_style: BlockStyle::Archive,
            blocked_label: Some("cull/blocked".to_string()),
            low_confidence_label: None,
        }
    }
}

/// Batch run configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerSettings {
    /// Most messages a single run will pick up.
    pub max_messages_per_run: u32,
    /// Wall-clock budget for a run, in seconds.
    pub time_budget_seconds: u64,
    /// Whether runs re-check recent blocks for trusted replies.
    pub review_enabled: bool,
    /// How far back the review pass looks, in days.
    pub review_window_days: u32,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            max_messages_per_run: 25,
            time_budget_seconds: 240, // under a 5-minute scheduler slot
            review_enabled: true,
            review_window_days: 7,
        }
    }
}

/// Notification channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifySettings {
    /// Keychain identifier for the bot token.
    pub bot_token_keychain_id: String,
    /// Channel the digest is posted to.
    pub channel_id: String,
    /// Filename for the uploaded digest.
    pub digest_filename: String,
}

impl Default for NotifySettings {
    fn default() -> Self {
        Self {
            bot_token_keychain_id: "slack".to_string(),
            channel_id: String::new(),
            digest_filename: "blocked-senders.txt".to_string(),
        }
    }
}

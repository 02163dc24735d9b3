//! Per-message triage decision engine.
//!
//! [`TriageEngine`] is the state machine at the heart of the pipeline. For
//! each message it walks a fixed precedence:
//!
//! 1. Thread affinity: a trusted-domain participant in the conversation
//!    short-circuits everything, trusted correspondence is never re-judged
//! 2. Denylist: a settled block is enforced without spending a
//!    classification call; a block still in its grace period gets
//!    re-evaluated instead
//! 3. Classification: the retrying classifier produces a verdict, and the
//!    verdict plus denylist state picks the terminal action
//!
//! Every processed message ends with exactly one [`TriageAction`] and one
//! audit record. Storage and audit faults degrade with a warning; only
//! mailbox mutation failures propagate, so the caller can retry the message
//! on a later run.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    Address, AuditRecord, BlockStyle, EntrySource, MailMessage, MessageId, TriageAction, Verdict,
    VerdictLabel,
};
use crate::providers::mail::{Mailbox, Result};
use crate::services::classifier::RetryingClassifier;
use crate::services::denylist::{DenylistService, DenylistStore};

/// Errors from the audit log.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    /// Underlying storage failed.
    #[error("storage error: {0}")]
    Storage(String),
}

/// Append-only history of triage decisions.
///
/// Rows are never mutated or deleted; write order is processing order.
#[async_trait]
pub trait AuditLog: Send + Sync {
    /// Appends one record.
    async fn append(&self, record: &AuditRecord) -> std::result::Result<(), AuditError>;

    /// Returns the most recent records, newest first.
    async fn recent(&self, limit: u32) -> std::result::Result<Vec<AuditRecord>, AuditError>;
}

/// Settings for triage decisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageSettings {
    /// Domains whose participation in a thread marks it as wanted.
    pub trusted_domains: Vec<String>,
    /// Minimum confidence before a spam verdict blocks the sender.
    pub spam_threshold: f32,
    /// What blocking does to the message.
    pub block_style: BlockStyle,
    /// Label applied to archived blocks so they stay findable.
    pub blocked_label: Option<String>,
    /// Label applied to low-confidence spam kept in the inbox.
    pub low_confidence_label: Option<String>,
    /// Pause before each classification call, for the backend's
    /// per-minute quota. Retry backoff is separate and lives in the
    /// classifier.
    pub classify_delay: Duration,
}

impl Default for TriageSettings {
    fn default() -> Self {
        Self {
            trusted_domains: vec![],
            spam_threshold: 0.8,
            block_style: BlockStyle::Archive,
            blocked_label: Some("cull/blocked".to_string()),
            low_confidence_label: None,
            classify_delay: Duration::from_secs(1),
        }
    }
}

/// Outcome of triaging one message.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    /// The terminal action taken.
    pub action: TriageAction,
    /// The classification behind it, when one was made.
    pub verdict: Option<Verdict>,
}

/// The per-message decision state machine.
pub struct TriageEngine<S: DenylistStore> {
    mailbox: Arc<dyn Mailbox>,
    classifier: RetryingClassifier,
    denylist: Arc<DenylistService<S>>,
    audit: Arc<dyn AuditLog>,
    settings: TriageSettings,
}

impl<S: DenylistStore> TriageEngine<S> {
    /// Creates a new engine over its collaborators.
    pub fn new(
        mailbox: Arc<dyn Mailbox>,
        classifier: RetryingClassifier,
        denylist: Arc<DenylistService<S>>,
        audit: Arc<dyn AuditLog>,
        settings: TriageSettings,
    ) -> Self {
        Self {
            mailbox,
            classifier,
            denylist,
            audit,
            settings,
        }
    }

    /// Triages one message to a terminal decision.
    ///
    /// `now` is taken as a parameter so grace-period math is deterministic
    /// under test. Errors mean the message's mailbox mutation failed and the
    /// message should be retried on a later run.
    pub async fn triage(&self, message: &MailMessage, now: DateTime<Utc>) -> Result<Decision> {
        let sender = &message.from;

        // 1. Trusted correspondence is never re-judged.
        if self.thread_has_trusted_reply(message).await {
            let action = TriageAction::SkipRelatedThread;
            self.record(
                message,
                VerdictLabel::Legitimate,
                action,
                "thread has a trusted-domain participant",
                now,
            )
            .await;
            tracing::debug!(sender = %sender.email, "skipped message in trusted thread");
            return Ok(Decision {
                action,
                verdict: None,
            });
        }

        // 2. Denylist check.
        let lookup = self.denylist.lookup(&sender.email, now).await;
        if lookup.found() && !lookup.in_grace_period {
            if let Err(error) = self.denylist.touch_confirmed(&sender.email, now).await {
                tracing::warn!(
                    %error,
                    sender = %sender.email,
                    "could not refresh denylist confirmation"
                );
            }
            self.apply_block(&message.id).await?;

            let reason = match &lookup.entry {
                Some(entry) => format!("on denylist since {}", entry.added_at.format("%Y-%m-%d")),
                None => "on denylist".to_string(),
            };
            let action = TriageAction::BlockDenylisted;
            self.record(message, VerdictLabel::Spam, action, &reason, now)
                .await;
            tracing::info!(sender = %sender.email, "blocked denylisted sender");
            return Ok(Decision {
                action,
                verdict: None,
            });
        }
        let was_in_grace = lookup.found() && lookup.in_grace_period;

        // 3. Classification, paced for the backend's quota.
        if !self.settings.classify_delay.is_zero() {
            tokio::time::sleep(self.settings.classify_delay).await;
        }
        let verdict = self
            .classifier
            .classify(sender, message.subject_or_empty(), message.classification_text())
            .await;

        // 4. Verdict plus denylist state picks the terminal action.
        if verdict.label == VerdictLabel::Spam
            && verdict.confidence >= self.settings.spam_threshold
        {
            self.apply_block(&message.id).await?;
            if let Err(error) = self.denylist.add(&sender.email, EntrySource::Auto, now).await {
                tracing::warn!(%error, sender = %sender.email, "could not denylist sender");
            }

            let action = TriageAction::BlockByClassification;
            self.record(message, verdict.label, action, &verdict.reason, now)
                .await;
            tracing::info!(
                sender = %sender.email,
                confidence = verdict.confidence,
                "blocked sender by classification"
            );
            return Ok(Decision {
                action,
                verdict: Some(verdict),
            });
        }

        if verdict.label == VerdictLabel::Legitimate && was_in_grace {
            if let Err(error) = self.denylist.remove(&sender.email).await {
                tracing::warn!(
                    %error,
                    sender = %sender.email,
                    "could not remove sender from denylist"
                );
            }

            let action = TriageAction::UnblockGracePeriod;
            self.record(message, verdict.label, action, &verdict.reason, now)
                .await;
            tracing::info!(sender = %sender.email, "released sender during grace period");
            return Ok(Decision {
                action,
                verdict: Some(verdict),
            });
        }

        // Low-confidence spam and everything uncertain stays in the inbox.
        if verdict.label == VerdictLabel::Spam {
            if let Some(label) = &self.settings.low_confidence_label {
                if let Err(error) = self.mailbox.add_label(&message.id, label).await {
                    tracing::warn!(%error, message = %message.id, "could not apply review label");
                }
            }
        }
        let action = TriageAction::Keep;
        self.record(message, verdict.label, action, &verdict.reason, now)
            .await;
        Ok(Decision {
            action,
            verdict: Some(verdict),
        })
    }

    /// Whether the trusted-domain affinity signal is configured at all.
    pub fn affinity_enabled(&self) -> bool {
        !self.settings.trusted_domains.is_empty()
    }

    /// Whether any sender in the list, other than `exclude`, comes from a
    /// trusted domain. Also used by the review pass to vet searched threads.
    pub fn has_trusted_participant(&self, senders: &[Address], exclude: &str) -> bool {
        senders
            .iter()
            .filter(|addr| !addr.email.eq_ignore_ascii_case(exclude))
            .any(|addr| self.is_trusted(addr))
    }

    fn is_trusted(&self, address: &Address) -> bool {
        match address.domain() {
            Some(domain) => self
                .settings
                .trusted_domains
                .iter()
                .any(|trusted| trusted.eq_ignore_ascii_case(&domain)),
            None => false,
        }
    }

    /// Checks the message's own thread for a trusted participant. A thread
    /// fetch fault degrades to "no affinity" so the message still gets a
    /// decision.
    async fn thread_has_trusted_reply(&self, message: &MailMessage) -> bool {
        if self.settings.trusted_domains.is_empty() {
            return false;
        }

        let senders = match self.mailbox.thread_senders(&message.thread_id).await {
            Ok(senders) => senders,
            Err(error) => {
                tracing::warn!(
                    %error,
                    thread = %message.thread_id,
                    "could not inspect thread, skipping affinity check"
                );
                return false;
            }
        };

        self.has_trusted_participant(&senders, &message.from.email)
    }

    /// Removes a blocked message from the inbox according to the configured
    /// block style.
    async fn apply_block(&self, id: &MessageId) -> Result<()> {
        match self.settings.block_style {
            BlockStyle::Archive => {
                self.mailbox.archive(id).await?;
                if let Some(label) = &self.settings.blocked_label {
                    self.mailbox.add_label(id, label).await?;
                }
            }
            BlockStyle::Trash => self.mailbox.trash(id).await?,
        }
        Ok(())
    }

    async fn record(
        &self,
        message: &MailMessage,
        label: VerdictLabel,
        action: TriageAction,
        reason: &str,
        now: DateTime<Utc>,
    ) {
        let record = AuditRecord {
            timestamp: now,
            message_id: message.id.clone(),
            sender: message.from.email.clone(),
            subject: message.subject_or_empty().to_string(),
            label,
            action,
            reason: reason.to_string(),
        };
        if let Err(error) = self.audit.append(&record).await {
            tracing::warn!(%error, message = %message.id, "could not write audit record");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use chrono::Duration as ChronoDuration;

    use super::*;
    use crate::domain::{DenylistEntry, ThreadId};
    use crate::providers::ai::{
        BackendError, BackendResult, ClassifierBackend, ClassifyRequest, ClassifyResponse,
    };
    use crate::providers::mail::MailboxError;
    use crate::services::classifier::ClassifierSettings;
    use crate::services::denylist::DenylistResult;

    struct MockStorage {
        entries: Mutex<Vec<DenylistEntry>>,
    }

    impl MockStorage {
        fn new() -> Self {
            Self {
                entries: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl DenylistStore for MockStorage {
        async fn get(&self, address: &str) -> DenylistResult<Option<DenylistEntry>> {
            Ok(self
                .entries
                .lock()
                .unwrap()
                .iter()
                .find(|e| e.address == address)
                .cloned())
        }

        async fn upsert(&self, entry: &DenylistEntry) -> DenylistResult<()> {
            let mut entries = self.entries.lock().unwrap();
            if let Some(existing) = entries.iter_mut().find(|e| e.address == entry.address) {
                existing.last_confirmed_at = entry.last_confirmed_at;
            } else {
                entries.push(entry.clone());
            }
            Ok(())
        }

        async fn remove(&self, address: &str) -> DenylistResult<bool> {
            let mut entries = self.entries.lock().unwrap();
            let before = entries.len();
            entries.retain(|e| e.address != address);
            Ok(entries.len() < before)
        }

        async fn touch_confirmed(
            &self,
            address: &str,
            when: DateTime<Utc>,
        ) -> DenylistResult<bool> {
            let mut entries = self.entries.lock().unwrap();
            match entries.iter_mut().find(|e| e.address == address) {
                Some(entry) => {
                    entry.last_confirmed_at = when;
                    Ok(true)
                }
                None => Ok(false),
            }
        }

        async fn added_since(&self, since: DateTime<Utc>) -> DenylistResult<Vec<DenylistEntry>> {
            Ok(self
                .entries
                .lock()
                .unwrap()
                .iter()
                .filter(|e| e.added_at >= since)
                .cloned()
                .collect())
        }

        async fn unannounced(&self) -> DenylistResult<Vec<DenylistEntry>> {
            Ok(self
                .entries
                .lock()
                .unwrap()
                .iter()
                .filter(|e| !e.announced)
                .cloned()
                .collect())
        }

        async fn mark_announced(&self, addresses: &[String]) -> DenylistResult<usize> {
            let mut entries = self.entries.lock().unwrap();
            let mut changed = 0;
            for entry in entries.iter_mut() {
                if addresses.contains(&entry.address) && !entry.announced {
                    entry.announced = true;
                    changed += 1;
                }
            }
            Ok(changed)
        }

        async fn all(&self) -> DenylistResult<Vec<DenylistEntry>> {
            Ok(self.entries.lock().unwrap().clone())
        }
    }

    #[derive(Default)]
    struct FakeMailbox {
        thread_senders: Vec<Address>,
        thread_fault: bool,
        archived: Mutex<Vec<String>>,
        trashed: Mutex<Vec<String>>,
        labeled: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl Mailbox for FakeMailbox {
        async fn authenticate(&mut self) -> Result<()> {
            Ok(())
        }

        async fn list_unseen(&self, _limit: u32) -> Result<Vec<MessageId>> {
            Ok(vec![])
        }

        async fn fetch_message(&self, id: &MessageId) -> Result<MailMessage> {
            Err(MailboxError::NotFound(id.as_str().to_string()))
        }

        async fn thread_senders(&self, _thread_id: &ThreadId) -> Result<Vec<Address>> {
            if self.thread_fault {
                return Err(MailboxError::Internal("thread fetch failed".to_string()));
            }
            Ok(self.thread_senders.clone())
        }

        async fn search_thread_senders(&self, _query: &str) -> Result<Vec<Address>> {
            Ok(vec![])
        }

        async fn archive(&self, id: &MessageId) -> Result<()> {
            self.archived.lock().unwrap().push(id.as_str().to_string());
            Ok(())
        }

        async fn trash(&self, id: &MessageId) -> Result<()> {
            self.trashed.lock().unwrap().push(id.as_str().to_string());
            Ok(())
        }

        async fn add_label(&self, id: &MessageId, label: &str) -> Result<()> {
            self.labeled
                .lock()
                .unwrap()
                .push((id.as_str().to_string(), label.to_string()));
            Ok(())
        }

        async fn mark_seen(&self, _id: &MessageId) -> Result<()> {
            Ok(())
        }
    }

    struct ScriptedBackend {
        responses: Mutex<VecDeque<BackendResult<ClassifyResponse>>>,
        calls: AtomicU32,
    }

    impl ScriptedBackend {
        fn new(responses: Vec<BackendResult<ClassifyResponse>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ClassifierBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        fn model(&self) -> &str {
            "scripted-1"
        }

        async fn generate(&self, _request: &ClassifyRequest) -> BackendResult<ClassifyResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(BackendError::InvalidResponse("script exhausted".into())))
        }
    }

    #[derive(Default)]
    struct CountingAudit {
        records: Mutex<Vec<AuditRecord>>,
    }

    #[async_trait]
    impl AuditLog for CountingAudit {
        async fn append(&self, record: &AuditRecord) -> std::result::Result<(), AuditError> {
            self.records.lock().unwrap().push(record.clone());
            Ok(())
        }

        async fn recent(&self, limit: u32) -> std::result::Result<Vec<AuditRecord>, AuditError> {
            let records = self.records.lock().unwrap();
            Ok(records.iter().rev().take(limit as usize).cloned().collect())
        }
    }

    struct FailingAudit;

    #[async_trait]
    impl AuditLog for FailingAudit {
        async fn append(&self, _record: &AuditRecord) -> std::result::Result<(), AuditError> {
            Err(AuditError::Storage("disk on fire".to_string()))
        }

        async fn recent(&self, _limit: u32) -> std::result::Result<Vec<AuditRecord>, AuditError> {
            Err(AuditError::Storage("disk on fire".to_string()))
        }
    }

    struct Fixture {
        engine: TriageEngine<Arc<MockStorage>>,
        storage: Arc<MockStorage>,
        mailbox: Arc<FakeMailbox>,
        backend: Arc<ScriptedBackend>,
        audit: Arc<CountingAudit>,
    }

    fn fixture(settings: TriageSettings, responses: Vec<&str>, mailbox: FakeMailbox) -> Fixture {
        let storage = Arc::new(MockStorage::new());
        let mailbox = Arc::new(mailbox);
        let backend = Arc::new(ScriptedBackend::new(
            responses
                .into_iter()
                .map(|text| {
                    Ok(ClassifyResponse {
                        text: text.to_string(),
                    })
                })
                .collect(),
        ));
        let audit = Arc::new(CountingAudit::default());

        let classifier = RetryingClassifier::new(
            backend.clone(),
            ClassifierSettings {
                retry_cooldown: Duration::ZERO,
                ..ClassifierSettings::default()
            },
        );
        let denylist = Arc::new(DenylistService::new(storage.clone(), 7));
        let engine = TriageEngine::new(
            mailbox.clone(),
            classifier,
            denylist,
            audit.clone(),
            settings,
        );

        Fixture {
            engine,
            storage,
            mailbox,
            backend,
            audit,
        }
    }

    fn quick_settings() -> TriageSettings {
        TriageSettings {
            classify_delay: Duration::ZERO,
            ..TriageSettings::default()
        }
    }

    fn make_message(sender: &str) -> MailMessage {
        MailMessage {
            id: MessageId::from("m-1"),
            thread_id: ThreadId::from("t-1"),
            from: Address::new(sender),
            subject: Some("Grow your pipeline".to_string()),
            snippet: "We help companies like yours".to_string(),
            body_text: Some("We help companies like yours scale outbound.".to_string()),
            received_at: Utc::now(),
        }
    }

    fn spam(confidence: f32) -> String {
        format!(
            r#"{{"label": "spam", "confidence": {}, "reason": "cold outreach"}}"#,
            confidence
        )
    }

    fn legitimate(confidence: f32) -> String {
        format!(
            r#"{{"label": "legitimate", "confidence": {}, "reason": "wanted"}}"#,
            confidence
        )
    }

    async fn seed_entry(fixture: &Fixture, address: &str, added_at: DateTime<Utc>) {
        fixture
            .storage
            .upsert(&DenylistEntry::new(address, EntrySource::Auto, added_at))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn high_confidence_spam_blocks_and_denylists() {
        let spam_response = spam(0.92);
        let f = fixture(
            quick_settings(),
            vec![spam_response.as_str()],
            FakeMailbox::default(),
        );
        let now = Utc::now();

        let decision = f.engine.triage(&make_message("x@ads.example"), now).await.unwrap();

        assert_eq!(decision.action, TriageAction::BlockByClassification);
        assert_eq!(f.mailbox.archived.lock().unwrap().as_slice(), ["m-1"]);
        assert_eq!(
            f.mailbox.labeled.lock().unwrap().as_slice(),
            [("m-1".to_string(), "cull/blocked".to_string())]
        );

        let entry = f.storage.get("x@ads.example").await.unwrap().unwrap();
        assert_eq!(entry.source, EntrySource::Auto);
        assert!(!entry.announced);

        let records = f.audit.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].action, TriageAction::BlockByClassification);
        assert_eq!(records[0].sender, "x@ads.example");
    }

    #[tokio::test]
    async fn low_confidence_spam_keeps_message() {
        let spam_response = spam(0.5);
        let f = fixture(
            quick_settings(),
            vec![spam_response.as_str()],
            FakeMailbox::default(),
        );

        let decision = f
            .engine
            .triage(&make_message("maybe@ads.example"), Utc::now())
            .await
            .unwrap();

        assert_eq!(decision.action, TriageAction::Keep);
        assert!(f.mailbox.archived.lock().unwrap().is_empty());
        assert!(f.storage.all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn low_confidence_spam_gets_review_label_when_configured() {
        let spam_response = spam(0.5);
        let settings = TriageSettings {
            low_confidence_label: Some("cull/review".to_string()),
            ..quick_settings()
        };
        let f = fixture(settings, vec![spam_response.as_str()], FakeMailbox::default());

        f.engine
            .triage(&make_message("maybe@ads.example"), Utc::now())
            .await
            .unwrap();

        assert_eq!(
            f.mailbox.labeled.lock().unwrap().as_slice(),
            [("m-1".to_string(), "cull/review".to_string())]
        );
    }

    #[tokio::test]
    async fn legitimate_verdict_in_grace_period_unblocks() {
        let legit = legitimate(0.6);
        let f = fixture(quick_settings(), vec![legit.as_str()], FakeMailbox::default());
        let now = Utc::now();
        seed_entry(&f, "x@ads.example", now - ChronoDuration::days(2)).await;

        let decision = f.engine.triage(&make_message("x@ads.example"), now).await.unwrap();

        assert_eq!(decision.action, TriageAction::UnblockGracePeriod);
        assert!(f.storage.all().await.unwrap().is_empty(), "entry removed");
        assert!(f.mailbox.archived.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn legitimate_verdict_without_denylist_entry_keeps() {
        let legit = legitimate(0.9);
        let f = fixture(quick_settings(), vec![legit.as_str()], FakeMailbox::default());

        let decision = f
            .engine
            .triage(&make_message("friend@example.com"), Utc::now())
            .await
            .unwrap();

        assert_eq!(decision.action, TriageAction::Keep);
    }

    #[tokio::test]
    async fn denylisted_outside_grace_blocks_without_classifying() {
        let f = fixture(quick_settings(), vec![], FakeMailbox::default());
        let now = Utc::now();
        seed_entry(&f, "x@ads.example", now - ChronoDuration::days(30)).await;

        let decision = f.engine.triage(&make_message("x@ads.example"), now).await.unwrap();

        assert_eq!(decision.action, TriageAction::BlockDenylisted);
        assert!(decision.verdict.is_none());
        assert_eq!(f.backend.calls(), 0);
        assert_eq!(f.mailbox.archived.lock().unwrap().as_slice(), ["m-1"]);

        // Re-encounter advances the confirmation date.
        let entry = f.storage.get("x@ads.example").await.unwrap().unwrap();
        assert_eq!(entry.last_confirmed_at, now);

        let records = f.audit.records.lock().unwrap();
        assert!(records[0].reason.starts_with("on denylist since"));
    }

    #[tokio::test]
    async fn denylisted_inside_grace_is_reclassified() {
        let spam_response = spam(0.95);
        let f = fixture(
            quick_settings(),
            vec![spam_response.as_str()],
            FakeMailbox::default(),
        );
        let now = Utc::now();
        seed_entry(&f, "x@ads.example", now - ChronoDuration::days(2)).await;

        let decision = f.engine.triage(&make_message("x@ads.example"), now).await.unwrap();

        assert_eq!(decision.action, TriageAction::BlockByClassification);
        assert_eq!(f.backend.calls(), 1);
        // Still one entry; the re-add refreshed it instead of duplicating.
        assert_eq!(f.storage.all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn trusted_thread_short_circuits_everything() {
        let settings = TriageSettings {
            trusted_domains: vec!["corp.example".to_string()],
            ..quick_settings()
        };
        let mailbox = FakeMailbox {
            thread_senders: vec![
                Address::new("x@ads.example"),
                Address::new("me@corp.example"),
            ],
            ..FakeMailbox::default()
        };
        let f = fixture(settings, vec![], mailbox);
        let now = Utc::now();
        // Even a settled denylist entry loses to thread affinity.
        seed_entry(&f, "x@ads.example", now - ChronoDuration::days(30)).await;

        let decision = f.engine.triage(&make_message("x@ads.example"), now).await.unwrap();

        assert_eq!(decision.action, TriageAction::SkipRelatedThread);
        assert_eq!(f.backend.calls(), 0);
        assert!(f.mailbox.archived.lock().unwrap().is_empty());

        let records = f.audit.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].label, VerdictLabel::Legitimate);
    }

    #[tokio::test]
    async fn affinity_check_ignores_the_sender_itself() {
        let settings = TriageSettings {
            trusted_domains: vec!["corp.example".to_string()],
            ..quick_settings()
        };
        let legit = legitimate(0.9);
        // The only trusted-domain participant is the sender under triage.
        let mailbox = FakeMailbox {
            thread_senders: vec![Address::new("newcomer@corp.example")],
            ..FakeMailbox::default()
        };
        let f = fixture(settings, vec![legit.as_str()], mailbox);

        let decision = f
            .engine
            .triage(&make_message("newcomer@corp.example"), Utc::now())
            .await
            .unwrap();

        assert_eq!(decision.action, TriageAction::Keep);
        assert_eq!(f.backend.calls(), 1, "no short-circuit, classifier ran");
    }

    #[tokio::test]
    async fn thread_fault_degrades_to_classification() {
        let settings = TriageSettings {
            trusted_domains: vec!["corp.example".to_string()],
            ..quick_settings()
        };
        let legit = legitimate(0.8);
        let mailbox = FakeMailbox {
            thread_fault: true,
            ..FakeMailbox::default()
        };
        let f = fixture(settings, vec![legit.as_str()], mailbox);

        let decision = f
            .engine
            .triage(&make_message("anyone@example.com"), Utc::now())
            .await
            .unwrap();

        assert_eq!(decision.action, TriageAction::Keep);
        assert_eq!(f.backend.calls(), 1);
    }

    #[tokio::test]
    async fn trash_style_discards_instead_of_archiving() {
        let spam_response = spam(0.9);
        let settings = TriageSettings {
            block_style: BlockStyle::Trash,
            ..quick_settings()
        };
        let f = fixture(settings, vec![spam_response.as_str()], FakeMailbox::default());

        f.engine
            .triage(&make_message("x@ads.example"), Utc::now())
            .await
            .unwrap();

        assert_eq!(f.mailbox.trashed.lock().unwrap().as_slice(), ["m-1"]);
        assert!(f.mailbox.archived.lock().unwrap().is_empty());
        assert!(f.mailbox.labeled.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn uncertain_verdict_keeps_message() {
        let f = fixture(
            quick_settings(),
            vec![r#"{"label": "uncertain", "confidence": 0.4, "reason": "unclear"}"#],
            FakeMailbox::default(),
        );

        let decision = f
            .engine
            .triage(&make_message("odd@example.com"), Utc::now())
            .await
            .unwrap();

        assert_eq!(decision.action, TriageAction::Keep);
        assert!(f.storage.all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn audit_fault_does_not_change_the_decision() {
        let spam_response = spam(0.9);
        let storage = Arc::new(MockStorage::new());
        let mailbox = Arc::new(FakeMailbox::default());
        let backend = Arc::new(ScriptedBackend::new(vec![Ok(ClassifyResponse {
            text: spam_response,
        })]));
        let classifier = RetryingClassifier::new(
            backend.clone(),
            ClassifierSettings {
                retry_cooldown: Duration::ZERO,
                ..ClassifierSettings::default()
            },
        );
        let denylist = Arc::new(DenylistService::new(storage.clone(), 7));
        let engine = TriageEngine::new(
            mailbox.clone(),
            classifier,
            denylist,
            Arc::new(FailingAudit),
            quick_settings(),
        );

        let decision = engine
            .triage(&make_message("x@ads.example"), Utc::now())
            .await
            .unwrap();

        assert_eq!(decision.action, TriageAction::BlockByClassification);
        assert_eq!(mailbox.archived.lock().unwrap().as_slice(), ["m-1"]);
    }
}

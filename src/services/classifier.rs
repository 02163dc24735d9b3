//! Retrying classification wrapper.
//!
//! [`RetryingClassifier`] turns a fallible [`ClassifierBackend`] into a total
//! function: every call produces a [`Verdict`]. Transient backend failures
//! (a configurable status set, plus transport errors) are retried with a
//! fixed cooldown up to a bounded attempt count; unparseable or
//! non-retryable failures degrade to a configurable fallback verdict with
//! the diagnostic folded into the reason. A flaky upstream can worsen
//! decisions, never crash a run.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{Address, FallbackVerdict, Verdict, VerdictLabel};
use crate::providers::ai::{BackendError, ClassifierBackend, ClassifyRequest};

/// The decision policy sent with every classification request.
///
/// Kept deliberately static: changing it changes what the mailbox considers
/// spam, which should be a reviewed edit, not runtime configuration.
const RUBRIC: &str = "\
You are triaging inbound email for a single mailbox. Decide whether the \
message is unsolicited outreach (cold sales pitches, link-exchange and SEO \
offers, guest-post requests, recruiting blasts, bulk marketing) or wanted \
correspondence (replies, personal mail, transactional notices, anything the \
owner plausibly signed up for).

Respond with JSON only, no prose, in exactly this shape:
{\"label\": \"spam\" | \"legitimate\" | \"uncertain\", \"confidence\": <number 0.0-1.0>, \"reason\": \"<one short sentence>\"}

Be conservative: when a message could be wanted, answer \"legitimate\" or \
\"uncertain\" with lower confidence. Reserve high-confidence \"spam\" for \
clearly unsolicited commercial outreach from a stranger.";

/// Settings for classification behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierSettings {
    /// Total backend calls to attempt before giving up.
    pub max_attempts: u32,
    /// Fixed sleep between retryable failures.
    pub retry_cooldown: Duration,
    /// HTTP statuses worth retrying.
    pub retryable_statuses: Vec<u16>,
    /// Body truncation point, in characters.
    pub max_body_chars: usize,
    /// Label used when classification degrades.
    pub fallback_label: FallbackVerdict,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_cooldown: Duration::from_secs(30),
            retryable_statuses: vec![429, 500, 503],
            max_body_chars: 4000,
            fallback_label: FallbackVerdict::Uncertain,
        }
    }
}

/// Classification front end used by the triage engine.
pub struct RetryingClassifier {
    backend: Arc<dyn ClassifierBackend>,
    settings: ClassifierSettings,
}

impl RetryingClassifier {
    /// Creates a classifier over the given backend.
    pub fn new(backend: Arc<dyn ClassifierBackend>, settings: ClassifierSettings) -> Self {
        Self { backend, settings }
    }

    /// Classifies one message. Total: always returns a verdict.
    ///
    /// The fallback verdict carries `confidence = 0.0` and a diagnostic
    /// reason, so downstream thresholds treat degraded calls as
    /// low-confidence rather than as signal.
    pub async fn classify(&self, sender: &Address, subject: &str, body: &str) -> Verdict {
        let input = Self::build_input(sender, subject, body, self.settings.max_body_chars);
        let request = ClassifyRequest::new(RUBRIC, input);

        let mut last_error: Option<BackendError> = None;
        for attempt in 1..=self.settings.max_attempts {
            match self.backend.generate(&request).await {
                Ok(response) => {
                    return match Self::parse_verdict(&response.text) {
                        Ok(verdict) => verdict,
                        Err(detail) => {
                            tracing::warn!(%detail, "classifier returned an unparseable verdict");
                            self.fallback(format!("unparseable classifier response: {}", detail))
                        }
                    };
                }
                Err(error) if self.is_retryable(&error) => {
                    tracing::warn!(
                        attempt,
                        max_attempts = self.settings.max_attempts,
                        %error,
                        "classifier call failed, will retry"
                    );
                    last_error = Some(error);
                    if attempt < self.settings.max_attempts {
                        tokio::time::sleep(self.settings.retry_cooldown).await;
                    }
                }
                Err(error) => {
                    tracing::warn!(%error, "classifier call failed");
                    return self.fallback(format!("classifier request failed: {}", error));
                }
            }
        }

        let detail = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no response".to_string());
        self.fallback(format!(
            "classifier unavailable after {} attempts: {}",
            self.settings.max_attempts, detail
        ))
    }

    fn fallback(&self, reason: String) -> Verdict {
        Verdict::fallback(self.settings.fallback_label.label(), reason)
    }

    fn is_retryable(&self, error: &BackendError) -> bool {
        match error.status() {
            Some(status) => self.settings.retryable_statuses.contains(&status),
            // No status means the request never completed (timeout, DNS,
            // reset connection); treat as transient.
            None => matches!(error, BackendError::Http(_)),
        }
    }

    /// Builds the per-message context block, truncating the body so one huge
    /// newsletter cannot blow the prompt budget.
    fn build_input(sender: &Address, subject: &str, body: &str, max_chars: usize) -> String {
        let truncated: String = body.chars().take(max_chars).collect();
        format!(
            "From: {}\nSubject: {}\n\n{}",
            sender.display(),
            subject,
            truncated
        )
    }

    /// Parses and validates the backend's JSON answer.
    ///
    /// Accepts the current `label` field or the older boolean
    /// `is_legitimate` form. Confidence must be a number inside `[0, 1]`;
    /// out-of-range values are rejected, not clamped, since they indicate
    /// the model ignored the rubric.
    fn parse_verdict(text: &str) -> std::result::Result<Verdict, String> {
        let cleaned = Self::strip_code_fences(text);
        let value: serde_json::Value =
            serde_json::from_str(cleaned).map_err(|e| format!("not valid JSON: {}", e))?;

        let label = match value.get("label").and_then(|v| v.as_str()) {
            Some(raw) => {
                VerdictLabel::parse(raw).ok_or_else(|| format!("unknown label {:?}", raw))?
            }
            None => match value.get("is_legitimate").and_then(|v| v.as_bool()) {
                Some(true) => VerdictLabel::Legitimate,
                Some(false) => VerdictLabel::Spam,
                None => return Err("missing label".to_string()),
            },
        };

        let confidence = value
            .get("confidence")
            .and_then(|v| v.as_f64())
            .ok_or_else(|| "missing or non-numeric confidence".to_string())?;
        if !(0.0..=1.0).contains(&confidence) {
            return Err(format!("confidence {} outside [0, 1]", confidence));
        }

        let reason = value
            .get("reason")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        Ok(Verdict {
            label,
            confidence: confidence as f32,
            reason,
        })
    }

    /// Models wrap JSON in Markdown fences often enough that stripping them
    /// here is cheaper than fighting it in the prompt.
    fn strip_code_fences(text: &str) -> &str {
        let trimmed = text.trim();
        let opened = trimmed
            .strip_prefix("```json")
            .or_else(|| trimmed.strip_prefix("```"))
            .unwrap_or(trimmed);
        opened.strip_suffix("```").unwrap_or(opened).trim()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::providers::ai::{BackendResult, ClassifyResponse};

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

    fn text(json: &str) -> BackendResult<ClassifyResponse> {
        Ok(ClassifyResponse {
            text: json.to_string(),
        })
    }

    fn quick_settings() -> ClassifierSettings {
        ClassifierSettings {
            retry_cooldown: Duration::ZERO,
            ..ClassifierSettings::default()
        }
    }

    fn classifier(
        responses: Vec<BackendResult<ClassifyResponse>>,
    ) -> (RetryingClassifier, Arc<ScriptedBackend>) {
        let backend = Arc::new(ScriptedBackend::new(responses));
        let classifier = RetryingClassifier::new(backend.clone(), quick_settings());
        (classifier, backend)
    }

    fn sender() -> Address {
        Address::new("seller@outreach.example")
    }

    #[tokio::test]
    async fn classify_parses_clean_json() {
        let (classifier, backend) = classifier(vec![text(
            r#"{"label": "spam", "confidence": 0.92, "reason": "cold outreach"}"#,
        )]);

        let verdict = classifier.classify(&sender(), "Quick question", "Buy now").await;
        assert_eq!(verdict.label, VerdictLabel::Spam);
        assert!((verdict.confidence - 0.92).abs() < 1e-6);
        assert_eq!(verdict.reason, "cold outreach");
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn classify_strips_markdown_fences() {
        let (classifier, _) = classifier(vec![text(
            "```json\n{\"label\": \"legitimate\", \"confidence\": 0.7, \"reason\": \"reply\"}\n```",
        )]);

        let verdict = classifier.classify(&sender(), "Re: invoice", "Thanks!").await;
        assert_eq!(verdict.label, VerdictLabel::Legitimate);
    }

    #[tokio::test]
    async fn boolean_verdicts_still_parse() {
        let (classifier, _) =
            classifier(vec![text(r#"{"is_legitimate": false, "confidence": 0.85}"#)]);

        let verdict = classifier.classify(&sender(), "Hello", "Link exchange?").await;
        assert_eq!(verdict.label, VerdictLabel::Spam);
        assert!((verdict.confidence - 0.85).abs() < 1e-6);
    }

    #[tokio::test]
    async fn out_of_range_confidence_degrades() {
        let (classifier, _) = classifier(vec![text(
            r#"{"label": "spam", "confidence": 1.4, "reason": "sure"}"#,
        )]);

        let verdict = classifier.classify(&sender(), "Hi", "body").await;
        assert_eq!(verdict.label, VerdictLabel::Uncertain);
        assert_eq!(verdict.confidence, 0.0);
        assert!(verdict.reason.contains("outside [0, 1]"));
    }

    #[tokio::test]
    async fn non_numeric_confidence_degrades() {
        let (classifier, _) = classifier(vec![text(
            r#"{"label": "spam", "confidence": "high", "reason": "sure"}"#,
        )]);

        let verdict = classifier.classify(&sender(), "Hi", "body").await;
        assert_eq!(verdict.confidence, 0.0);
        assert!(verdict.reason.contains("non-numeric confidence"));
    }

    #[tokio::test]
    async fn missing_label_degrades() {
        let (classifier, _) = classifier(vec![text(r#"{"confidence": 0.5}"#)]);

        let verdict = classifier.classify(&sender(), "Hi", "body").await;
        assert_eq!(verdict.label, VerdictLabel::Uncertain);
        assert!(verdict.reason.contains("missing label"));
    }

    #[tokio::test]
    async fn retries_exactly_max_attempts_then_degrades() {
        let unavailable = || {
            Err(BackendError::Api {
                status: 503,
                message: "overloaded".to_string(),
            })
        };
        let (classifier, backend) = classifier(vec![unavailable(), unavailable(), unavailable()]);

        let verdict = classifier.classify(&sender(), "Hi", "body").await;
        assert_eq!(backend.calls(), 3);
        assert_eq!(verdict.label, VerdictLabel::Uncertain);
        assert_eq!(verdict.confidence, 0.0);
        assert!(verdict.reason.contains("after 3 attempts"));
        assert!(verdict.reason.contains("overloaded"));
    }

    #[tokio::test]
    async fn recovers_when_a_retry_succeeds() {
        let (classifier, backend) = classifier(vec![
            Err(BackendError::RateLimited {
                retry_after_secs: Some(1),
            }),
            text(r#"{"label": "legitimate", "confidence": 0.8, "reason": "known sender"}"#),
        ]);

        let verdict = classifier.classify(&sender(), "Hi", "body").await;
        assert_eq!(backend.calls(), 2);
        assert_eq!(verdict.label, VerdictLabel::Legitimate);
    }

    #[tokio::test]
    async fn authentication_errors_do_not_retry() {
        let (classifier, backend) = classifier(vec![Err(BackendError::Authentication(
            "bad key".to_string(),
        ))]);

        let verdict = classifier.classify(&sender(), "Hi", "body").await;
        assert_eq!(backend.calls(), 1);
        assert!(verdict.reason.contains("classifier request failed"));
    }

    #[tokio::test]
    async fn fallback_label_is_configurable() {
        let backend = Arc::new(ScriptedBackend::new(vec![Err(
            BackendError::InvalidResponse("garbage".to_string()),
        )]));
        let settings = ClassifierSettings {
            fallback_label: FallbackVerdict::Legitimate,
            retry_cooldown: Duration::ZERO,
            ..ClassifierSettings::default()
        };
        let classifier = RetryingClassifier::new(backend, settings);

        let verdict = classifier.classify(&sender(), "Hi", "body").await;
        assert_eq!(verdict.label, VerdictLabel::Legitimate);
    }

    #[test]
    fn build_input_truncates_body_by_characters() {
        let input = RetryingClassifier::build_input(&sender(), "Subject", "abcdefghij", 4);
        assert!(input.ends_with("abcd"));
        assert!(!input.contains("abcde"));
    }

    #[test]
    fn build_input_carries_sender_and_subject() {
        let from = Address::with_name("ada@example.com", "Ada");
        let input = RetryingClassifier::build_input(&from, "Engines", "body", 100);
        assert!(input.starts_with("From: Ada <ada@example.com>"));
        assert!(input.contains("Subject: Engines"));
        assert!(input.ends_with("body"));
    }

    #[test]
    fn strip_code_fences_handles_plain_text() {
        assert_eq!(RetryingClassifier::strip_code_fences(" {\"a\":1} "), "{\"a\":1}");
        assert_eq!(
            RetryingClassifier::strip_code_fences("```json\n{\"a\":1}\n```"),
            "{\"a\":1}"
        );
        assert_eq!(
            RetryingClassifier::strip_code_fences("```\n{\"a\":1}\n```"),
            "{\"a\":1}"
        );
    }
}

//! Gmail mailbox implementation.
//!
//! Uses the Gmail REST API v1 with OAuth2 refresh-token authentication.
//! Covers what triage needs and nothing more:
//! - listing untriaged inbox messages via a search query
//! - fetching full messages with MIME body extraction
//! - expanding threads to their sender addresses
//! - archive / trash / label mutations
//!
//! Labels are addressed by name in configuration but by opaque id on the
//! wire; a per-instance [`LabelCache`] bridges the two.

use std::num::NonZeroUsize;

use async_trait::async_trait;
use base64::prelude::*;
use chrono::{DateTime, Utc};
use lru::LruCache;
use reqwest::header;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::traits::{Mailbox, MailboxError, Result};
use crate::domain::{Address, MailMessage, MessageId, ThreadId};

const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Cap on search results when expanding a review query into threads. The
/// review pass only needs to know whether a conversation exists, not see
/// all of it.
const MAX_SEARCH_RESULTS: u32 = 10;

const LABEL_CACHE_SIZE: usize = 64;

/// OAuth2 credentials for the Gmail API, stored as JSON in the keychain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailCredentials {
    /// OAuth2 client ID.
    pub client_id: String,
    /// OAuth2 client secret.
    pub client_secret: String,
    /// Long-lived refresh token obtained from the consent flow.
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[allow(dead_code)]
    expires_in: Option<u64>,
    #[allow(dead_code)]
    token_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageListResponse {
    messages: Option<Vec<MessageRef>>,
    #[allow(dead_code)]
    result_size_estimate: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageRef {
    id: String,
    thread_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailMessage {
    id: String,
    thread_id: String,
    snippet: Option<String>,
    internal_date: Option<String>,
    payload: Option<GmailPayload>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailPayload {
    #[allow(dead_code)]
    mime_type: Option<String>,
    headers: Option<Vec<GmailHeader>>,
    body: Option<GmailBody>,
    parts: Option<Vec<GmailPart>>,
}

#[derive(Debug, Deserialize)]
struct GmailHeader {
    name: String,
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailPart {
    mime_type: Option<String>,
    body: Option<GmailBody>,
    parts: Option<Vec<GmailPart>>,
}

#[derive(Debug, Deserialize)]
struct GmailBody {
    data: Option<String>,
    #[allow(dead_code)]
    size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct GmailThread {
    #[allow(dead_code)]
    id: String,
    messages: Option<Vec<GmailMessage>>,
}

#[derive(Debug, Deserialize)]
struct GmailLabel {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct LabelsListResponse {
    labels: Option<Vec<GmailLabel>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ModifyRequest {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    add_label_ids: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    remove_label_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateLabelRequest {
    name: String,
    label_list_visibility: String,
    message_list_visibility: String,
}

/// Label name -> label id cache, scoped to one mailbox instance so no state
/// leaks across mailboxes or test runs.
struct LabelCache {
    names: Mutex<LruCache<String, String>>,
}

impl LabelCache {
    fn new() -> Self {
        let capacity = NonZeroUsize::new(LABEL_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN);
        Self {
            names: Mutex::new(LruCache::new(capacity)),
        }
    }

    async fn get(&self, name: &str) -> Option<String> {
        self.names.lock().await.get(name).cloned()
    }

    async fn put(&self, name: &str, id: &str) {
        self.names.lock().await.put(name.to_string(), id.to_string());
    }
}

/// Gmail implementation of the [`Mailbox`] trait for a single account.
pub struct GmailMailbox {
    client: reqwest::Client,
    credentials: MailCredentials,
    access_token: Option<String>,
    /// Label that marks a message as already triaged.
    processed_label: String,
    labels: LabelCache,
}

impl GmailMailbox {
    /// Creates a new Gmail mailbox from OAuth2 credentials.
    ///
    /// `processed_label` is the label name applied by
    /// [`mark_seen`](Mailbox::mark_seen) and excluded by
    /// [`list_unseen`](Mailbox::list_unseen).
    pub fn new(credentials: MailCredentials, processed_label: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            credentials,
            access_token: None,
            processed_label: processed_label.into(),
            labels: LabelCache::new(),
        }
    }

    /// Replaces the HTTP client (useful for custom timeouts or proxies).
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Exchanges the refresh token for a short-lived access token.
    async fn refresh_access_token(&mut self) -> Result<()> {
        let params = [
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("refresh_token", self.credentials.refresh_token.as_str()),
            ("grant_type", "refresh_token"),
        ];

        let response = self
            .client
            .post(GOOGLE_TOKEN_URL)
            .form(&params)
            .send()
            .await
            .map_err(|e| MailboxError::Connection(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(MailboxError::Authentication(format!(
                "token refresh failed ({}): {}",
                status, body
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| MailboxError::Authentication(format!("invalid token response: {}", e)))?;

        self.access_token = Some(token.access_token);
        Ok(())
    }

    /// Builds authorization headers for API requests.
    fn auth_headers(&self) -> Result<header::HeaderMap> {
        let token = self
            .access_token
            .as_ref()
            .ok_or_else(|| MailboxError::Authentication("not authenticated".to_string()))?;

        let mut headers = header::HeaderMap::new();
        let value = header::HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| MailboxError::Internal(e.to_string()))?;
        headers.insert(header::AUTHORIZATION, value);
        Ok(headers)
    }

    /// Performs a GET request against the Gmail API.
    ///
    /// Query parameters go through reqwest's encoder because Gmail search
    /// queries carry spaces and colons.
    async fn get<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = format!("{}{}", GMAIL_API_BASE, path);
        let response = self
            .client
            .get(&url)
            .headers(self.auth_headers()?)
            .query(query)
            .send()
            .await
            .map_err(|e| MailboxError::Connection(e.to_string()))?;

        Self::handle_response(response).await
    }

    /// Performs a POST request and parses the response body.
    async fn post<T, B>(&self, path: &str, body: &B) -> Result<T>
    where
        T: for<'de> Deserialize<'de>,
        B: Serialize,
    {
        let url = format!("{}{}", GMAIL_API_BASE, path);
        let response = self
            .client
            .post(&url)
            .headers(self.auth_headers()?)
            .json(body)
            .send()
            .await
            .map_err(|e| MailboxError::Connection(e.to_string()))?;

        Self::handle_response(response).await
    }

    /// Performs a POST request, discarding the response body.
    async fn post_no_response<B: Serialize>(&self, path: &str, body: &B) -> Result<()> {
        let url = format!("{}{}", GMAIL_API_BASE, path);
        let response = self
            .client
            .post(&url)
            .headers(self.auth_headers()?)
            .json(body)
            .send()
            .await
            .map_err(|e| MailboxError::Connection(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::handle_error(response).await)
        }
    }

    /// Performs a bodyless POST request (trash and friends).
    async fn post_empty(&self, path: &str) -> Result<()> {
        let url = format!("{}{}", GMAIL_API_BASE, path);
        let response = self
            .client
            .post(&url)
            .headers(self.auth_headers()?)
            .send()
            .await
            .map_err(|e| MailboxError::Connection(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::handle_error(response).await)
        }
    }

    async fn handle_response<T: for<'de> Deserialize<'de>>(response: reqwest::Response) -> Result<T> {
        if response.status().is_success() {
            response
                .json::<T>()
                .await
                .map_err(|e| MailboxError::Internal(format!("failed to parse response: {}", e)))
        } else {
            Err(Self::handle_error(response).await)
        }
    }

    async fn handle_error(response: reqwest::Response) -> MailboxError {
        let status = response.status();
        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let body = response.text().await.unwrap_or_default();

        match status.as_u16() {
            400 => MailboxError::InvalidRequest(body),
            401 => MailboxError::Authentication(body),
            404 => MailboxError::NotFound(body),
            429 => MailboxError::RateLimited {
                retry_after_secs: retry_after,
            },
            _ => MailboxError::Internal(format!("Gmail API error {}: {}", status, body)),
        }
    }

    /// Resolves a label name to its id, creating the label if it does not
    /// exist yet.
    async fn ensure_label(&self, name: &str) -> Result<String> {
        if let Some(id) = self.labels.get(name).await {
            return Ok(id);
        }

        let response: LabelsListResponse = self.get("/labels", &[]).await?;
        for label in response.labels.unwrap_or_default() {
            if label.name.eq_ignore_ascii_case(name) {
                self.labels.put(name, &label.id).await;
                return Ok(label.id);
            }
        }

        let request = CreateLabelRequest {
            name: name.to_string(),
            label_list_visibility: "labelShow".to_string(),
            message_list_visibility: "show".to_string(),
        };
        let created: GmailLabel = self.post("/labels", &request).await?;
        tracing::info!(label = %created.name, "created Gmail label");

        self.labels.put(name, &created.id).await;
        Ok(created.id)
    }

    /// Search query matching inbox messages not yet triaged.
    fn unseen_query(&self) -> String {
        format!("in:inbox -label:{}", self.processed_label)
    }

    /// Parses a `Name <email>` header value into an address.
    fn parse_address(value: &str) -> Address {
        if let Some(start) = value.find('<') {
            if let Some(end) = value.find('>') {
                if end > start {
                    let email = value[start + 1..end].trim().to_string();
                    let name = value[..start].trim().trim_matches('"').to_string();
                    if name.is_empty() {
                        return Address::new(email);
                    }
                    return Address::with_name(email, name);
                }
            }
        }
        Address::new(value.trim())
    }

    fn decode_body(body: &GmailBody) -> Option<String> {
        let data = body.data.as_ref()?;
        let decoded = BASE64_URL_SAFE_NO_PAD.decode(data).ok()?;
        String::from_utf8(decoded).ok()
    }

    /// Extracts readable body text, preferring `text/plain` over `text/html`.
    fn extract_body(payload: &GmailPayload) -> Option<String> {
        let mut text = None;
        let mut html = None;

        // Single-part messages carry the body directly on the payload.
        if let Some(body) = &payload.body {
            text = Self::decode_body(body);
        }

        if let Some(parts) = &payload.parts {
            Self::extract_body_from_parts(parts, &mut text, &mut html);
        }

        text.or(html)
    }

    /// Recursively walks multipart structure collecting the first plain and
    /// html bodies.
    fn extract_body_from_parts(
        parts: &[GmailPart],
        text: &mut Option<String>,
        html: &mut Option<String>,
    ) {
        for part in parts {
            let mime = part.mime_type.as_deref().unwrap_or("");

            if mime == "text/plain" && text.is_none() {
                if let Some(body) = &part.body {
                    *text = Self::decode_body(body);
                }
            } else if mime == "text/html" && html.is_none() {
                if let Some(body) = &part.body {
                    *html = Self::decode_body(body);
                }
            }

            if let Some(nested) = &part.parts {
                Self::extract_body_from_parts(nested, text, html);
            }
        }
    }

    /// Converts a Gmail wire message into the domain message type.
    fn to_mail_message(msg: &GmailMessage) -> MailMessage {
        let payload = msg.payload.as_ref();
        let headers = payload.and_then(|p| p.headers.as_ref());

        let get_header = |name: &str| -> Option<String> {
            headers.and_then(|h| {
                h.iter()
                    .find(|hdr| hdr.name.eq_ignore_ascii_case(name))
                    .map(|hdr| hdr.value.clone())
            })
        };

        let from = get_header("From")
            .map(|v| Self::parse_address(&v))
            .unwrap_or_else(|| Address::new("unknown@unknown.com"));

        let subject = get_header("Subject");

        let received_at = msg
            .internal_date
            .as_deref()
            .and_then(|d| d.parse::<i64>().ok())
            .and_then(DateTime::from_timestamp_millis)
            .unwrap_or_else(Utc::now);

        let body_text = payload.and_then(Self::extract_body);

        MailMessage {
            id: MessageId::from(msg.id.clone()),
            thread_id: ThreadId::from(msg.thread_id.clone()),
            from,
            subject,
            snippet: msg.snippet.clone().unwrap_or_default(),
            body_text,
            received_at,
        }
    }

    /// Pulls the `From` address out of every message in a thread.
    fn collect_senders(thread: &GmailThread) -> Vec<Address> {
        thread
            .messages
            .as_deref()
            .unwrap_or_default()
            .iter()
            .filter_map(|msg| {
                msg.payload
                    .as_ref()
                    .and_then(|p| p.headers.as_ref())
                    .and_then(|h| {
                        h.iter()
                            .find(|hdr| hdr.name.eq_ignore_ascii_case("From"))
                            .map(|hdr| Self::parse_address(&hdr.value))
                    })
            })
            .collect()
    }

    async fn fetch_thread_senders(&self, thread_id: &str) -> Result<Vec<Address>> {
        let thread: GmailThread = self
            .get(
                &format!("/threads/{}", thread_id),
                &[
                    ("format", "metadata".to_string()),
                    ("metadataHeaders", "From".to_string()),
                ],
            )
            .await?;
        Ok(Self::collect_senders(&thread))
    }

    async fn modify(&self, id: &MessageId, request: &ModifyRequest) -> Result<()> {
        self.post_no_response(&format!("/messages/{}/modify", id.as_str()), request)
            .await
    }
}

#[async_trait]
impl Mailbox for GmailMailbox {
    async fn authenticate(&mut self) -> Result<()> {
        self.refresh_access_token().await?;
        tracing::info!("Gmail mailbox authenticated");
        Ok(())
    }

    async fn list_unseen(&self, limit: u32) -> Result<Vec<MessageId>> {
        let response: MessageListResponse = self
            .get(
                "/messages",
                &[
                    ("q", self.unseen_query()),
                    ("maxResults", limit.to_string()),
                ],
            )
            .await?;

        let mut ids: Vec<MessageId> = response
            .messages
            .unwrap_or_default()
            .into_iter()
            .map(|m| MessageId::from(m.id))
            .collect();

        // Gmail lists newest first; triage oldest first so a budget stop
        // leaves the newest mail, not the backlog, for the next run.
        ids.reverse();

        tracing::debug!(count = ids.len(), "listed untriaged messages");
        Ok(ids)
    }

    async fn fetch_message(&self, id: &MessageId) -> Result<MailMessage> {
        let message: GmailMessage = self
            .get(
                &format!("/messages/{}", id.as_str()),
                &[("format", "full".to_string())],
            )
            .await?;
        Ok(Self::to_mail_message(&message))
    }

    async fn thread_senders(&self, thread_id: &ThreadId) -> Result<Vec<Address>> {
        self.fetch_thread_senders(thread_id.as_str()).await
    }

    async fn search_thread_senders(&self, query: &str) -> Result<Vec<Address>> {
        let response: MessageListResponse = self
            .get(
                "/messages",
                &[
                    ("q", query.to_string()),
                    ("maxResults", MAX_SEARCH_RESULTS.to_string()),
                ],
            )
            .await?;

        let mut thread_ids: Vec<String> = Vec::new();
        for message in response.messages.unwrap_or_default() {
            if let Some(thread_id) = message.thread_id {
                if !thread_ids.contains(&thread_id) {
                    thread_ids.push(thread_id);
                }
            }
        }

        let mut senders = Vec::new();
        for thread_id in thread_ids {
            senders.extend(self.fetch_thread_senders(&thread_id).await?);
        }
        Ok(senders)
    }

    async fn archive(&self, id: &MessageId) -> Result<()> {
        let request = ModifyRequest {
            add_label_ids: vec![],
            remove_label_ids: vec!["INBOX".to_string()],
        };
        self.modify(id, &request).await
    }

    async fn trash(&self, id: &MessageId) -> Result<()> {
        self.post_empty(&format!("/messages/{}/trash", id.as_str()))
            .await
    }

    async fn add_label(&self, id: &MessageId, label: &str) -> Result<()> {
        let label_id = self.ensure_label(label).await?;
        let request = ModifyRequest {
            add_label_ids: vec![label_id],
            remove_label_ids: vec![],
        };
        self.modify(id, &request).await
    }

    async fn mark_seen(&self, id: &MessageId) -> Result<()> {
        self.add_label(id, &self.processed_label).await
    }
}

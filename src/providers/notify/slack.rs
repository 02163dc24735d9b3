//! Slack notification channel implementation.
//!
//! Delivers digests through Slack's external upload flow:
//! 1. `files.getUploadURLExternal` reserves an upload slot
//! 2. the digest bytes are POSTed to the returned URL
//! 3. `files.completeUploadExternal` attaches the file to the channel with
//!    the summary as its initial comment
//!
//! Slack reports application errors inside a 200 response (`ok: false`), so
//! every step checks both the HTTP status and the envelope.

use async_trait::async_trait;
use reqwest::header;
use serde::{Deserialize, Serialize};

use super::traits::{Digest, NotifyChannel, NotifyError, Result};

const SLACK_API_BASE: &str = "https://slack.com/api";

#[derive(Debug, Deserialize)]
struct UploadUrlResponse {
    ok: bool,
    upload_url: Option<String>,
    file_id: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompleteUploadResponse {
    ok: bool,
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct CompleteUploadRequest {
    files: Vec<FileRef>,
    channel_id: String,
    initial_comment: String,
}

#[derive(Debug, Serialize)]
struct FileRef {
    id: String,
    title: String,
}

/// Slack implementation of [`NotifyChannel`] posting to a single channel.
pub struct SlackChannel {
    client: reqwest::Client,
    bot_token: String,
    channel_id: String,
}

impl SlackChannel {
    /// Creates a new Slack channel from a bot token and a channel ID.
    ///
    /// The bot needs the `files:write` scope and must be a member of the
    /// target channel.
    pub fn new(bot_token: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            bot_token: bot_token.into(),
            channel_id: channel_id.into(),
        }
    }

    /// Replaces the HTTP client (useful for custom timeouts or proxies).
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    fn auth_headers(&self) -> Result<header::HeaderMap> {
        let mut headers = header::HeaderMap::new();
        let value = header::HeaderValue::from_str(&format!("Bearer {}", self.bot_token))
            .map_err(|e| NotifyError::Authentication(e.to_string()))?;
        headers.insert(header::AUTHORIZATION, value);
        Ok(headers)
    }

    /// Step 1: reserve an upload slot for the digest file.
    async fn request_upload_slot(&self, filename: &str, length: usize) -> Result<(String, String)> {
        let params = [
            ("filename", filename.to_string()),
            ("length", length.to_string()),
        ];
        let response = self
            .client
            .post(format!("{}/files.getUploadURLExternal", SLACK_API_BASE))
            .headers(self.auth_headers()?)
            .form(&params)
            .send()
            .await?;
        let response = Self::check_status(response).await?;

        let body: UploadUrlResponse = response
            .json()
            .await
            .map_err(|e| NotifyError::InvalidResponse(e.to_string()))?;
        if !body.ok {
            return Err(NotifyError::Rejected(
                body.error.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }
        match (body.upload_url, body.file_id) {
            (Some(url), Some(id)) => Ok((url, id)),
            _ => Err(NotifyError::InvalidResponse(
                "upload slot response missing url or file id".to_string(),
            )),
        }
    }

    /// Step 2: push the raw bytes to the reserved slot.
    async fn upload_bytes(&self, upload_url: &str, content: &str) -> Result<()> {
        let response = self
            .client
            .post(upload_url)
            .body(content.to_string())
            .send()
            .await?;
        Self::check_status(response).await?;
        Ok(())
    }

    /// Step 3: attach the uploaded file to the channel.
    async fn complete_upload(&self, file_id: &str, digest: &Digest) -> Result<()> {
        let request = CompleteUploadRequest {
            files: vec![FileRef {
                id: file_id.to_string(),
                title: digest.filename.clone(),
            }],
            channel_id: self.channel_id.clone(),
            initial_comment: digest.summary.clone(),
        };
        let response = self
            .client
            .post(format!("{}/files.completeUploadExternal", SLACK_API_BASE))
            .headers(self.auth_headers()?)
            .json(&request)
            .send()
            .await?;
        let response = Self::check_status(response).await?;

        let body: CompleteUploadResponse = response
            .json()
            .await
            .map_err(|e| NotifyError::InvalidResponse(e.to_string()))?;
        if !body.ok {
            return Err(NotifyError::Rejected(
                body.error.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }
        Ok(())
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        if status.as_u16() == 401 {
            return Err(NotifyError::Authentication(message));
        }
        Err(NotifyError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl NotifyChannel for SlackChannel {
    fn name(&self) -> &str {
        "slack"
    }

    async fn send_digest(&self, digest: &Digest) -> Result<()> {
        let (upload_url, file_id) = self
            .request_upload_slot(&digest.filename, digest.content.len())
            .await?;
        self.upload_bytes(&upload_url, &digest.content).await?;
        self.complete_upload(&file_id, digest).await?;

        tracing::info!(
            channel = %self.channel_id,
            file = %digest.filename,
            "digest delivered"
        );
        Ok(())
    }
}

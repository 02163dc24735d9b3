//! Google Gemini API backend implementation.
//!
//! Uses the `generateContent` REST endpoint with JSON response mode so the
//! model is constrained to emit a machine-readable verdict.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use url::Url;

use super::traits::{
    BackendError, BackendResult, ClassifierBackend, ClassifyRequest, ClassifyResponse,
};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Gemini API request format.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    contents: Vec<GeminiContent>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: usize,
    response_mime_type: String,
}

/// Gemini API response format.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    #[allow(dead_code)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

/// Gemini API error response.
#[derive(Debug, Deserialize)]
struct GeminiError {
    error: GeminiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    #[allow(dead_code)]
    code: Option<u16>,
    message: String,
    #[allow(dead_code)]
    status: Option<String>,
}

/// Backend for Google's Gemini API.
pub struct GeminiBackend {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiBackend {
    /// Creates a new Gemini backend.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: GEMINI_API_BASE.to_string(),
        }
    }

    /// Creates a backend with Gemini 2.0 Flash (fast and cost-effective).
    pub fn flash(api_key: impl Into<String>) -> Self {
        Self::new(api_key, "gemini-2.0-flash")
    }

    /// Overrides the HTTP client.
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Overrides the API base URL, e.g. to route through a proxy.
    pub fn with_base_url(mut self, base_url: Url) -> Self {
        self.base_url = base_url.as_str().trim_end_matches('/').to_string();
        self
    }

    fn request_url(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }

    fn build_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-goog-api-key",
            HeaderValue::from_str(&self.api_key).unwrap_or_else(|_| HeaderValue::from_static("")),
        );
        headers
    }

    fn build_request(&self, request: &ClassifyRequest) -> GeminiRequest {
        GeminiRequest {
            system_instruction: Some(GeminiContent {
                role: None,
                parts: vec![GeminiPart {
                    text: request.instructions.clone(),
                }],
            }),
            contents: vec![GeminiContent {
                role: Some("user".to_string()),
                parts: vec![GeminiPart {
                    text: request.input.clone(),
                }],
            }],
            generation_config: GenerationConfig {
                // Deterministic output: the same message should classify the
                // same way across runs.
                temperature: 0.0,
                max_output_tokens: request.max_output_tokens,
                response_mime_type: "application/json".to_string(),
            },
        }
    }

    fn extract_text(response: GeminiResponse) -> BackendResult<String> {
        if let Some(feedback) = &response.prompt_feedback {
            if let Some(reason) = &feedback.block_reason {
                return Err(BackendError::InvalidResponse(format!(
                    "prompt blocked: {}",
                    reason
                )));
            }
        }

        let text = response
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .map(|p| p.text)
            .collect::<Vec<_>>()
            .join("");

        if text.is_empty() {
            return Err(BackendError::InvalidResponse(
                "response contained no text".to_string(),
            ));
        }

        Ok(text)
    }

    async fn handle_error_response(&self, response: reqwest::Response) -> BackendError {
        let status = response.status().as_u16();

        if status == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());

            return BackendError::RateLimited {
                retry_after_secs: retry_after,
            };
        }

        if let Ok(error) = response.json::<GeminiError>().await {
            if status == 401 || status == 403 {
                return BackendError::Authentication(error.error.message);
            }
            return BackendError::Api {
                status,
                message: error.error.message,
            };
        }

        BackendError::Api {
            status,
            message: format!("HTTP {}", status),
        }
    }
}

#[async_trait]
impl ClassifierBackend for GeminiBackend {
    fn name(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &ClassifyRequest) -> BackendResult<ClassifyResponse> {
        let body = self.build_request(request);

        let response = self
            .client
            .post(self.request_url())
            .headers(self.build_headers())
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(self.handle_error_response(response).await);
        }

        let api_response: GeminiResponse = response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(format!("Failed to parse response: {}", e)))?;

        let text = Self::extract_text(api_response)?;
        Ok(ClassifyResponse { text })
    }
}

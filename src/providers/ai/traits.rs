//! Classifier backend trait and supporting types.
//!
//! A backend turns an instruction + input pair into raw model text. Parsing
//! that text into a verdict, and deciding whether a failure is worth another
//! attempt, belongs to the caller.

use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur when calling a classifier backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),

    #[error("Rate limited, retry after {retry_after_secs:?} seconds")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Authentication failed: {0}")]
    Authentication(String),
}

impl BackendError {
    /// The HTTP status behind this error, when one exists.
    pub fn status(&self) -> Option<u16> {
        match self {
            BackendError::Api { status, .. } => Some(*status),
            BackendError::RateLimited { .. } => Some(429),
            BackendError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// A single classification request.
#[derive(Debug, Clone)]
pub struct ClassifyRequest {
    /// Standing instructions: the decision rubric and output contract.
    pub instructions: String,
    /// The material to classify.
    pub input: String,
    /// Cap on generated tokens.
    pub max_output_tokens: usize,
}

impl ClassifyRequest {
    pub fn new(instructions: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            instructions: instructions.into(),
            input: input.into(),
            max_output_tokens: 512,
        }
    }

    pub fn with_max_output_tokens(mut self, max_output_tokens: usize) -> Self {
        self.max_output_tokens = max_output_tokens;
        self
    }
}

/// Raw text produced by a backend.
#[derive(Debug, Clone)]
pub struct ClassifyResponse {
    pub text: String,
}

/// Interface for LLM classification backends.
#[async_trait]
pub trait ClassifierBackend: Send + Sync {
    /// Backend name (e.g., "gemini").
    fn name(&self) -> &str;

    /// Model identifier in use.
    fn model(&self) -> &str;

    /// Generates a response for the given request.
    async fn generate(&self, request: &ClassifyRequest) -> BackendResult<ClassifyResponse>;
}

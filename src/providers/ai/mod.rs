//! Classifier backend implementations.
//!
//! # Example
//!
//! ```rust,no_run
//! use cull::providers::ai::{ClassifierBackend, ClassifyRequest, GeminiBackend};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = GeminiBackend::flash("AIza...");
//!
//! let request = ClassifyRequest::new(
//!     "Classify the message as spam or legitimate.",
//!     "From: sales@example.com\nSubject: Quick sync?",
//! );
//!
//! let response = backend.generate(&request).await?;
//! println!("Raw verdict: {}", response.text);
//! # Ok(())
//! # }
//! ```

mod gemini;
mod traits;

pub use gemini::GeminiBackend;
pub use traits::{
    BackendError, BackendResult, ClassifierBackend, ClassifyRequest, ClassifyResponse,
};

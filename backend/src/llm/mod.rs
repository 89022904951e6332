//! Inference backend abstraction.
//!
//! The dispatcher only sees [`BackendClient`], which owns one
//! [`InferenceBackend`] and adds the timeout, cancellation and error mapping
//! around its single `invoke` call.

mod client;
mod ollama;

pub use client::BackendClient;
pub use ollama::OllamaBackend;

use async_trait::async_trait;
use chat_relay_common::ChatMessage;

/// Errors reported by an inference backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Backend error: {0}")]
    Backend(String),
}

/// An opaque inference provider: turns an ordered message list into generated text.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Short identifier used in logs (e.g. "ollama").
    fn name(&self) -> &'static str;

    /// Perform one chat inference. Implementations must not retry.
    async fn invoke(&self, messages: &[ChatMessage]) -> Result<String, BackendError>;
}

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;

use chat_relay_common::ChatMessage;

use super::InferenceBackend;
use crate::models::{ChatResult, FailureKind};

/// Owns the inference backend and wraps every call with a hard timeout and
/// uniform error mapping. Never retries.
pub struct BackendClient {
    backend: Arc<dyn InferenceBackend>,
    timeout: Duration,
    system_prompt: Option<String>,
}

impl BackendClient {
    pub fn new(backend: Arc<dyn InferenceBackend>, timeout: Duration) -> Self {
        Self {
            backend,
            timeout,
            system_prompt: None,
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: Option<String>) -> Self {
        self.system_prompt = system_prompt.filter(|p| !p.trim().is_empty());
        self
    }

    /// Configured per-call timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    fn messages_for(&self, content: &str) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(2);
        if let Some(ref prompt) = self.system_prompt {
            messages.push(ChatMessage::system(prompt.clone()));
        }
        messages.push(ChatMessage::user(content));
        messages
    }

    /// Invoke the backend once with `content` as the user message.
    pub async fn invoke(&self, content: &str, timeout: Duration) -> ChatResult {
        self.invoke_until(content, timeout, std::future::pending()).await
    }

    /// Like [`BackendClient::invoke`], but gives up with `Cancelled` as soon as
    /// `cancelled` completes. Giving up drops the backend future, which aborts
    /// the underlying HTTP call.
    pub async fn invoke_until<C>(&self, content: &str, timeout: Duration, cancelled: C) -> ChatResult
    where
        C: Future<Output = ()>,
    {
        let messages = self.messages_for(content);
        let call = AssertUnwindSafe(self.backend.invoke(&messages)).catch_unwind();

        tokio::select! {
            outcome = tokio::time::timeout(timeout, call) => match outcome {
                Ok(Ok(Ok(text))) => ChatResult::Success(text),
                Ok(Ok(Err(e))) => ChatResult::failure(FailureKind::BackendError, e.to_string()),
                Ok(Err(_panic)) => {
                    tracing::error!(backend = self.backend.name(), "Inference backend panicked");
                    ChatResult::failure(FailureKind::BackendError, "Inference backend panicked")
                }
                Err(_) => ChatResult::failure(
                    FailureKind::Timeout,
                    format!("Backend did not answer within {}s", timeout.as_secs_f64()),
                ),
            },
            _ = cancelled => ChatResult::failure(FailureKind::Cancelled, "Request cancelled by caller"),
        }
    }
}

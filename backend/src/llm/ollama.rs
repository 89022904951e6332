use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use chat_relay_common::ChatMessage;

use super::{BackendError, InferenceBackend};

/// Client for the Ollama chat API.
pub struct OllamaBackend {
    http_client: Client,
    base_url: String,
    model: String,
}

/// Ollama chat request format.
#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

/// Ollama chat response format.
///
/// Ollama reports failures as `{"error": "..."}`, sometimes with a 200 status.
#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    #[serde(default)]
    message: Option<OllamaResponseMessage>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OllamaResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OllamaBackend {
    pub fn new(base_url: &str, model: &str) -> Self {
        Self {
            http_client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl InferenceBackend for OllamaBackend {
    fn name(&self) -> &'static str {
        "ollama"
    }

    async fn invoke(&self, messages: &[ChatMessage]) -> Result<String, BackendError> {
        let request = OllamaChatRequest {
            model: &self.model,
            messages,
            stream: false,
        };

        let url = format!("{}/api/chat", self.base_url);

        tracing::debug!("Sending chat request to Ollama: {} model={}", url, self.model);

        let response = self
            .http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| BackendError::RequestFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Backend(format!("{}: {}", status, body)));
        }

        let ollama_response: OllamaChatResponse = response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;

        if let Some(error) = ollama_response.error {
            return Err(BackendError::Backend(error));
        }

        ollama_response
            .message
            .and_then(|m| m.content)
            .ok_or_else(|| BackendError::InvalidResponse("response has no message content".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_ollama_backend_url_normalization() {
        let backend = OllamaBackend::new("http://localhost:11434/", "llama2");
        assert_eq!(backend.base_url, "http://localhost:11434");
        assert_eq!(backend.model(), "llama2");
    }

    #[tokio::test]
    async fn test_invoke_returns_message_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(serde_json::json!({
                "model": "llama2",
                "stream": false,
                "messages": [{ "role": "user", "content": "hello" }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "llama2",
                "message": { "role": "assistant", "content": "hi there" },
                "done": true
            })))
            .expect(1)
            .mount(&server)
            .await;

        let backend = OllamaBackend::new(&server.uri(), "llama2");
        let text = backend.invoke(&[ChatMessage::user("hello")]).await.unwrap();
        assert_eq!(text, "hi there");
    }

    #[tokio::test]
    async fn test_invoke_maps_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(500).set_body_string("model exploded"))
            .mount(&server)
            .await;

        let backend = OllamaBackend::new(&server.uri(), "llama2");
        let err = backend.invoke(&[ChatMessage::user("hello")]).await.unwrap_err();
        assert!(matches!(err, BackendError::Backend(ref msg) if msg.contains("model exploded")));
    }

    #[tokio::test]
    async fn test_invoke_maps_reported_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "error": "model 'llama2' not found" })),
            )
            .mount(&server)
            .await;

        let backend = OllamaBackend::new(&server.uri(), "llama2");
        let err = backend.invoke(&[ChatMessage::user("hello")]).await.unwrap_err();
        assert!(matches!(err, BackendError::Backend(ref msg) if msg.contains("not found")));
    }

    #[tokio::test]
    async fn test_invoke_maps_malformed_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let backend = OllamaBackend::new(&server.uri(), "llama2");
        let err = backend.invoke(&[ChatMessage::user("hello")]).await.unwrap_err();
        assert!(matches!(err, BackendError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_invoke_connection_refused() {
        // Nothing listens on port 9 locally
        let backend = OllamaBackend::new("http://127.0.0.1:9", "llama2");
        let err = backend.invoke(&[ChatMessage::user("hello")]).await.unwrap_err();
        assert!(matches!(err, BackendError::RequestFailed(_)));
    }
}

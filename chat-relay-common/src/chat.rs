//! Chat wire types.

use serde::{Deserialize, Serialize};

/// A role-tagged message in the list sent to an inference backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }
}

/// Successful reply of the `/chat` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatReply {
    pub response: String,
}

/// Error reply of the `/chat` endpoint.
///
/// `error` is a coarse machine-readable code (`"queue_full"`, `"timeout"`, ...),
/// `message` is meant for humans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReply {
    pub error: String,
    pub message: String,
}

impl ErrorReply {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_role() {
        let msg = ChatMessage::user("Hello");
        assert_eq!(msg.role, "user");
        assert_eq!(msg.content, "Hello");
    }

    #[test]
    fn test_chat_message_serialization() {
        let json = serde_json::to_string(&ChatMessage::system("be brief")).unwrap();
        assert_eq!(json, r#"{"role":"system","content":"be brief"}"#);
    }

    #[test]
    fn test_chat_reply_shape() {
        let reply = ChatReply {
            response: "hi there".to_string(),
        };
        let value = serde_json::to_value(&reply).unwrap();
        assert_eq!(value, serde_json::json!({ "response": "hi there" }));
    }

    #[test]
    fn test_error_reply_shape() {
        let reply = ErrorReply::new("queue_full", "Dispatch queue is full");
        let value = serde_json::to_value(&reply).unwrap();
        assert_eq!(value["error"], "queue_full");
        assert_eq!(value["message"], "Dispatch queue is full");
    }

    #[test]
    fn test_error_reply_deserialize() {
        let json = r#"{"error": "timeout", "message": "Backend did not answer in 5s"}"#;
        let reply: ErrorReply = serde_json::from_str(json).unwrap();
        assert_eq!(reply.error, "timeout");
        assert!(reply.message.contains("5s"));
    }
}

//! Inbound request validation.

use serde_json::Value;

use crate::models::ChatRequest;

/// Field carrying the message text.
const CONTENT_FIELD: &str = "content";
/// Older clients send the text as `message`.
const LEGACY_CONTENT_FIELD: &str = "message";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Request must contain a text \"content\" field")]
    MissingField,
    #[error("Message is empty")]
    EmptyMessage,
    #[error("Message is {len} characters long, the limit is {max}")]
    TooLong { len: usize, max: usize },
}

impl ValidationError {
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::MissingField => "missing_field",
            ValidationError::EmptyMessage => "empty_message",
            ValidationError::TooLong { .. } => "too_long",
        }
    }
}

/// Turns raw JSON input into a [`ChatRequest`].
#[derive(Debug, Clone)]
pub struct Validator {
    max_chars: usize,
}

impl Validator {
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    /// Validate `raw` and assign the request a fresh id and timestamp.
    ///
    /// Content is trimmed; the trimmed text must be non-empty and at most
    /// `max_chars` characters.
    pub fn validate(&self, raw: &Value) -> Result<ChatRequest, ValidationError> {
        let fields = raw.as_object().ok_or(ValidationError::MissingField)?;
        let content = fields
            .get(CONTENT_FIELD)
            .or_else(|| fields.get(LEGACY_CONTENT_FIELD))
            .and_then(Value::as_str)
            .ok_or(ValidationError::MissingField)?;

        let content = content.trim();
        if content.is_empty() {
            return Err(ValidationError::EmptyMessage);
        }

        let len = content.chars().count();
        if len > self.max_chars {
            return Err(ValidationError::TooLong {
                len,
                max: self.max_chars,
            });
        }

        Ok(ChatRequest::new(content.to_string()))
    }
}

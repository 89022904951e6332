use chrono::{DateTime, Utc};
use serde::Serialize;

/// A validated chat request.
///
/// Only the validator creates these; fields are read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatRequest {
    id: String,
    content: String,
    submitted_at: DateTime<Utc>,
}

impl ChatRequest {
    pub(crate) fn new(content: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content,
            submitted_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }
}

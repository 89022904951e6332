use std::fmt;

/// Why a request ended without generated text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The backend did not answer within the configured timeout.
    Timeout,
    /// Connection failure, error status, malformed or error-reporting response.
    BackendError,
    /// The caller went away before a result was produced.
    Cancelled,
    /// The dispatcher shut down before the request was dispatched.
    Shutdown,
}

impl FailureKind {
    /// Machine-readable code surfaced to callers.
    pub fn code(&self) -> &'static str {
        match self {
            FailureKind::Timeout => "timeout",
            FailureKind::BackendError => "backend_error",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Outcome of one chat request. Produced exactly once per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatResult {
    Success(String),
    Failure { kind: FailureKind, message: String },
}

impl ChatResult {
    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        ChatResult::Failure {
            kind,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ChatResult::Success(_))
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            ChatResult::Success(_) => None,
            ChatResult::Failure { kind, .. } => Some(*kind),
        }
    }
}

//! HTTP-facing error type.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use chat_relay_common::ErrorReply;

use crate::dispatch::{RejectedError, ValidationError};
use crate::models::FailureKind;

/// Everything that can end a `/chat` call without a reply.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Malformed request body: {0}")]
    MalformedBody(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Rejected(#[from] RejectedError),

    #[error("{message}")]
    Failed { kind: FailureKind, message: String },
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MalformedBody(_) | ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Rejected(RejectedError::Duplicate(_)) => StatusCode::CONFLICT,
            ApiError::Rejected(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Failed { kind, .. } => match kind {
                FailureKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
                FailureKind::BackendError => StatusCode::BAD_GATEWAY,
                FailureKind::Cancelled | FailureKind::Shutdown => StatusCode::SERVICE_UNAVAILABLE,
            },
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::MalformedBody(_) => "malformed_body",
            ApiError::Validation(e) => e.code(),
            ApiError::Rejected(e) => e.code(),
            ApiError::Failed { kind, .. } => kind.code(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let retry_later = matches!(self, ApiError::Rejected(RejectedError::QueueFull { .. }));
        let body = Json(ErrorReply::new(self.code(), self.to_string()));

        let mut response = (status, body).into_response();
        if retry_later {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
        }
        response
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::from(ValidationError::EmptyMessage).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::MalformedBody("eof".to_string()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(RejectedError::QueueFull { capacity: 2 }).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::from(RejectedError::Duplicate("x".to_string())).status(),
            StatusCode::CONFLICT
        );
        let failed = |kind| ApiError::Failed {
            kind,
            message: String::new(),
        };
        assert_eq!(failed(FailureKind::Timeout).status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(failed(FailureKind::BackendError).status(), StatusCode::BAD_GATEWAY);
        assert_eq!(failed(FailureKind::Shutdown).status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_codes_follow_inner_errors() {
        assert_eq!(
            ApiError::from(ValidationError::TooLong { len: 9, max: 8 }).code(),
            "too_long"
        );
        assert_eq!(ApiError::from(RejectedError::ShuttingDown).code(), "shutting_down");
        let err = ApiError::Failed {
            kind: FailureKind::Timeout,
            message: "Backend did not answer within 5s".to_string(),
        };
        assert_eq!(err.code(), "timeout");
        assert_eq!(err.to_string(), "Backend did not answer within 5s");
    }

    #[test]
    fn test_queue_full_sets_retry_after() {
        let response = ApiError::from(RejectedError::QueueFull { capacity: 1 }).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "1");

        let response = ApiError::from(ValidationError::MissingField).into_response();
        assert!(response.headers().get(header::RETRY_AFTER).is_none());
    }
}

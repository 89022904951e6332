use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::HeaderValue;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::Value;

use chat_relay_common::ChatReply;

use crate::error::{ApiError, Result};
use crate::models::ChatResult;
use crate::AppState;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// POST /chat - relay one message to the backend and return its reply.
async fn chat(
    State(state): State<Arc<AppState>>,
    body: std::result::Result<Json<Value>, JsonRejection>,
) -> Result<Response> {
    let Json(raw) = body.map_err(|e| ApiError::MalformedBody(e.body_text()))?;
    let request = state.validator.validate(&raw)?;
    let request_id = request.id().to_string();

    let outcome = match state.dispatcher.submit(request) {
        // Dropping this future (client disconnect) drops the handle, which
        // cancels the request.
        Ok(handle) => match handle.wait().await {
            ChatResult::Success(response) => Ok(Json(ChatReply { response }).into_response()),
            ChatResult::Failure { kind, message } => Err(ApiError::Failed { kind, message }),
        },
        Err(rejected) => Err(ApiError::from(rejected)),
    };

    let mut response = outcome.unwrap_or_else(|e| e.into_response());
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    Ok(response)
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/chat", post(chat))
        .with_state(state)
}

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::dispatch::{CorrelationStats, DispatchStats};
use crate::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    model: String,
    dispatch: DispatchStats,
    outcomes: CorrelationStats,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        model: state.config.backend.model.clone(),
        dispatch: state.dispatcher.stats(),
        outcomes: state.dispatcher.correlation_stats(),
    })
}

async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    let version = env!("CARGO_PKG_VERSION");
    let dispatch = state.dispatcher.stats();
    let outcomes = state.dispatcher.correlation_stats();
    let body = format!(
        "# HELP chatrelay_info Service information\n\
         # TYPE chatrelay_info gauge\n\
         chatrelay_info{{version=\"{}\"}} 1\n\
         # HELP chatrelay_in_flight Backend calls currently running\n\
         # TYPE chatrelay_in_flight gauge\n\
         chatrelay_in_flight {}\n\
         # HELP chatrelay_queued Requests waiting for a worker\n\
         # TYPE chatrelay_queued gauge\n\
         chatrelay_queued {}\n\
         # HELP chatrelay_requests_total Requests by terminal outcome\n\
         # TYPE chatrelay_requests_total counter\n\
         chatrelay_requests_total{{outcome=\"succeeded\"}} {}\n\
         chatrelay_requests_total{{outcome=\"failed\"}} {}\n\
         chatrelay_requests_total{{outcome=\"cancelled\"}} {}\n\
         chatrelay_requests_total{{outcome=\"discarded\"}} {}\n\
         # HELP chatrelay_pending Requests awaiting a result\n\
         # TYPE chatrelay_pending gauge\n\
         chatrelay_pending {}\n",
        version,
        dispatch.in_flight,
        dispatch.queued,
        outcomes.succeeded,
        outcomes.failed,
        outcomes.cancelled,
        outcomes.discarded,
        outcomes.pending,
    );
    (StatusCode::OK, [(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body).into_response()
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(state)
}

//! API handlers.

use std::collections::HashMap;

use axum::{
    extract::{Query, State},
    http::header,
    response::IntoResponse,
    Json,
};
use serde::Serialize;

use crate::http::response::{ApiError, Message};
use crate::http::server::AppState;
use crate::observability::metrics;

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub count: i64,
    pub consumed: i64,
    pub uptime_secs: u64,
}

/// `GET /count`
pub async fn get_count(State(state): State<AppState>) -> Json<Message<i64>> {
    metrics::record_count_read();
    Json(Message::data(state.counter.get()))
}

/// `POST /count?count=<i64>`; a missing or empty value adds nothing.
pub async fn post_count(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Message<i64>>, ApiError> {
    let delta = match params.get("count").map(String::as_str) {
        None | Some("") => 0,
        Some(raw) => raw.parse::<i64>().map_err(|e| {
            tracing::debug!(count = %raw, error = %e, "Rejected count");
            ApiError::bad_request(e.to_string())
        })?,
    };

    metrics::record_count_added(delta);
    let value = state.counter.add(delta);
    tracing::debug!(delta, value, "Count updated");

    Ok(Json(Message::data(value)))
}

/// `GET /status`
pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        count: state.counter.get(),
        consumed: state.consumed.get(),
        uptime_secs: state.started.elapsed().as_secs(),
    })
}

/// `GET /health`
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy" }))
}

/// `GET /metrics` in Prometheus text format.
pub async fn scrape(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.telemetry.render(),
    )
}

//! Health check and metrics handlers

use axum::{
    extract::State,
    http::{header::CONTENT_TYPE, HeaderValue},
    response::{IntoResponse, Json, Response},
};
use serde_json::json;

use crate::{
    error::{ApiError, Result},
    state::AppState,
};

/// Simple liveness probe
pub async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": state.services.clock.now(),
    }))
}

/// Prometheus text exposition
pub async fn metrics(State(state): State<AppState>) -> Result<Response> {
    let handle = state
        .metrics
        .as_ref()
        .ok_or_else(|| ApiError::not_found("Metrics"))?;

    let mut response = handle.render().into_response();
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; version=0.0.4"),
    );
    Ok(response)
}

pub async fn not_found() -> ApiError {
    ApiError::not_found("Route")
}

//! Operator endpoints

use std::collections::BTreeMap;

use axum::{extract::State, response::Json};
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct RateLimitOverview {
    pub total: usize,
    pub buckets: BTreeMap<String, usize>,
}

/// GET /api/admin/rate-limits - live counter entries per bucket
pub async fn rate_limits(State(state): State<AppState>) -> Json<RateLimitOverview> {
    let limiter = &state.services.limiter;
    Json(RateLimitOverview {
        total: limiter.tracked_keys(),
        buckets: limiter.tracked_keys_by_bucket(),
    })
}

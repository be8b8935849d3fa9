//! Public routes that don't require authentication

use axum::{middleware, routing::get, Router};
use gatekeeper_security::{rate_limiting::API_BUCKET, RoutePolicy};

use crate::{
    handlers,
    middleware_layer::gate::{security_gate, RouteGuard},
    state::AppState,
};

/// Create public routes router
pub fn router(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::health::metrics))
        .route_layer(middleware::from_fn_with_state(
            RouteGuard::new(state.clone(), RoutePolicy::public(API_BUCKET)),
            security_gate,
        ))
}


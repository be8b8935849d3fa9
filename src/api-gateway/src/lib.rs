//! Gatekeeper API
//!
//! The axum front door: every route runs behind the security gate from
//! `gatekeeper-security` with the policy of its route group, followed by the auth,
//! user-management, admin, health and metrics handlers.

pub mod config;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod middleware_layer;
pub mod routes;
pub mod services;
pub mod state;

pub use config::{BootstrapConfig, Config, LogFormat, ObservabilityConfig, ServerConfig};
pub use error::{ApiError, Result};
pub use state::AppState;

use std::time::Duration;

use axum::{extract::DefaultBodyLimit, handler::Handler, middleware, Router};
use gatekeeper_security::{rate_limiting::API_BUCKET, RoutePolicy};
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::middleware_layer::gate::{security_gate, RouteGuard};

/// Build the main application router with all middleware and routes. Unmatched
/// paths still pass the gate under the public `api` policy.
pub fn build_router(state: AppState) -> Router {
    let timeout = Duration::from_secs(state.config.server.request_timeout_seconds);
    let body_limit = state.config.gate.payload.max_body_bytes;

    Router::new()
        .nest("/api", routes::api::router(&state))
        .merge(routes::public::router(&state))
        .fallback(handlers::health::not_found.layer(middleware::from_fn_with_state(
            RouteGuard::new(state.clone(), RoutePolicy::public(API_BUCKET)),
            security_gate,
        )))
        // The gate enforces the ceiling; extractors must not apply a lower one
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(timeout)),
        )
        .with_state(state)
}

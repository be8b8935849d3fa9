//! Authenticated API routes, grouped by the policy they run under

use axum::{
    middleware,
    routing::{delete, get, patch, post},
    Router,
};
use gatekeeper_security::rate_limiting::{API_BUCKET, AUTH_BUCKET, REGISTRATION_BUCKET};
use gatekeeper_security::rbac::permissions::MANAGE_USERS;
use gatekeeper_security::{Requirement, RoutePolicy};

use crate::{
    handlers,
    middleware_layer::gate::{security_gate, RouteGuard},
    state::AppState,
};

/// Wrap `routes` in the security gate with `policy`
fn guarded(state: &AppState, policy: RoutePolicy, routes: Router<AppState>) -> Router<AppState> {
    routes.route_layer(middleware::from_fn_with_state(
        RouteGuard::new(state.clone(), policy),
        security_gate,
    ))
}

/// Routes mounted under `/api`
pub fn router(state: &AppState) -> Router<AppState> {
    let register = guarded(
        state,
        RoutePolicy::public(REGISTRATION_BUCKET),
        Router::new().route("/auth/register", post(handlers::auth::register)),
    );

    let login = guarded(
        state,
        RoutePolicy::public(AUTH_BUCKET),
        Router::new().route("/auth/login", post(handlers::auth::login)),
    );

    let session = guarded(
        state,
        RoutePolicy::new(API_BUCKET, Requirement::Authenticated),
        Router::new()
            .route("/auth/logout", post(handlers::auth::logout))
            .route("/auth/me", get(handlers::auth::me)),
    );

    let users = guarded(
        state,
        RoutePolicy::new(API_BUCKET, Requirement::permission(MANAGE_USERS)),
        Router::new()
            .route("/users", get(handlers::users::list_users))
            .route("/users/:id/role", patch(handlers::users::update_role))
            .route("/users/:id", delete(handlers::users::delete_user)),
    );

    let admin = guarded(
        state,
        RoutePolicy::new(API_BUCKET, Requirement::SuperAdmin),
        Router::new().route("/admin/rate-limits", get(handlers::admin::rate_limits)),
    );

    Router::new()
        .merge(register)
        .merge(login)
        .merge(session)
        .merge(users)
        .merge(admin)
}

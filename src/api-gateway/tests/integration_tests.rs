//! Integration tests for the Gatekeeper API
//!
//! These drive the complete router with `oneshot`, so every request passes through
//! the security gate exactly as it would in production.

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    response::Response,
    Router,
};
use gatekeeper_api::services::directory::NewUser;
use gatekeeper_api::{build_router, AppState, Config};
use gatekeeper_security::{RateLimitBucket, Role};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::time::Duration;
use tower::ServiceExt;

const PASSWORD: &str = "Correct-Horse-Battery-9!";

struct TestApp {
    router: Router,
    state: AppState,
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.environment = "test".to_string();
    config.gate.jwt.secret = "integration-secret-key-for-testing-only".to_string();
    config.gate.payload.max_body_bytes = 16 * 1024;
    config.observability.metrics_enabled = false;
    config
}

fn create_app(config: Config) -> TestApp {
    let state = AppState::new(config.finalize().unwrap(), None).unwrap();
    TestApp {
        router: build_router(state.clone()),
        state,
    }
}

/// Insert an account directly and return its id with a bearer token
fn seed_user(app: &TestApp, email: &str, role: Role) -> (String, String) {
    let user = app
        .state
        .directory
        .create(NewUser {
            email: email.to_string(),
            name: email.to_string(),
            password_hash: app.state.passwords.hash(PASSWORD).unwrap(),
            role,
        })
        .unwrap();
    let token = app.state.services.tokens.issue(&user.id).unwrap().token;
    (user.id, token)
}

/// Test helper to make HTTP requests to the API
async fn send(
    app: &TestApp,
    method: Method,
    uri: &str,
    body: Option<Value>,
    headers: &[(&str, &str)],
) -> Response {
    let mut request_builder = Request::builder().method(method).uri(uri);
    for (key, value) in headers {
        request_builder = request_builder.header(*key, *value);
    }

    let request = match body {
        Some(body) => request_builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap(),
        None => request_builder.body(Body::empty()).unwrap(),
    };

    app.router.clone().oneshot(request).await.unwrap()
}

/// POST a raw body with an explicit content type
async fn post_raw(app: &TestApp, uri: &str, content_type: &str, body: &str) -> Response {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from(body.to_string()))
        .unwrap();
    app.router.clone().oneshot(request).await.unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    if bytes.is_empty() {
        json!({})
    } else {
        serde_json::from_slice(&bytes).unwrap()
    }
}

fn bearer(token: &str) -> String {
    format!("Bearer {}", token)
}

/// `name=value` part of a `Set-Cookie` header
fn session_cookie_pair(response: &Response) -> String {
    response.headers()[header::SET_COOKIE]
        .to_str()
        .unwrap()
        .split(';')
        .next()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn test_health_endpoint_carries_gate_headers() {
    let app = create_app(test_config());

    let response = send(&app, Method::GET, "/health", None, &[]).await;
    assert_eq!(response.status(), StatusCode::OK);

    let headers = response.headers();
    assert_eq!(headers["x-content-type-options"], "nosniff");
    assert_eq!(headers["x-frame-options"], "DENY");
    assert_eq!(headers["x-ratelimit-limit"], "1000");
    assert_eq!(headers["x-ratelimit-remaining"], "999");
    assert!(headers.contains_key("x-request-id"));
    assert!(!headers.contains_key("strict-transport-security"));

    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_unknown_path_passes_the_gate() {
    let app = create_app(test_config());

    let first = send(
        &app,
        Method::GET,
        "/wp-admin?q=1%20union%20select%20password",
        None,
        &[("origin", "http://localhost:4200")],
    )
    .await;
    assert_eq!(first.status(), StatusCode::NOT_FOUND);

    let headers = first.headers();
    assert!(headers.contains_key("x-request-id"));
    assert_eq!(headers["x-content-type-options"], "nosniff");
    assert_eq!(headers["cache-control"], "no-store, no-cache, must-revalidate, proxy-revalidate");
    assert_eq!(headers["access-control-allow-origin"], "http://localhost:4200");
    assert_eq!(headers["x-ratelimit-remaining"], "999");

    let body = json_body(first).await;
    assert_eq!(body["error"], "not_found");

    let second = send(&app, Method::GET, "/api/does-not-exist", None, &[]).await;
    assert_eq!(second.status(), StatusCode::NOT_FOUND);
    assert_eq!(second.headers()["x-ratelimit-remaining"], "998");
}

#[tokio::test]
async fn test_unknown_paths_are_rate_limited() {
    let mut config = test_config();
    config.gate.rate_limits.insert(
        "api".to_string(),
        RateLimitBucket::new(Duration::from_secs(60), 2),
    );
    let app = create_app(config);

    for _ in 0..2 {
        let response = send(&app, Method::GET, "/.env", None, &[]).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
    let response = send(&app, Method::GET, "/.env", None, &[]).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_malformed_bodies_use_the_error_format() {
    let app = create_app(test_config());

    let missing_field = post_raw(
        &app,
        "/api/auth/register",
        "application/json",
        r#"{"email":"a@b.co"}"#,
    )
    .await;
    let broken_json = post_raw(&app, "/api/auth/register", "application/json", "{not json").await;
    let wrong_type = post_raw(
        &app,
        "/api/auth/login",
        "text/plain",
        r#"{"email":"a@b.co","password":"x"}"#,
    )
    .await;

    for response in [missing_field, broken_json, wrong_type] {
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/json"
        );
        let body = json_body(response).await;
        assert_eq!(body["error"], "invalid_input");
        let message = body["message"].as_str().unwrap();
        assert!(!message.contains("deserialize"), "{}", message);
        assert!(!message.contains("missing field"), "{}", message);
    }
    assert!(app.state.directory.is_empty());
}

#[tokio::test]
async fn test_weak_password_is_rejected() {
    let app = create_app(test_config());

    for password in ["correct-horse-battery", "CORRECT-HORSE-9!", "Correct-Horse-Battery"] {
        let response = send(
            &app,
            Method::POST,
            "/api/auth/register",
            Some(json!({ "email": "weak@example.com", "password": password, "name": "Weak" })),
            &[],
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", password);
        assert_eq!(json_body(response).await["error"], "invalid_input");
    }
    assert!(app.state.directory.is_empty());
}

#[tokio::test]
async fn test_metrics_disabled_is_not_found() {
    let app = create_app(test_config());
    let response = send(&app, Method::GET, "/metrics", None, &[]).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_register_me_logout_flow() {
    let app = create_app(test_config());

    let response = send(
        &app,
        Method::POST,
        "/api/auth/register",
        Some(json!({ "email": "new@example.com", "password": PASSWORD, "name": "New User" })),
        &[],
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let cookie = session_cookie_pair(&response);
    assert!(cookie.starts_with("sessionId="));

    let body = json_body(response).await;
    assert_eq!(body["user"]["email"], "new@example.com");
    assert_eq!(body["user"]["role"], "CUSTOMER1");
    assert!(body["user"].get("passwordHash").is_none());
    let token = body["token"].as_str().unwrap().to_string();

    // Session cookie
    let response = send(&app, Method::GET, "/api/auth/me", None, &[("cookie", cookie.as_str())]).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key(header::SET_COOKIE));
    let me = json_body(response).await;
    assert_eq!(me["authChannel"], "session");
    assert_eq!(me["permissions"], json!(["view_own_data"]));

    // Bearer token
    let response = send(
        &app,
        Method::GET,
        "/api/auth/me",
        None,
        &[("authorization", bearer(&token).as_str())],
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["authChannel"], "bearer");

    // Logout clears the cookie and ends the session
    let response = send(&app, Method::POST, "/api/auth/logout", None, &[("cookie", cookie.as_str())]).await;
    assert_eq!(response.status(), StatusCode::OK);
    let cleared = response.headers()[header::SET_COOKIE].to_str().unwrap();
    assert!(cleared.starts_with("sessionId=;"));
    assert!(cleared.contains("Max-Age=0"));

    let response = send(&app, Method::GET, "/api/auth/me", None, &[("cookie", cookie.as_str())]).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_register_duplicate_and_invalid_input() {
    let app = create_app(test_config());
    seed_user(&app, "taken@example.com", Role::Customer1);

    let response = send(
        &app,
        Method::POST,
        "/api/auth/register",
        Some(json!({ "email": "Taken@Example.com", "password": PASSWORD, "name": "Dup" })),
        &[],
    )
    .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = send(
        &app,
        Method::POST,
        "/api/auth/register",
        Some(json!({ "email": "not-an-email", "password": PASSWORD, "name": "Bad" })),
        &[],
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "invalid_input");
}

#[tokio::test]
async fn test_login_failures_are_indistinguishable() {
    let app = create_app(test_config());
    seed_user(&app, "known@example.com", Role::Customer1);

    let wrong_password = send(
        &app,
        Method::POST,
        "/api/auth/login",
        Some(json!({ "email": "known@example.com", "password": "wrong-password" })),
        &[],
    )
    .await;
    let unknown_email = send(
        &app,
        Method::POST,
        "/api/auth/login",
        Some(json!({ "email": "nobody@example.com", "password": PASSWORD })),
        &[],
    )
    .await;

    assert_eq!(wrong_password.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(unknown_email.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(wrong_password).await, json_body(unknown_email).await);

    let ok = send(
        &app,
        Method::POST,
        "/api/auth/login",
        Some(json!({ "email": "known@example.com", "password": PASSWORD })),
        &[],
    )
    .await;
    assert_eq!(ok.status(), StatusCode::OK);
    assert!(session_cookie_pair(&ok).starts_with("sessionId="));
}

#[tokio::test]
async fn test_login_rate_limit() {
    let mut config = test_config();
    config.gate.rate_limits.insert(
        "auth".to_string(),
        RateLimitBucket::new(Duration::from_secs(900), 2),
    );
    let app = create_app(config);
    let attempt = json!({ "email": "nobody@example.com", "password": "whatever-password" });

    for _ in 0..2 {
        let response = send(&app, Method::POST, "/api/auth/login", Some(attempt.clone()), &[]).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    let response = send(&app, Method::POST, "/api/auth/login", Some(attempt), &[]).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()["x-ratelimit-remaining"], "0");
    let retry_after: u64 = response.headers()[header::RETRY_AFTER]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=900).contains(&retry_after));

    let body = json_body(response).await;
    assert_eq!(body["error"], "quota_exceeded");
    assert_eq!(body["retryAfter"], retry_after);

    // Other buckets are unaffected
    let response = send(&app, Method::GET, "/health", None, &[]).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_user_listing_requires_manage_users() {
    let app = create_app(test_config());
    let (_, customer) = seed_user(&app, "customer@example.com", Role::Customer1);
    let (_, admin) = seed_user(&app, "admin@example.com", Role::Admin);

    let response = send(&app, Method::GET, "/api/users", None, &[]).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = json_body(response).await;
    assert_eq!(body["error"], "unauthenticated");
    assert!(body["requestId"].is_string());

    let response = send(
        &app,
        Method::GET,
        "/api/users",
        None,
        &[("authorization", bearer(&customer).as_str())],
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = send(
        &app,
        Method::GET,
        "/api/users",
        None,
        &[("authorization", bearer(&admin).as_str())],
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let users = json_body(response).await;
    assert_eq!(users.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_super_admin_cannot_be_deleted() {
    let app = create_app(test_config());
    let (root_id, root) = seed_user(&app, "root@example.com", Role::SuperAdmin);
    let (_, admin) = seed_user(&app, "admin@example.com", Role::Admin);
    let (customer_id, _) = seed_user(&app, "customer@example.com", Role::Customer2);

    for token in [&admin, &root] {
        let response = send(
            &app,
            Method::DELETE,
            &format!("/api/users/{}", root_id),
            None,
            &[("authorization", bearer(token).as_str())],
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    let uri = format!("/api/users/{}", customer_id);
    let response = send(&app, Method::DELETE, &uri, None, &[("authorization", bearer(&admin).as_str())]).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = send(&app, Method::DELETE, &uri, None, &[("authorization", bearer(&admin).as_str())]).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_admin_cannot_delete_self() {
    let app = create_app(test_config());
    let (admin_id, admin) = seed_user(&app, "admin@example.com", Role::Admin);

    let response = send(
        &app,
        Method::DELETE,
        &format!("/api/users/{}", admin_id),
        None,
        &[("authorization", bearer(&admin).as_str())],
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_role_changes() {
    let app = create_app(test_config());
    let (_, root) = seed_user(&app, "root@example.com", Role::SuperAdmin);
    let (_, admin) = seed_user(&app, "admin@example.com", Role::Admin);
    let (customer_id, customer) = seed_user(&app, "customer@example.com", Role::Customer1);
    let uri = format!("/api/users/{}/role", customer_id);

    // Admins cannot hand out super admin
    let response = send(
        &app,
        Method::PATCH,
        &uri,
        Some(json!({ "role": "SUPER_ADMIN" })),
        &[("authorization", bearer(&admin).as_str())],
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = send(
        &app,
        Method::PATCH,
        &uri,
        Some(json!({ "role": "ROOT" })),
        &[("authorization", bearer(&root).as_str())],
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send(
        &app,
        Method::PATCH,
        "/api/users/missing/role",
        Some(json!({ "role": "ADMIN" })),
        &[("authorization", bearer(&root).as_str())],
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // A login session taken before the promotion is revoked by it
    let login = send(
        &app,
        Method::POST,
        "/api/auth/login",
        Some(json!({ "email": "customer@example.com", "password": PASSWORD })),
        &[],
    )
    .await;
    let cookie = session_cookie_pair(&login);

    let response = send(
        &app,
        Method::PATCH,
        &uri,
        Some(json!({ "role": "admin" })),
        &[("authorization", bearer(&admin).as_str())],
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["role"], "ADMIN");

    let response = send(&app, Method::GET, "/api/auth/me", None, &[("cookie", cookie.as_str())]).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Bearer tokens resolve the role on every request
    let response = send(
        &app,
        Method::GET,
        "/api/users",
        None,
        &[("authorization", bearer(&customer).as_str())],
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_session_identity_wins_over_token() {
    let app = create_app(test_config());
    seed_user(&app, "customer@example.com", Role::Customer1);
    let (_, admin) = seed_user(&app, "admin@example.com", Role::Admin);

    let login = send(
        &app,
        Method::POST,
        "/api/auth/login",
        Some(json!({ "email": "customer@example.com", "password": PASSWORD })),
        &[],
    )
    .await;
    let cookie = session_cookie_pair(&login);

    let response = send(
        &app,
        Method::GET,
        "/api/users",
        None,
        &[("cookie", cookie.as_str()), ("authorization", bearer(&admin).as_str())],
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_rate_limit_overview_is_super_admin_only() {
    let app = create_app(test_config());
    let (_, root) = seed_user(&app, "root@example.com", Role::SuperAdmin);
    let (_, admin) = seed_user(&app, "admin@example.com", Role::Admin);

    let response = send(
        &app,
        Method::GET,
        "/api/admin/rate-limits",
        None,
        &[("authorization", bearer(&admin).as_str())],
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = send(
        &app,
        Method::GET,
        "/api/admin/rate-limits",
        None,
        &[("authorization", bearer(&root).as_str())],
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["buckets"]["api"], 1);
    assert_eq!(body["total"], 1);
}

#[tokio::test]
async fn test_oversized_payload_is_rejected() {
    let app = create_app(test_config());
    let name = "x".repeat(32 * 1024);

    let response = send(
        &app,
        Method::POST,
        "/api/auth/register",
        Some(json!({ "email": "big@example.com", "password": PASSWORD, "name": name })),
        &[],
    )
    .await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(json_body(response).await["error"], "payload_too_large");
    assert!(app.state.directory.is_empty());
}

#[tokio::test]
async fn test_cors_preflight() {
    let app = create_app(test_config());

    let response = send(
        &app,
        Method::OPTIONS,
        "/api/users",
        None,
        &[
            ("origin", "http://localhost:4200"),
            ("access-control-request-method", "GET"),
        ],
    )
    .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(
        response.headers()["access-control-allow-origin"],
        "http://localhost:4200"
    );
    assert_eq!(response.headers()["access-control-allow-credentials"], "true");

    let response = send(
        &app,
        Method::GET,
        "/health",
        None,
        &[("origin", "https://evil.example")],
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(!response
        .headers()
        .contains_key("access-control-allow-origin"));
}

//! Authentication handlers for registration, login, logout and the caller's profile

use axum::{
    extract::{Extension, State},
    http::{header::SET_COOKIE, HeaderMap, HeaderValue, StatusCode},
    response::Json,
};
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use gatekeeper_security::session::{clear_session_cookie, session_cookie};
use gatekeeper_security::{Identity, Role};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use validator::{Validate, ValidationError};

use crate::{
    error::{ApiError, Result},
    extract::JsonBody,
    middleware_layer::gate::RequestContext,
    services::directory::{NewUser, UserProfile, UserRecord},
    state::AppState,
};

/// Same answer for an unknown email and a wrong password
const LOGIN_FAILED: &str = "Invalid email or password";

/// Registration request payload
#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(
        min = 8,
        max = 128,
        message = "Password must be between 8 and 128 characters"
    ))]
    #[validate(custom = "validate_password_strength")]
    pub password: String,

    #[validate(length(
        min = 1,
        max = 100,
        message = "Name must be between 1 and 100 characters"
    ))]
    pub name: String,
}

/// Login request payload
#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 1, max = 128, message = "Password is required"))]
    pub password: String,
}

/// Character classes a new password must contain
const PASSWORD_CLASSES: [(&str, &str, &str); 4] = [
    ("password_uppercase", r"[A-Z]", "Password must contain an uppercase letter"),
    ("password_lowercase", r"[a-z]", "Password must contain a lowercase letter"),
    ("password_digit", r"[0-9]", "Password must contain a digit"),
    (
        "password_special",
        r#"[!@#$%^&*(),.?":{}|<>]"#,
        "Password must contain a special character",
    ),
];

fn password_rules() -> &'static [(Regex, &'static str, &'static str)] {
    static RULES: OnceLock<Vec<(Regex, &'static str, &'static str)>> = OnceLock::new();
    RULES.get_or_init(|| {
        PASSWORD_CLASSES
            .iter()
            .filter_map(|(code, pattern, message)| {
                Regex::new(pattern).ok().map(|regex| (regex, *code, *message))
            })
            .collect()
    })
}

/// Reports the first missing character class
fn validate_password_strength(password: &str) -> std::result::Result<(), ValidationError> {
    match password_rules()
        .iter()
        .find(|(regex, _, _)| !regex.is_match(password))
    {
        Some((_, code, message)) => {
            let mut error = ValidationError::new(*code);
            error.message = Some((*message).into());
            Err(error)
        }
        None => Ok(()),
    }
}

/// Issued credentials plus the account they belong to
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: UserProfile,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeResponse {
    pub user: UserProfile,
    pub permissions: Vec<String>,
    pub auth_channel: Option<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// POST /api/auth/register
pub async fn register(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<RegisterRequest>,
) -> Result<(StatusCode, HeaderMap, Json<AuthResponse>)> {
    payload.validate()?;

    let password_hash = hash_password(&state, payload.password).await?;
    let user = state.directory.create(NewUser {
        email: payload.email,
        name: payload.name,
        password_hash,
        role: Role::Customer1,
    })?;

    info!(user_id = %user.id, "User registered");

    let (headers, body) = start_session(&state, &user).await?;
    Ok((StatusCode::CREATED, headers, Json(body)))
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<LoginRequest>,
) -> Result<(HeaderMap, Json<AuthResponse>)> {
    payload.validate()?;

    let user = state.directory.find_by_email(&payload.email);
    let verified = match &user {
        Some(user) => verify_password(&state, payload.password, user.password_hash.clone()).await?,
        None => {
            let passwords = state.passwords.clone();
            tokio::task::spawn_blocking(move || passwords.verify_absent(&payload.password))
                .await
                .map_err(|e| ApiError::internal(format!("Password task failed: {}", e)))?
        }
    };

    let user = match (user, verified) {
        (Some(user), true) => user,
        _ => {
            metrics::counter!("auth_failures_total", "channel" => "password").increment(1);
            warn!("Login failed");
            return Err(ApiError::unauthorized(LOGIN_FAILED));
        }
    };

    info!(user_id = %user.id, "User logged in");

    let (headers, body) = start_session(&state, &user).await?;
    Ok((headers, Json(body)))
}

/// POST /api/auth/logout
pub async fn logout(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<(HeaderMap, Json<MessageResponse>)> {
    let identity = ctx.require_identity()?;
    let session_config = &state.config.gate.session;

    // A cookie that resolved always authenticated the request, so any live session is here
    if let Some(session_id) = ctx.session_id() {
        state.services.sessions.destroy(session_id).await?;
    }

    info!(user_id = %identity.subject_id, "User logged out");

    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, cookie_header(&clear_session_cookie(session_config))?);

    Ok((
        headers,
        Json(MessageResponse {
            message: "Logged out".to_string(),
        }),
    ))
}

/// GET /api/auth/me
pub async fn me(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Json<MeResponse>> {
    let identity = ctx.require_identity()?;
    let user = state
        .directory
        .get(&identity.subject_id)
        .ok_or_else(|| ApiError::not_found("User"))?;

    let permissions = state
        .services
        .permissions
        .permissions(&identity.role)
        .into_iter()
        .map(str::to_string)
        .collect();

    Ok(Json(MeResponse {
        user: UserProfile::from(&user),
        permissions,
        auth_channel: ctx.auth_channel.as_ref().map(|channel| channel.name()),
    }))
}

/// Create a session and a bearer token for `user`
async fn start_session(state: &AppState, user: &UserRecord) -> Result<(HeaderMap, AuthResponse)> {
    let session = state
        .services
        .sessions
        .create(Identity::new(user.id.clone(), user.role.clone()))
        .await?;
    let issued = state.services.tokens.issue(&user.id)?;

    let mut headers = HeaderMap::new();
    headers.insert(
        SET_COOKIE,
        cookie_header(&session_cookie(&state.config.gate.session, &session.session_id))?,
    );

    Ok((
        headers,
        AuthResponse {
            token: issued.token,
            expires_at: issued.expires_at,
            user: UserProfile::from(user),
        },
    ))
}

fn cookie_header(cookie: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(cookie).map_err(|e| ApiError::internal(format!("Invalid cookie: {}", e)))
}

/// Argon2 is CPU-bound; keep it off the async workers
async fn hash_password(state: &AppState, password: String) -> Result<String> {
    let passwords = state.passwords.clone();
    let hash = tokio::task::spawn_blocking(move || passwords.hash(&password))
        .await
        .map_err(|e| ApiError::internal(format!("Password task failed: {}", e)))??;
    Ok(hash)
}

async fn verify_password(state: &AppState, password: String, hash: String) -> Result<bool> {
    let passwords = state.passwords.clone();
    let verified = tokio::task::spawn_blocking(move || passwords.verify(&password, &hash))
        .await
        .map_err(|e| ApiError::internal(format!("Password task failed: {}", e)))??;
    Ok(verified)
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;

    #[test]
    fn test_register_validation() {
        let valid = RegisterRequest {
            email: "new@example.com".to_string(),
            password: "Long-enough1!".to_string(),
            name: "New User".to_string(),
        };
        assert!(valid.validate().is_ok());

        let short_password = RegisterRequest {
            password: "short".to_string(),
            ..valid
        };
        assert!(short_password.validate().is_err());
    }

    #[test]
    fn test_register_rejects_overlong_fields() {
        let request = RegisterRequest {
            email: "new@example.com".to_string(),
            password: "p".repeat(129),
            name: "n".repeat(101),
        };
        let errors = request.validate().unwrap_err();
        let fields = errors.field_errors();

        assert!(fields.contains_key("password"));
        assert!(fields.contains_key("name"));
        assert!(!fields.contains_key("email"));
    }

    #[rstest]
    #[case("lowercase-only1!", "password_uppercase")]
    #[case("UPPERCASE-ONLY1!", "password_lowercase")]
    #[case("No-Digits-Here!", "password_digit")]
    #[case("NoSpecials123", "password_special")]
    fn test_password_strength_rejects_missing_class(#[case] password: &str, #[case] code: &str) {
        let error = validate_password_strength(password).unwrap_err();
        assert_eq!(error.code, code);
    }

    #[test]
    fn test_password_strength_accepts_all_classes() {
        assert!(validate_password_strength("Correct-Horse-9!").is_ok());
        assert_eq!(password_rules().len(), PASSWORD_CLASSES.len());
    }

    #[test]
    fn test_weak_password_fails_registration_validation() {
        let request = RegisterRequest {
            email: "new@example.com".to_string(),
            password: "correct-horse-battery".to_string(),
            name: "New User".to_string(),
        };
        let errors = request.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("password"));
    }
}

//! Error handling for the API Gateway
//!
//! Handler failures become JSON `{ "error", "message" }` bodies. Server-side faults
//! are logged in full and answered with a generic message.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use gatekeeper_security::SecurityError;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error};

pub type Result<T> = std::result::Result<T, ApiError>;

const INTERNAL_MESSAGE: &str = "Internal server error";

/// Main error type for the API Gateway
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Validation failed: {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    #[error("Resource not found: {resource}")]
    NotFound { resource: String },

    #[error("Resource conflict: {message}")]
    Conflict { message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Security(#[from] SecurityError),

    #[error("Internal server error: {message}")]
    Internal { message: String },
}

impl ApiError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation { .. } => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden { .. } => StatusCode::FORBIDDEN,
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Conflict { .. } => StatusCode::CONFLICT,
            ApiError::Security(e) => e.status_code(),
            ApiError::Config(_) | ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error type string for API responses
    pub fn error_type(&self) -> &'static str {
        match self {
            ApiError::Validation { .. } => "invalid_input",
            ApiError::Unauthorized { .. } => "unauthenticated",
            ApiError::Forbidden { .. } => "forbidden",
            ApiError::NotFound { .. } => "not_found",
            ApiError::Conflict { .. } => "conflict",
            ApiError::Security(e) => e.kind().slug(),
            ApiError::Config(_) | ApiError::Internal { .. } => "internal_error",
        }
    }

    /// Server-side faults; logged at error level and never shown to the client
    pub fn is_internal(&self) -> bool {
        self.status_code() == StatusCode::INTERNAL_SERVER_ERROR
    }

    fn public_message(&self) -> String {
        match self {
            ApiError::Validation { field, message } => format!("{}: {}", field, message),
            ApiError::Unauthorized { message }
            | ApiError::Forbidden { message }
            | ApiError::Conflict { message } => message.clone(),
            ApiError::NotFound { resource } => format!("{} not found", resource),
            ApiError::Security(e) => e.kind().public_message().to_string(),
            ApiError::Config(_) | ApiError::Internal { .. } => INTERNAL_MESSAGE.to_string(),
        }
    }
}

impl From<config::ConfigError> for ApiError {
    fn from(err: config::ConfigError) -> Self {
        ApiError::Config(err.to_string())
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        // Report the alphabetically first failing field so the message is stable
        let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
        fields.sort_by_key(|(field, _)| *field);

        match fields.first() {
            Some((field, failures)) => {
                let message = failures
                    .first()
                    .and_then(|failure| failure.message.as_ref())
                    .map(|message| message.to_string())
                    .unwrap_or_else(|| "is invalid".to_string());
                ApiError::validation(*field, message)
            }
            None => ApiError::validation("request", "is invalid"),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        // serde detail stays in the log
        debug!(error = %rejection.body_text(), "Rejected request body");

        let message = match rejection {
            JsonRejection::MissingJsonContentType(_) => "Expected Content-Type: application/json",
            JsonRejection::JsonSyntaxError(_) => "Malformed JSON",
            JsonRejection::JsonDataError(_) => "Missing or invalid fields",
            _ => "Unreadable request body",
        };
        ApiError::validation("body", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status_code = self.status_code();

        if self.is_internal() {
            error!(
                error = %self,
                status_code = %status_code,
                error_type = self.error_type(),
                "API error occurred"
            );
        }

        let body = json!({
            "error": self.error_type(),
            "message": self.public_message(),
        });

        (status_code, Json(body)).into_response()
    }
}

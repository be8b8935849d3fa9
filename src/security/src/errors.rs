//! Security Error Types and Handling
//!
//! Every failure the gate can produce is a [`SecurityError`]. Each variant maps to
//! exactly one [`ErrorKind`], and the kind alone decides the HTTP status and the
//! message a client is allowed to see.

use http::StatusCode;
use thiserror::Error;

/// Main security error type
#[derive(Error, Debug)]
pub enum SecurityError {
    // Authentication errors
    #[error("No credentials presented")]
    MissingCredentials,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Token expired")]
    TokenExpired,

    #[error("Token generation failed: {0}")]
    TokenGeneration(String),

    #[error("Session not found or expired")]
    SessionInvalid,

    #[error("Unknown subject: {0}")]
    UnknownSubject(String),

    #[error("Invalid credentials")]
    InvalidCredentials,

    // Authorization errors
    #[error("Insufficient permissions: required {required}, found {found}")]
    InsufficientPermissions { required: String, found: String },

    // Rate limiting errors
    #[error("Rate limit exceeded for bucket {bucket}")]
    RateLimitExceeded { bucket: String, retry_after_secs: u64 },

    #[error("Unknown rate limit bucket: {0}")]
    UnknownBucket(String),

    // Input errors
    #[error("Input validation failed: {field}: {message}")]
    InputValidation { field: String, message: String },

    #[error("Payload too large: max {max} bytes")]
    PayloadTooLarge { max: usize, actual: Option<u64> },

    // Collaborator and system errors
    #[error("Identity lookup failed: {0}")]
    IdentityLookup(String),

    #[error("Session store error: {0}")]
    SessionStore(String),

    #[error("Password hashing failed: {0}")]
    PasswordHashing(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for security operations
pub type SecurityResult<T> = Result<T, SecurityError>;

/// The externally visible error classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidInput,
    Unauthenticated,
    Forbidden,
    QuotaExceeded,
    PayloadTooLarge,
    Internal,
}

impl ErrorKind {
    pub fn status_code(self) -> StatusCode {
        match self {
            ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::QuotaExceeded => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable slug used in the `error` field of response bodies
    pub fn slug(self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Unauthenticated => "unauthenticated",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::QuotaExceeded => "quota_exceeded",
            ErrorKind::PayloadTooLarge => "payload_too_large",
            ErrorKind::Internal => "internal_error",
        }
    }

    /// The only message a client ever sees for this class.
    pub fn public_message(self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "Invalid request",
            ErrorKind::Unauthenticated => "Authentication required",
            ErrorKind::Forbidden => "Insufficient permissions",
            ErrorKind::QuotaExceeded => "Too many requests, please try again later",
            ErrorKind::PayloadTooLarge => "Request body too large",
            ErrorKind::Internal => "Internal server error",
        }
    }
}

impl SecurityError {
    /// Classify the error into its external class
    pub fn kind(&self) -> ErrorKind {
        match self {
            SecurityError::MissingCredentials
            | SecurityError::InvalidToken(_)
            | SecurityError::TokenExpired
            | SecurityError::SessionInvalid
            | SecurityError::UnknownSubject(_)
            | SecurityError::InvalidCredentials => ErrorKind::Unauthenticated,

            SecurityError::InsufficientPermissions { .. } => ErrorKind::Forbidden,

            SecurityError::RateLimitExceeded { .. } => ErrorKind::QuotaExceeded,

            SecurityError::InputValidation { .. } => ErrorKind::InvalidInput,

            SecurityError::PayloadTooLarge { .. } => ErrorKind::PayloadTooLarge,

            SecurityError::TokenGeneration(_)
            | SecurityError::UnknownBucket(_)
            | SecurityError::IdentityLookup(_)
            | SecurityError::SessionStore(_)
            | SecurityError::PasswordHashing(_)
            | SecurityError::Configuration(_)
            | SecurityError::Serialization(_)
            | SecurityError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        self.kind().status_code()
    }

    /// Whether the error is a server-side fault that needs to be logged at error level
    pub fn is_internal(&self) -> bool {
        self.kind() == ErrorKind::Internal
    }

    /// Get error code for log correlation
    pub fn error_code(&self) -> &'static str {
        match self {
            SecurityError::MissingCredentials => "SEC001",
            SecurityError::InvalidToken(_) => "SEC002",
            SecurityError::TokenExpired => "SEC003",
            SecurityError::TokenGeneration(_) => "SEC004",
            SecurityError::SessionInvalid => "SEC005",
            SecurityError::UnknownSubject(_) => "SEC006",
            SecurityError::InvalidCredentials => "SEC007",
            SecurityError::InsufficientPermissions { .. } => "SEC010",
            SecurityError::RateLimitExceeded { .. } => "SEC020",
            SecurityError::UnknownBucket(_) => "SEC021",
            SecurityError::InputValidation { .. } => "SEC030",
            SecurityError::PayloadTooLarge { .. } => "SEC031",
            SecurityError::IdentityLookup(_) => "SEC040",
            SecurityError::SessionStore(_) => "SEC041",
            SecurityError::PasswordHashing(_) => "SEC042",
            SecurityError::Configuration(_) => "SEC050",
            SecurityError::Serialization(_) => "SEC051",
            SecurityError::Internal(_) => "SEC099",
        }
    }
}

impl From<serde_json::Error> for SecurityError {
    fn from(err: serde_json::Error) -> Self {
        SecurityError::Serialization(err.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for SecurityError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => SecurityError::TokenExpired,
            jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                SecurityError::InvalidToken("signature mismatch".to_string())
            }
            _ => SecurityError::InvalidToken(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(SecurityError::MissingCredentials, StatusCode::UNAUTHORIZED)]
    #[case(SecurityError::TokenExpired, StatusCode::UNAUTHORIZED)]
    #[case(SecurityError::InvalidToken("bad".into()), StatusCode::UNAUTHORIZED)]
    #[case(SecurityError::SessionInvalid, StatusCode::UNAUTHORIZED)]
    #[case(
        SecurityError::InsufficientPermissions { required: "manage_users".into(), found: "CUSTOMER1".into() },
        StatusCode::FORBIDDEN
    )]
    #[case(
        SecurityError::RateLimitExceeded { bucket: "auth".into(), retry_after_secs: 3 },
        StatusCode::TOO_MANY_REQUESTS
    )]
    #[case(
        SecurityError::PayloadTooLarge { max: 10, actual: Some(11) },
        StatusCode::PAYLOAD_TOO_LARGE
    )]
    #[case(
        SecurityError::InputValidation { field: "email".into(), message: "bad".into() },
        StatusCode::BAD_REQUEST
    )]
    #[case(SecurityError::IdentityLookup("db down".into()), StatusCode::INTERNAL_SERVER_ERROR)]
    fn test_status_codes(#[case] error: SecurityError, #[case] expected: StatusCode) {
        assert_eq!(error.status_code(), expected);
    }

    #[test]
    fn test_authentication_failures_share_public_message() {
        let messages: Vec<&str> = [
            SecurityError::MissingCredentials,
            SecurityError::TokenExpired,
            SecurityError::InvalidToken("malformed".into()),
            SecurityError::UnknownSubject("42".into()),
        ]
        .iter()
        .map(|e| e.kind().public_message())
        .collect();

        assert!(messages.iter().all(|m| *m == "Authentication required"));
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(SecurityError::InvalidCredentials.error_code(), "SEC007");
        assert_eq!(
            SecurityError::RateLimitExceeded {
                bucket: "api".into(),
                retry_after_secs: 1
            }
            .error_code(),
            "SEC020"
        );
    }

    #[test]
    fn test_jwt_error_conversion() {
        let expired: SecurityError =
            jsonwebtoken::errors::Error::from(jsonwebtoken::errors::ErrorKind::ExpiredSignature)
                .into();
        assert!(matches!(expired, SecurityError::TokenExpired));

        let forged: SecurityError =
            jsonwebtoken::errors::Error::from(jsonwebtoken::errors::ErrorKind::InvalidSignature)
                .into();
        assert!(matches!(forged, SecurityError::InvalidToken(_)));
    }
}

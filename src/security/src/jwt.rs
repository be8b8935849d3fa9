//! Bearer token issuing and verification.
//!
//! Tokens carry the subject and expiry only. The role is never read from a token; it
//! is resolved through [`crate::identity::IdentityLookup`] on every request.

use crate::clock::Clock;
use crate::config::JwtConfig;
use crate::errors::{SecurityError, SecurityResult};
use chrono::{DateTime, Utc};
use http::header::AUTHORIZATION;
use http::HeaderMap;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

/// Claims carried by an access token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject (user ID)
    pub sub: String,
    /// Issuer
    pub iss: String,
    /// Issued at (UTC timestamp)
    pub iat: i64,
    /// Expiration time (UTC timestamp)
    pub exp: i64,
    /// Token ID
    pub jti: String,
}

/// A freshly signed token
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

pub struct TokenVerifier {
    issuer: String,
    ttl: chrono::Duration,
    algorithm: Algorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenVerifier")
            .field("issuer", &self.issuer)
            .field("ttl", &self.ttl)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl TokenVerifier {
    pub fn new(config: &JwtConfig, clock: Arc<dyn Clock>) -> SecurityResult<Self> {
        if config.secret.len() < 32 {
            return Err(SecurityError::Configuration(
                "JWT secret must be at least 32 characters".to_string(),
            ));
        }

        let algorithm = Algorithm::from_str(&config.algorithm).map_err(|_| {
            SecurityError::Configuration(format!("Unknown JWT algorithm '{}'", config.algorithm))
        })?;
        if !matches!(algorithm, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
            return Err(SecurityError::Configuration(format!(
                "JWT algorithm '{}' needs a key pair; only HMAC is supported",
                config.algorithm
            )));
        }

        let ttl = chrono::Duration::from_std(config.token_ttl)
            .map_err(|e| SecurityError::Configuration(format!("Token TTL out of range: {}", e)))?;

        let secret_bytes = config.secret.as_bytes();
        Ok(Self {
            issuer: config.issuer.clone(),
            ttl,
            algorithm,
            encoding_key: EncodingKey::from_secret(secret_bytes),
            decoding_key: DecodingKey::from_secret(secret_bytes),
            clock,
        })
    }

    /// Sign a token for `subject_id`, valid for the configured lifetime
    pub fn issue(&self, subject_id: &str) -> SecurityResult<IssuedToken> {
        let now = self.clock.now();
        let expires_at = now + self.ttl;
        let claims = TokenClaims {
            sub: subject_id.to_string(),
            iss: self.issuer.clone(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        let token = encode(&Header::new(self.algorithm), &claims, &self.encoding_key)
            .map_err(|e| SecurityError::TokenGeneration(e.to_string()))?;

        Ok(IssuedToken { token, expires_at })
    }

    /// Check signature, issuer and expiry and return the claims
    pub fn verify(&self, token: &str) -> SecurityResult<TokenClaims> {
        let mut validation = Validation::new(self.algorithm);
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        // Expiry is checked below against the injected clock.
        validation.validate_exp = false;
        validation.leeway = 0;

        let claims = decode::<TokenClaims>(token, &self.decoding_key, &validation)?.claims;

        if claims.exp <= self.clock.now().timestamp() {
            return Err(SecurityError::TokenExpired);
        }
        if claims.sub.is_empty() {
            return Err(SecurityError::InvalidToken("empty subject".to_string()));
        }

        Ok(claims)
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() {
        Some(token)
    } else {
        None
    }
}

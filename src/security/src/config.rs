//! Security Configuration Module
//!
//! Configuration for every stage of the security gate. All sections have working
//! defaults except the token secret, which must always be supplied.

use crate::errors::{SecurityError, SecurityResult};
use crate::rate_limiting::{KeySource, RateLimitBucket, API_BUCKET, AUTH_BUCKET, REGISTRATION_BUCKET};
use http::{HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Main gate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Named rate-limit buckets
    pub rate_limits: BTreeMap<String, RateLimitBucket>,
    pub jwt: JwtConfig,
    pub session: SessionConfig,
    pub headers: SecurityHeadersConfig,
    pub cors: CorsConfig,
    pub payload: PayloadConfig,
    pub anomaly: AnomalyConfig,
    /// Honour `X-Forwarded-For`, `X-Real-IP` and `X-Forwarded-Proto`. Only enable
    /// behind a proxy that overwrites them.
    pub trust_forwarded_headers: bool,
}

/// Bearer token configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    #[serde(with = "duration_serde")]
    pub token_ttl: Duration,
    pub algorithm: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    pub fn as_str(self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

/// Server-side session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub cookie_name: String,
    #[serde(with = "duration_serde")]
    pub ttl: Duration,
    /// Renew the expiry on every authenticated access
    pub rolling: bool,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: SameSite,
    pub path: String,
}

/// Response hardening headers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityHeadersConfig {
    pub content_security_policy: String,
    pub frame_options: String,
    pub referrer_policy: String,
    pub permissions_policy: String,
    pub cache_control: String,
    pub hsts_enabled: bool,
    #[serde(with = "duration_serde")]
    pub hsts_max_age: Duration,
    pub hsts_include_subdomains: bool,
    pub hsts_preload: bool,
    /// Extra headers appended verbatim to every response
    pub custom_headers: BTreeMap<String, String>,
}

/// Cross-origin resource sharing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
    pub exposed_headers: Vec<String>,
    pub allow_credentials: bool,
    #[serde(with = "duration_serde")]
    pub max_age: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PayloadConfig {
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    pub enabled: bool,
    /// Case-insensitive regular expressions
    pub patterns: Vec<String>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            rate_limits: default_buckets(),
            jwt: JwtConfig::default(),
            session: SessionConfig::default(),
            headers: SecurityHeadersConfig::default(),
            cors: CorsConfig::default(),
            payload: PayloadConfig::default(),
            anomaly: AnomalyConfig::default(),
            trust_forwarded_headers: false,
        }
    }
}

fn default_buckets() -> BTreeMap<String, RateLimitBucket> {
    let mut buckets = BTreeMap::new();
    buckets.insert(
        AUTH_BUCKET.to_string(),
        RateLimitBucket::new(Duration::from_secs(15 * 60), 5),
    );
    buckets.insert(
        REGISTRATION_BUCKET.to_string(),
        RateLimitBucket::new(Duration::from_secs(60 * 60), 3),
    );
    buckets.insert(
        API_BUCKET.to_string(),
        RateLimitBucket::new(Duration::from_secs(15 * 60), 1000),
    );
    buckets
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            issuer: "gatekeeper".to_string(),
            token_ttl: Duration::from_secs(24 * 60 * 60),
            algorithm: "HS256".to_string(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "sessionId".to_string(),
            ttl: Duration::from_secs(24 * 60 * 60),
            rolling: true,
            secure: false,
            http_only: true,
            same_site: SameSite::Strict,
            path: "/".to_string(),
        }
    }
}

impl Default for SecurityHeadersConfig {
    fn default() -> Self {
        Self {
            content_security_policy: "default-src 'self'; \
                script-src 'self' 'unsafe-inline' 'unsafe-eval'; \
                style-src 'self' 'unsafe-inline'; \
                img-src 'self' data: https:; \
                font-src 'self'; \
                connect-src 'self'; \
                frame-ancestors 'none'"
                .to_string(),
            frame_options: "DENY".to_string(),
            referrer_policy: "strict-origin-when-cross-origin".to_string(),
            permissions_policy: "geolocation=(), microphone=(), camera=(), payment=(), \
                usb=(), magnetometer=(), gyroscope=(), accelerometer=()"
                .to_string(),
            cache_control: "no-store, no-cache, must-revalidate, proxy-revalidate".to_string(),
            hsts_enabled: true,
            hsts_max_age: Duration::from_secs(31_536_000),
            hsts_include_subdomains: true,
            hsts_preload: true,
            custom_headers: BTreeMap::new(),
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["http://localhost:4200".to_string()],
            allowed_methods: ["GET", "POST", "PUT", "DELETE", "PATCH", "OPTIONS"]
                .iter()
                .map(|m| m.to_string())
                .collect(),
            allowed_headers: ["Content-Type", "Authorization", "X-Requested-With"]
                .iter()
                .map(|h| h.to_string())
                .collect(),
            exposed_headers: [
                "X-RateLimit-Limit",
                "X-RateLimit-Remaining",
                "X-RateLimit-Reset",
                "X-Request-ID",
            ]
            .iter()
            .map(|h| h.to_string())
            .collect(),
            allow_credentials: true,
            max_age: Duration::from_secs(86_400),
        }
    }
}

impl Default for PayloadConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: 10 * 1024 * 1024, // 10 MB
        }
    }
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            patterns: [
                r"<script",
                r"javascript:",
                r"on\w+\s*=",
                r"union\s+select",
                r"drop\s+table",
                r"insert\s+into",
                r"delete\s+from",
                r"update\s+set",
            ]
            .iter()
            .map(|p| p.to_string())
            .collect(),
        }
    }
}

impl GateConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> SecurityResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SecurityError::Configuration(format!("Failed to read config file: {}", e))
        })?;

        let config: Self = serde_yaml::from_str(&content)
            .map_err(|e| SecurityError::Configuration(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Look up a bucket by name
    pub fn bucket(&self, name: &str) -> Option<&RateLimitBucket> {
        self.rate_limits.get(name)
    }

    /// Validate configuration
    pub fn validate(&self) -> SecurityResult<()> {
        if self.rate_limits.is_empty() {
            return Err(SecurityError::Configuration(
                "At least one rate limit bucket must be configured".to_string(),
            ));
        }

        for (name, bucket) in &self.rate_limits {
            if name.is_empty() {
                return Err(SecurityError::Configuration(
                    "Rate limit bucket names must not be empty".to_string(),
                ));
            }
            if bucket.window.is_zero() {
                return Err(SecurityError::Configuration(format!(
                    "Rate limit bucket '{}' must have a window greater than 0",
                    name
                )));
            }
            if bucket.max_requests == 0 {
                return Err(SecurityError::Configuration(format!(
                    "Rate limit bucket '{}' must allow at least one request",
                    name
                )));
            }
            if let KeySource::Header { name: header } = &bucket.key {
                HeaderName::try_from(header.as_str()).map_err(|_| {
                    SecurityError::Configuration(format!(
                        "Rate limit bucket '{}' keys on invalid header '{}'",
                        name, header
                    ))
                })?;
            }
        }

        if self.jwt.secret.len() < 32 {
            return Err(SecurityError::Configuration(
                "JWT secret must be at least 32 characters".to_string(),
            ));
        }

        if !self.jwt.algorithm.starts_with("HS") {
            return Err(SecurityError::Configuration(format!(
                "Unsupported JWT algorithm '{}': only HMAC algorithms are supported",
                self.jwt.algorithm
            )));
        }

        if self.jwt.token_ttl.is_zero() {
            return Err(SecurityError::Configuration(
                "Token TTL must be greater than 0".to_string(),
            ));
        }

        if self.session.cookie_name.is_empty()
            || !self
                .session
                .cookie_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(SecurityError::Configuration(format!(
                "Invalid session cookie name '{}'",
                self.session.cookie_name
            )));
        }

        if self.session.ttl.is_zero() {
            return Err(SecurityError::Configuration(
                "Session TTL must be greater than 0".to_string(),
            ));
        }

        let headers = &self.headers;
        for value in [
            &headers.content_security_policy,
            &headers.frame_options,
            &headers.referrer_policy,
            &headers.permissions_policy,
            &headers.cache_control,
        ] {
            HeaderValue::from_str(value).map_err(|_| {
                SecurityError::Configuration(format!("Invalid security header value '{}'", value))
            })?;
        }
        for (name, value) in &headers.custom_headers {
            HeaderName::try_from(name.as_str())
                .map_err(|_| SecurityError::Configuration(format!("Invalid header name '{}'", name)))?;
            HeaderValue::from_str(value).map_err(|_| {
                SecurityError::Configuration(format!("Invalid value for header '{}'", name))
            })?;
        }

        for origin in &self.cors.allowed_origins {
            HeaderValue::from_str(origin).map_err(|_| {
                SecurityError::Configuration(format!("Invalid CORS origin '{}'", origin))
            })?;
        }

        if self.payload.max_body_bytes == 0 {
            return Err(SecurityError::Configuration(
                "Maximum body size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Serialize `std::time::Duration` as whole seconds
pub(crate) mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

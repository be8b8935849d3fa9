//! Response hardening and CORS headers.
//!
//! All values are parsed once at construction; building the headers for a request
//! only clones prepared [`HeaderValue`]s.

use crate::config::{CorsConfig, SecurityHeadersConfig};
use crate::errors::{SecurityError, SecurityResult};
use http::header::{
    ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_EXPOSE_HEADERS, ACCESS_CONTROL_MAX_AGE,
    ACCESS_CONTROL_REQUEST_METHOD, CACHE_CONTROL, CONTENT_SECURITY_POLICY, ORIGIN, PRAGMA,
    REFERRER_POLICY, STRICT_TRANSPORT_SECURITY, VARY, X_CONTENT_TYPE_OPTIONS, X_FRAME_OPTIONS,
};
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use std::collections::HashSet;

pub const PERMISSIONS_POLICY: HeaderName = HeaderName::from_static("permissions-policy");
pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");
pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

fn header_value(value: &str) -> SecurityResult<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|_| SecurityError::Configuration(format!("Invalid header value '{}'", value)))
}

/// Headers added to every response
#[derive(Debug, Clone)]
pub struct SecurityHeaders {
    always: Vec<(HeaderName, HeaderValue)>,
    hsts: Option<HeaderValue>,
}

impl SecurityHeaders {
    pub fn new(config: &SecurityHeadersConfig) -> SecurityResult<Self> {
        let mut always = vec![
            (X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff")),
            (X_FRAME_OPTIONS, header_value(&config.frame_options)?),
            (
                CONTENT_SECURITY_POLICY,
                header_value(&config.content_security_policy)?,
            ),
            (REFERRER_POLICY, header_value(&config.referrer_policy)?),
            (PERMISSIONS_POLICY, header_value(&config.permissions_policy)?),
            (CACHE_CONTROL, header_value(&config.cache_control)?),
            (PRAGMA, HeaderValue::from_static("no-cache")),
        ];

        for (name, value) in &config.custom_headers {
            let name = HeaderName::try_from(name.as_str()).map_err(|_| {
                SecurityError::Configuration(format!("Invalid header name '{}'", name))
            })?;
            always.push((name, header_value(value)?));
        }

        let hsts = if config.hsts_enabled {
            let mut value = format!("max-age={}", config.hsts_max_age.as_secs());
            if config.hsts_include_subdomains {
                value.push_str("; includeSubDomains");
            }
            if config.hsts_preload {
                value.push_str("; preload");
            }
            Some(header_value(&value)?)
        } else {
            None
        };

        Ok(Self { always, hsts })
    }

    /// Write the hardening headers. HSTS is only sent over a secure channel.
    pub fn apply(&self, secure: bool, out: &mut HeaderMap) {
        for (name, value) in &self.always {
            out.insert(name.clone(), value.clone());
        }
        if secure {
            if let Some(hsts) = &self.hsts {
                out.insert(STRICT_TRANSPORT_SECURITY, hsts.clone());
            }
        }
    }
}

/// Origin allow-list and the `Access-Control-*` headers
#[derive(Debug, Clone)]
pub struct CorsPolicy {
    allowed_origins: HashSet<String>,
    allow_methods: HeaderValue,
    allow_headers: HeaderValue,
    expose_headers: HeaderValue,
    allow_credentials: bool,
    max_age: HeaderValue,
}

impl CorsPolicy {
    pub fn new(config: &CorsConfig) -> SecurityResult<Self> {
        Ok(Self {
            allowed_origins: config.allowed_origins.iter().cloned().collect(),
            allow_methods: header_value(&config.allowed_methods.join(", "))?,
            allow_headers: header_value(&config.allowed_headers.join(", "))?,
            expose_headers: header_value(&config.exposed_headers.join(", "))?,
            allow_credentials: config.allow_credentials,
            max_age: header_value(&config.max_age.as_secs().to_string())?,
        })
    }

    pub fn is_allowed(&self, origin: &str) -> bool {
        self.allowed_origins.contains(origin)
    }

    /// Write CORS headers for a request carrying `request_headers`. The allow-origin
    /// header is only written for an allow-listed origin.
    pub fn apply(&self, request_headers: &HeaderMap, out: &mut HeaderMap) {
        if let Some(origin) = request_headers.get(ORIGIN) {
            if origin.to_str().map(|o| self.is_allowed(o)).unwrap_or(false) {
                out.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
            }
        }
        out.append(VARY, HeaderValue::from_static("Origin"));
        out.insert(ACCESS_CONTROL_ALLOW_METHODS, self.allow_methods.clone());
        out.insert(ACCESS_CONTROL_ALLOW_HEADERS, self.allow_headers.clone());
        out.insert(ACCESS_CONTROL_EXPOSE_HEADERS, self.expose_headers.clone());
        if self.allow_credentials {
            out.insert(
                ACCESS_CONTROL_ALLOW_CREDENTIALS,
                HeaderValue::from_static("true"),
            );
        }
        out.insert(ACCESS_CONTROL_MAX_AGE, self.max_age.clone());
    }

    /// `OPTIONS` with `Origin` and `Access-Control-Request-Method`
    pub fn is_preflight(method: &Method, headers: &HeaderMap) -> bool {
        method == Method::OPTIONS
            && headers.contains_key(ORIGIN)
            && headers.contains_key(ACCESS_CONTROL_REQUEST_METHOD)
    }
}

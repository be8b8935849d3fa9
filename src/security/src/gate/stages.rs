//! The standard gate stages.

use super::{GateContext, GateResponse, GateStage, RequestBody, StageOutcome};
use crate::clock::Clock;
use crate::config::{AnomalyConfig, CorsConfig, SecurityHeadersConfig, SessionConfig};
use crate::errors::SecurityError;
use crate::headers::{
    CorsPolicy, SecurityHeaders, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING, X_RATELIMIT_RESET,
    X_REQUEST_ID,
};
use crate::identity::{AuthChannel, Identity, IdentityLookup};
use crate::jwt::{bearer_token, TokenVerifier};
use crate::rate_limiting::{KeySource, RateLimitBucket, RateLimiter};
use crate::rbac::{authorize, PermissionTable};
use crate::session::{cookie_value, session_cookie, SessionStore};
use crate::threat_detection::AnomalyScanner;
use async_trait::async_trait;
use chrono::SecondsFormat;
use http::header::{CONTENT_LENGTH, RETRY_AFTER, SET_COOKIE};
use http::{HeaderValue, StatusCode};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

const MAX_REQUEST_ID_LEN: usize = 128;

/// Reuses a well-formed incoming `X-Request-ID`, otherwise generates a UUID v4
pub struct RequestIdStage;

impl RequestIdStage {
    fn incoming(ctx: &GateContext<'_>) -> Option<String> {
        let value = ctx.request.headers.get(X_REQUEST_ID)?.to_str().ok()?;
        let valid = !value.is_empty()
            && value.len() <= MAX_REQUEST_ID_LEN
            && value.bytes().all(|b| b.is_ascii_graphic());
        valid.then(|| value.to_string())
    }
}

#[async_trait]
impl GateStage for RequestIdStage {
    fn name(&self) -> &'static str {
        "request_id"
    }

    async fn apply(&self, ctx: &mut GateContext<'_>) -> StageOutcome {
        let request_id = Self::incoming(ctx).unwrap_or_else(|| Uuid::new_v4().to_string());
        match HeaderValue::from_str(&request_id) {
            Ok(value) => {
                ctx.response_headers.insert(X_REQUEST_ID, value);
            }
            Err(_) => debug!("Request id is not a valid header value"),
        }
        ctx.request_id = request_id;
        StageOutcome::Continue
    }
}

pub struct SecurityHeadersStage {
    headers: SecurityHeaders,
}

impl SecurityHeadersStage {
    pub fn new(config: &SecurityHeadersConfig) -> crate::SecurityResult<Self> {
        Ok(Self {
            headers: SecurityHeaders::new(config)?,
        })
    }
}

#[async_trait]
impl GateStage for SecurityHeadersStage {
    fn name(&self) -> &'static str {
        "security_headers"
    }

    async fn apply(&self, ctx: &mut GateContext<'_>) -> StageOutcome {
        self.headers.apply(ctx.secure, &mut ctx.response_headers);
        StageOutcome::Continue
    }
}

/// Computes CORS headers and answers preflight requests
pub struct CorsStage {
    policy: CorsPolicy,
}

impl CorsStage {
    pub fn new(config: &CorsConfig) -> crate::SecurityResult<Self> {
        Ok(Self {
            policy: CorsPolicy::new(config)?,
        })
    }
}

#[async_trait]
impl GateStage for CorsStage {
    fn name(&self) -> &'static str {
        "cors"
    }

    async fn apply(&self, ctx: &mut GateContext<'_>) -> StageOutcome {
        self.policy
            .apply(&ctx.request.headers, &mut ctx.response_headers);

        if CorsPolicy::is_preflight(&ctx.request.method, &ctx.request.headers) {
            return StageOutcome::Respond(GateResponse::empty(StatusCode::NO_CONTENT));
        }
        StageOutcome::Continue
    }
}

/// Rejects bodies over the configured ceiling, declared or observed
pub struct PayloadLimitStage {
    max_body_bytes: usize,
}

impl PayloadLimitStage {
    pub fn new(max_body_bytes: usize) -> Self {
        Self { max_body_bytes }
    }
}

#[async_trait]
impl GateStage for PayloadLimitStage {
    fn name(&self) -> &'static str {
        "payload_limit"
    }

    async fn apply(&self, ctx: &mut GateContext<'_>) -> StageOutcome {
        let declared = match ctx.request.headers.get(CONTENT_LENGTH) {
            None => None,
            Some(value) => match value.to_str().ok().and_then(|v| v.trim().parse::<u64>().ok()) {
                Some(length) => Some(length),
                None => {
                    return StageOutcome::reject(
                        SecurityError::InputValidation {
                            field: "content-length".to_string(),
                            message: "not a valid length".to_string(),
                        },
                        ctx,
                    )
                }
            },
        };

        let over_declared = declared
            .map(|length| length > self.max_body_bytes as u64)
            .unwrap_or(false);
        if over_declared || matches!(ctx.request.body, RequestBody::Overflowed) {
            return StageOutcome::reject(
                SecurityError::PayloadTooLarge {
                    max: self.max_body_bytes,
                    actual: declared,
                },
                ctx,
            );
        }
        StageOutcome::Continue
    }
}

/// Logs requests matching known attack patterns. Never blocks.
pub struct AnomalyScanStage {
    scanner: Option<AnomalyScanner>,
}

impl AnomalyScanStage {
    pub fn new(config: &AnomalyConfig) -> crate::SecurityResult<Self> {
        let scanner = if config.enabled {
            Some(AnomalyScanner::new(&config.patterns)?)
        } else {
            None
        };
        Ok(Self { scanner })
    }
}

#[async_trait]
impl GateStage for AnomalyScanStage {
    fn name(&self) -> &'static str {
        "anomaly_scan"
    }

    async fn apply(&self, ctx: &mut GateContext<'_>) -> StageOutcome {
        let Some(scanner) = &self.scanner else {
            return StageOutcome::Continue;
        };

        let findings = scanner.scan(&ctx.request.uri, ctx.request.body.bytes());
        if !findings.is_empty() {
            metrics::counter!("anomaly_detections_total").increment(findings.len() as u64);
            let patterns: Vec<&str> = findings.iter().map(|f| f.pattern.as_str()).collect();
            warn!(
                request_id = %ctx.request_id,
                client_ip = %ctx.client_ip,
                method = %ctx.request.method,
                path = %ctx.request.uri.path(),
                patterns = ?patterns,
                kinds = ?findings.iter().map(|f| f.kind).collect::<Vec<_>>(),
                "Suspicious request pattern detected"
            );
        }
        StageOutcome::Continue
    }
}

/// Counts the request against the bucket named by the route policy
pub struct RateLimitStage {
    limiter: Arc<RateLimiter>,
    buckets: BTreeMap<String, RateLimitBucket>,
    clock: Arc<dyn Clock>,
}

impl RateLimitStage {
    pub fn new(
        limiter: Arc<RateLimiter>,
        buckets: BTreeMap<String, RateLimitBucket>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            limiter,
            buckets,
            clock,
        }
    }

    fn requester(bucket: &RateLimitBucket, ctx: &GateContext<'_>) -> String {
        match &bucket.key {
            KeySource::ClientIp => ctx.client_ip.clone(),
            KeySource::Header { name } => ctx
                .request
                .headers
                .get(name.as_str())
                .and_then(|value| value.to_str().ok())
                .filter(|value| !value.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| ctx.client_ip.clone()),
        }
    }
}

#[async_trait]
impl GateStage for RateLimitStage {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    async fn apply(&self, ctx: &mut GateContext<'_>) -> StageOutcome {
        let Some(bucket_name) = ctx.policy.bucket.as_deref() else {
            return StageOutcome::Continue;
        };
        let Some(bucket) = self.buckets.get(bucket_name) else {
            return StageOutcome::reject(SecurityError::UnknownBucket(bucket_name.to_string()), ctx);
        };

        let key = RateLimiter::rate_key(bucket_name, &Self::requester(bucket, ctx));
        let now = self.clock.now();
        let decision = match self
            .limiter
            .check_at(&key, bucket.window, bucket.max_requests, now)
        {
            Ok(decision) => decision,
            Err(e) => return StageOutcome::reject(e, ctx),
        };

        let headers = &mut ctx.response_headers;
        headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
        headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
        let reset = decision.reset_at.to_rfc3339_opts(SecondsFormat::Millis, true);
        if let Ok(value) = HeaderValue::from_str(&reset) {
            headers.insert(X_RATELIMIT_RESET, value);
        }

        if decision.allowed {
            return StageOutcome::Continue;
        }

        let retry_after_secs = decision.retry_after_secs(now);
        headers.insert(RETRY_AFTER, HeaderValue::from(retry_after_secs));
        metrics::counter!("rate_limit_denied_total", "bucket" => bucket_name.to_string())
            .increment(1);

        StageOutcome::reject(
            SecurityError::RateLimitExceeded {
                bucket: bucket_name.to_string(),
                retry_after_secs,
            },
            ctx,
        )
    }
}

/// Establishes the caller's identity: session cookie first, bearer token second
pub struct AuthenticationStage {
    sessions: Arc<dyn SessionStore>,
    tokens: Arc<TokenVerifier>,
    identities: Arc<dyn IdentityLookup>,
    session_config: SessionConfig,
}

impl AuthenticationStage {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        tokens: Arc<TokenVerifier>,
        identities: Arc<dyn IdentityLookup>,
        session_config: SessionConfig,
    ) -> Self {
        Self {
            sessions,
            tokens,
            identities,
            session_config,
        }
    }

    async fn from_session(
        &self,
        ctx: &mut GateContext<'_>,
    ) -> Result<Option<Identity>, SecurityError> {
        let Some(session_id) = cookie_value(&ctx.request.headers, &self.session_config.cookie_name)
        else {
            return Ok(None);
        };

        let Some(record) = self.sessions.touch(&session_id).await? else {
            debug!(request_id = %ctx.request_id, "Session cookie did not resolve");
            return Ok(None);
        };

        if self.session_config.rolling {
            if let Ok(cookie) =
                HeaderValue::from_str(&session_cookie(&self.session_config, &record.session_id))
            {
                ctx.response_headers.append(SET_COOKIE, cookie);
            }
        }
        ctx.auth_channel = Some(AuthChannel::Session {
            session_id: record.session_id,
        });
        Ok(Some(record.identity))
    }

    async fn from_bearer(&self, ctx: &mut GateContext<'_>) -> Result<Identity, SecurityError> {
        let token = bearer_token(&ctx.request.headers).ok_or(SecurityError::MissingCredentials)?;
        let claims = self.tokens.verify(token)?;

        // Tokens carry no role; the directory is the only source of it.
        let role = self
            .identities
            .resolve_role(&claims.sub)
            .await?
            .ok_or_else(|| SecurityError::UnknownSubject(claims.sub.clone()))?;

        ctx.auth_channel = Some(AuthChannel::Bearer);
        Ok(Identity::new(claims.sub, role))
    }
}

#[async_trait]
impl GateStage for AuthenticationStage {
    fn name(&self) -> &'static str {
        "authentication"
    }

    async fn apply(&self, ctx: &mut GateContext<'_>) -> StageOutcome {
        if !ctx.policy.requirement.needs_identity() {
            return StageOutcome::Continue;
        }

        let identity = match self.from_session(ctx).await {
            Ok(Some(identity)) => Ok(identity),
            Ok(None) => self.from_bearer(ctx).await,
            Err(e) => Err(e),
        };

        match identity {
            Ok(identity) => {
                debug!(
                    subject = %identity.subject_id,
                    role = %identity.role,
                    channel = ctx.auth_channel.as_ref().map(|c| c.name()),
                    "Request authenticated"
                );
                ctx.identity = Some(identity);
                StageOutcome::Continue
            }
            Err(e) => {
                if !e.is_internal() {
                    metrics::counter!("auth_failures_total", "channel" => "bearer").increment(1);
                }
                StageOutcome::reject(e, ctx)
            }
        }
    }
}

/// Applies the route's requirement to the established identity
pub struct AuthorizationStage {
    permissions: Arc<PermissionTable>,
}

impl AuthorizationStage {
    pub fn new(permissions: Arc<PermissionTable>) -> Self {
        Self { permissions }
    }
}

#[async_trait]
impl GateStage for AuthorizationStage {
    fn name(&self) -> &'static str {
        "authorization"
    }

    async fn apply(&self, ctx: &mut GateContext<'_>) -> StageOutcome {
        let decision = authorize(
            ctx.identity.as_ref(),
            &ctx.policy.requirement,
            &self.permissions,
        );
        match decision.into_result() {
            Ok(()) => StageOutcome::Continue,
            Err(e) => StageOutcome::reject(e, ctx),
        }
    }
}

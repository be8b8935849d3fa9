//! The security gate: an ordered list of stages run by a short-circuiting chain runner.
//!
//! Stages never write to the outgoing response directly. Everything they want on the
//! response is collected in [`GateContext::response_headers`] and handed back in the
//! [`GateDecision`]; a request dropped mid-chain therefore leaves nothing behind except
//! counter increments already applied by the rate limiter.

mod stages;

pub use stages::{
    AnomalyScanStage, AuthenticationStage, AuthorizationStage, CorsStage, PayloadLimitStage,
    RateLimitStage, RequestIdStage, SecurityHeadersStage,
};

use crate::clock::Clock;
use crate::config::GateConfig;
use crate::errors::{ErrorKind, SecurityError, SecurityResult};
use crate::identity::{AuthChannel, Identity, IdentityLookup};
use crate::jwt::TokenVerifier;
use crate::rate_limiting::RateLimiter;
use crate::rbac::{PermissionTable, Requirement};
use crate::session::{InMemorySessionStore, SessionStore};
use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode, Uri};
use serde_json::{json, Value};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, error, info_span, warn, Instrument};

/// Fallback requester identifier when no client address is known
pub const UNKNOWN_CLIENT: &str = "unknown";

/// The request body as seen by the gate
#[derive(Debug, Clone)]
pub enum RequestBody {
    Buffered(Bytes),
    /// The body exceeded the buffering limit and was discarded
    Overflowed,
}

impl RequestBody {
    pub fn bytes(&self) -> &[u8] {
        match self {
            RequestBody::Buffered(bytes) => bytes,
            RequestBody::Overflowed => &[],
        }
    }
}

/// Request metadata consumed by the gate
#[derive(Debug, Clone)]
pub struct GateRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub peer_addr: Option<IpAddr>,
    pub body: RequestBody,
}

impl GateRequest {
    pub fn new(method: Method, uri: Uri, headers: HeaderMap) -> Self {
        Self {
            method,
            uri,
            headers,
            peer_addr: None,
            body: RequestBody::Buffered(Bytes::new()),
        }
    }

    pub fn with_peer_addr(mut self, peer_addr: IpAddr) -> Self {
        self.peer_addr = Some(peer_addr);
        self
    }

    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }
}

/// What a route demands: which rate-limit bucket it spends and who may call it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePolicy {
    pub bucket: Option<String>,
    pub requirement: Requirement,
}

impl RoutePolicy {
    pub fn new(bucket: impl Into<String>, requirement: Requirement) -> Self {
        Self {
            bucket: Some(bucket.into()),
            requirement,
        }
    }

    pub fn public(bucket: impl Into<String>) -> Self {
        Self::new(bucket, Requirement::Public)
    }

    /// No rate limiting for this route
    pub fn unmetered(requirement: Requirement) -> Self {
        Self {
            bucket: None,
            requirement,
        }
    }
}

/// Mutable per-request state threaded through the stages
#[derive(Debug)]
pub struct GateContext<'a> {
    pub request: &'a GateRequest,
    pub policy: &'a RoutePolicy,
    pub request_id: String,
    /// Requester identifier used for rate keys and logs
    pub client_ip: String,
    /// Whether the request arrived over an encrypted channel
    pub secure: bool,
    pub identity: Option<Identity>,
    pub auth_channel: Option<AuthChannel>,
    /// Headers to be applied to the final response
    pub response_headers: HeaderMap,
}

/// A terminal response produced by a stage
#[derive(Debug, Clone, PartialEq)]
pub struct GateResponse {
    pub status: StatusCode,
    pub body: Option<Value>,
}

impl GateResponse {
    pub fn empty(status: StatusCode) -> Self {
        Self { status, body: None }
    }

    /// JSON error body for `error`. Only the class of the error is exposed.
    pub fn from_error(error: &SecurityError, request_id: &str) -> Self {
        let kind = error.kind();
        let mut body = json!({
            "error": kind.slug(),
            "message": kind.public_message(),
            "requestId": request_id,
        });
        if let SecurityError::RateLimitExceeded {
            retry_after_secs, ..
        } = error
        {
            body["retryAfter"] = json!(retry_after_secs);
        }
        Self {
            status: kind.status_code(),
            body: Some(body),
        }
    }
}

pub enum StageOutcome {
    Continue,
    Respond(GateResponse),
}

impl StageOutcome {
    /// Terminate with the response for `error`, logging it at a level matching its class
    pub fn reject(error: SecurityError, ctx: &GateContext<'_>) -> Self {
        match error.kind() {
            ErrorKind::Internal => error!(
                request_id = %ctx.request_id,
                code = error.error_code(),
                error = %error,
                "Security gate internal failure"
            ),
            _ => warn!(
                request_id = %ctx.request_id,
                client_ip = %ctx.client_ip,
                code = error.error_code(),
                reason = %error,
                "Request rejected"
            ),
        }
        StageOutcome::Respond(GateResponse::from_error(&error, &ctx.request_id))
    }
}

/// One step of the chain
#[async_trait]
pub trait GateStage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn apply(&self, ctx: &mut GateContext<'_>) -> StageOutcome;
}

/// The request may proceed to its handler
#[derive(Debug)]
pub struct Admission {
    pub request_id: String,
    pub identity: Option<Identity>,
    pub auth_channel: Option<AuthChannel>,
    pub headers: HeaderMap,
}

/// The request was answered by the gate
#[derive(Debug)]
pub struct Rejection {
    pub request_id: String,
    pub stage: &'static str,
    pub response: GateResponse,
    pub headers: HeaderMap,
}

#[derive(Debug)]
pub enum GateDecision {
    Continue(Admission),
    Respond(Rejection),
}

impl GateDecision {
    pub fn is_continue(&self) -> bool {
        matches!(self, GateDecision::Continue(_))
    }

    pub fn headers(&self) -> &HeaderMap {
        match self {
            GateDecision::Continue(admission) => &admission.headers,
            GateDecision::Respond(rejection) => &rejection.headers,
        }
    }
}

/// Shared collaborators the standard stages are built from
#[derive(Clone)]
pub struct GateServices {
    pub limiter: Arc<RateLimiter>,
    pub tokens: Arc<TokenVerifier>,
    pub sessions: Arc<dyn SessionStore>,
    pub identities: Arc<dyn IdentityLookup>,
    pub permissions: Arc<PermissionTable>,
    pub clock: Arc<dyn Clock>,
}

impl GateServices {
    /// Assemble the in-process services for `config`
    pub fn in_memory(
        config: &GateConfig,
        identities: Arc<dyn IdentityLookup>,
        clock: Arc<dyn Clock>,
    ) -> SecurityResult<Self> {
        Ok(Self {
            limiter: Arc::new(RateLimiter::new(clock.clone())),
            tokens: Arc::new(TokenVerifier::new(&config.jwt, clock.clone())?),
            sessions: Arc::new(InMemorySessionStore::new(&config.session, clock.clone())?),
            identities,
            permissions: Arc::new(PermissionTable::default()),
            clock,
        })
    }
}

pub struct SecurityGate {
    stages: Vec<Arc<dyn GateStage>>,
    trust_forwarded_headers: bool,
}

impl SecurityGate {
    pub fn new(stages: Vec<Arc<dyn GateStage>>) -> Self {
        Self {
            stages,
            trust_forwarded_headers: false,
        }
    }

    pub fn trust_forwarded_headers(mut self, trust: bool) -> Self {
        self.trust_forwarded_headers = trust;
        self
    }

    /// The fixed production order: request id, hardening headers, CORS, payload
    /// ceiling, anomaly scan, rate limit, authentication, authorization.
    pub fn standard(config: &GateConfig, services: &GateServices) -> SecurityResult<Self> {
        let stages: Vec<Arc<dyn GateStage>> = vec![
            Arc::new(RequestIdStage),
            Arc::new(SecurityHeadersStage::new(&config.headers)?),
            Arc::new(CorsStage::new(&config.cors)?),
            Arc::new(PayloadLimitStage::new(config.payload.max_body_bytes)),
            Arc::new(AnomalyScanStage::new(&config.anomaly)?),
            Arc::new(RateLimitStage::new(
                services.limiter.clone(),
                config.rate_limits.clone(),
                services.clock.clone(),
            )),
            Arc::new(AuthenticationStage::new(
                services.sessions.clone(),
                services.tokens.clone(),
                services.identities.clone(),
                config.session.clone(),
            )),
            Arc::new(AuthorizationStage::new(services.permissions.clone())),
        ];

        Ok(Self::new(stages).trust_forwarded_headers(config.trust_forwarded_headers))
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    /// Run the chain for one request, stopping at the first terminal response
    pub async fn evaluate(&self, request: &GateRequest, policy: &RoutePolicy) -> GateDecision {
        let mut ctx = GateContext {
            request,
            policy,
            request_id: String::new(),
            client_ip: self.client_ip(request),
            secure: self.is_secure(request),
            identity: None,
            auth_channel: None,
            response_headers: HeaderMap::new(),
        };

        let span = info_span!(
            "security_gate",
            request_id = tracing::field::Empty,
            method = %request.method,
            path = %request.uri.path(),
        );

        async move {
            for stage in &self.stages {
                let outcome = stage.apply(&mut ctx).await;
                if !ctx.request_id.is_empty() {
                    tracing::Span::current().record("request_id", ctx.request_id.as_str());
                }

                if let StageOutcome::Respond(response) = outcome {
                    let status = response.status.as_u16().to_string();
                    metrics::counter!("gate_requests_total", "outcome" => "respond").increment(1);
                    metrics::counter!(
                        "gate_rejections_total",
                        "stage" => stage.name(),
                        "status" => status
                    )
                    .increment(1);
                    debug!(stage = stage.name(), status = %response.status, "Gate terminated request");

                    return GateDecision::Respond(Rejection {
                        request_id: ctx.request_id,
                        stage: stage.name(),
                        response,
                        headers: ctx.response_headers,
                    });
                }
            }

            metrics::counter!("gate_requests_total", "outcome" => "continue").increment(1);
            debug!(
                subject = ctx.identity.as_ref().map(|i| i.subject_id.as_str()),
                "Gate admitted request"
            );

            GateDecision::Continue(Admission {
                request_id: ctx.request_id,
                identity: ctx.identity,
                auth_channel: ctx.auth_channel,
                headers: ctx.response_headers,
            })
        }
        .instrument(span)
        .await
    }

    fn client_ip(&self, request: &GateRequest) -> String {
        if self.trust_forwarded_headers {
            let forwarded = request
                .headers
                .get("x-forwarded-for")
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.split(',').next())
                .map(str::trim)
                .filter(|value| !value.is_empty());
            let real_ip = || {
                ["x-real-ip", "cf-connecting-ip"].iter().find_map(|name| {
                    request
                        .headers
                        .get(*name)
                        .and_then(|value| value.to_str().ok())
                        .map(str::trim)
                        .filter(|value| !value.is_empty())
                })
            };
            if let Some(ip) = forwarded.or_else(real_ip) {
                return ip.to_string();
            }
        }

        request
            .peer_addr
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
    }

    fn is_secure(&self, request: &GateRequest) -> bool {
        if request.uri.scheme_str() == Some("https") {
            return true;
        }
        self.trust_forwarded_headers
            && request
                .headers
                .get("x-forwarded-proto")
                .and_then(|value| value.to_str().ok())
                .map(|proto| proto.eq_ignore_ascii_case("https"))
                .unwrap_or(false)
    }
}

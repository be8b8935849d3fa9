//! Runs the security gate in front of a route group.
//!
//! The body is buffered up to the payload ceiling so the gate can scan it, then handed
//! on to the handler unchanged. Headers the gate collected are merged into whatever
//! response goes back, whether the gate answered or the handler did.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{header::SET_COOKIE, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use gatekeeper_security::{
    AuthChannel, GateDecision, GateRequest, GateResponse, Identity, RequestBody, RoutePolicy,
};
use tracing::debug;

use crate::error::{ApiError, Result};
use crate::state::AppState;

/// Middleware state: the application plus the policy of the guarded routes
#[derive(Clone)]
pub struct RouteGuard {
    pub state: AppState,
    pub policy: Arc<RoutePolicy>,
}

impl RouteGuard {
    pub fn new(state: AppState, policy: RoutePolicy) -> Self {
        Self {
            state,
            policy: Arc::new(policy),
        }
    }
}

/// What the gate established about an admitted request
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub identity: Option<Identity>,
    pub auth_channel: Option<AuthChannel>,
}

impl RequestContext {
    /// The caller's identity; only absent on public routes
    pub fn require_identity(&self) -> Result<&Identity> {
        self.identity
            .as_ref()
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))
    }

    pub fn session_id(&self) -> Option<&str> {
        match &self.auth_channel {
            Some(AuthChannel::Session { session_id }) => Some(session_id.as_str()),
            _ => None,
        }
    }
}

pub async fn security_gate(
    State(guard): State<RouteGuard>,
    request: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = request.into_parts();
    let max_body_bytes = guard.state.config.gate.payload.max_body_bytes;

    let (gate_body, forwarded_body) = match axum::body::to_bytes(body, max_body_bytes).await {
        Ok(bytes) => (RequestBody::Buffered(bytes.clone()), Body::from(bytes)),
        Err(e) => {
            debug!(error = %e, "Request body exceeded the buffering limit");
            (RequestBody::Overflowed, Body::empty())
        }
    };

    let mut gate_request =
        GateRequest::new(parts.method.clone(), parts.uri.clone(), parts.headers.clone())
            .with_body(gate_body);
    if let Some(ConnectInfo(addr)) = parts.extensions.get::<ConnectInfo<SocketAddr>>() {
        gate_request = gate_request.with_peer_addr(addr.ip());
    }

    match guard.state.gate.evaluate(&gate_request, &guard.policy).await {
        GateDecision::Respond(rejection) => {
            let mut response = gate_response(rejection.response);
            merge_headers(response.headers_mut(), rejection.headers);
            response
        }
        GateDecision::Continue(admission) => {
            parts.extensions.insert(RequestContext {
                request_id: admission.request_id,
                identity: admission.identity,
                auth_channel: admission.auth_channel,
            });

            let mut response = next.run(Request::from_parts(parts, forwarded_body)).await;
            merge_headers(response.headers_mut(), admission.headers);
            response
        }
    }
}

fn gate_response(response: GateResponse) -> Response {
    match response.body {
        Some(body) => (response.status, Json(body)).into_response(),
        None => response.status.into_response(),
    }
}

/// Apply gate headers over the response. A `Set-Cookie` already set by the handler
/// wins over the gate's session renewal.
fn merge_headers(target: &mut HeaderMap, gate_headers: HeaderMap) {
    let handler_set_cookie = target.contains_key(SET_COOKIE);

    for name in gate_headers.keys() {
        if *name == SET_COOKIE && handler_set_cookie {
            continue;
        }
        target.remove(name);
        for value in gate_headers.get_all(name) {
            target.append(name.clone(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_handler_cookie_wins_over_renewal() {
        let mut response = HeaderMap::new();
        response.insert(SET_COOKIE, HeaderValue::from_static("sessionId=; Max-Age=0"));

        let mut gate = HeaderMap::new();
        gate.insert(SET_COOKIE, HeaderValue::from_static("sessionId=abc; Max-Age=86400"));
        gate.insert("x-request-id", HeaderValue::from_static("req-1"));

        merge_headers(&mut response, gate);
        assert_eq!(response[SET_COOKIE], "sessionId=; Max-Age=0");
        assert_eq!(response["x-request-id"], "req-1");
    }

    #[test]
    fn test_multi_valued_headers_are_kept() {
        let mut gate = HeaderMap::new();
        gate.append("vary", HeaderValue::from_static("Origin"));
        gate.append("vary", HeaderValue::from_static("Cookie"));

        let mut response = HeaderMap::new();
        response.insert("vary", HeaderValue::from_static("Accept"));
        merge_headers(&mut response, gate);

        let values: Vec<_> = response.get_all("vary").iter().collect();
        assert_eq!(values, vec!["Origin", "Cookie"]);
    }

    #[test]
    fn test_session_id_only_for_session_channel() {
        let mut ctx = RequestContext {
            request_id: "req-1".to_string(),
            identity: None,
            auth_channel: Some(AuthChannel::Bearer),
        };
        assert_eq!(ctx.session_id(), None);
        assert!(ctx.require_identity().is_err());

        ctx.auth_channel = Some(AuthChannel::Session {
            session_id: "abc".to_string(),
        });
        assert_eq!(ctx.session_id(), Some("abc"));
    }
}

//! # Gatekeeper Security Core
//!
//! The request-gating and identity layer: a fixed-window rate limiter, dual-mode
//! authentication (server-side sessions and bearer tokens), role/permission
//! authorization and response hardening, composed into an ordered
//! [`SecurityGate`](gate::SecurityGate).
//!
//! The crate only depends on the `http` types, so the gate can sit in front of any
//! web framework. `gatekeeper-api` adapts it to axum.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gatekeeper_security::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn run(identities: Arc<dyn IdentityLookup>, request: GateRequest) -> SecurityResult<()> {
//! let mut config = GateConfig::default();
//! config.jwt.secret = std::env::var("GATEKEEPER_JWT_SECRET").unwrap_or_default();
//! config.validate()?;
//!
//! let services = GateServices::in_memory(&config, identities, Arc::new(SystemClock))?;
//! let gate = SecurityGate::standard(&config, &services)?;
//!
//! let policy = RoutePolicy::new(API_BUCKET, Requirement::permission("manage_users"));
//! match gate.evaluate(&request, &policy).await {
//!     GateDecision::Continue(admission) => { /* run the handler */ }
//!     GateDecision::Respond(rejection) => { /* send rejection.response */ }
//! }
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod credentials;
pub mod errors;
pub mod gate;
pub mod headers;
pub mod identity;
pub mod jwt;
pub mod rate_limiting;
pub mod rbac;
pub mod session;
pub mod threat_detection;

pub use config::GateConfig;
pub use errors::{ErrorKind, SecurityError, SecurityResult};

pub use clock::{Clock, ManualClock, SystemClock};
pub use credentials::PasswordService;
pub use gate::{
    Admission, GateDecision, GateRequest, GateResponse, GateServices, RequestBody, Rejection,
    RoutePolicy, SecurityGate,
};
pub use identity::{AuthChannel, Identity, IdentityLookup, Role};
pub use jwt::{IssuedToken, TokenClaims, TokenVerifier};
pub use rate_limiting::{RateLimitBucket, RateLimitDecision, RateLimiter};
pub use rbac::{authorize, AuthorizationDecision, PermissionTable, Requirement};
pub use session::{InMemorySessionStore, SessionRecord, SessionStore};
pub use threat_detection::AnomalyScanner;

pub mod constants {
    use std::time::Duration;

    /// How often expired sessions and counters are purged
    pub const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(300); // 5 minutes
}

pub mod prelude {
    //! Common imports for wiring the gate

    pub use crate::{
        clock::{Clock, SystemClock},
        gate::{GateDecision, GateRequest, GateServices, RoutePolicy, SecurityGate},
        identity::{Identity, IdentityLookup, Role},
        rate_limiting::{API_BUCKET, AUTH_BUCKET, REGISTRATION_BUCKET},
        rbac::Requirement,
        GateConfig, SecurityError, SecurityResult,
    };

    pub use async_trait::async_trait;
}

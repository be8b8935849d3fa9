//! Server-side sessions and the session cookie.

use crate::clock::Clock;
use crate::config::SessionConfig;
use crate::errors::{SecurityError, SecurityResult};
use crate::identity::Identity;
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use http::header::COOKIE;
use http::HeaderMap;
use rand::{rngs::OsRng, RngCore};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// A live session. The cached identity is trusted as-is by the gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub session_id: String,
    pub identity: Identity,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Storage for [`SessionRecord`]s. Implementations own their I/O timeouts.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Start a new session for `identity`
    async fn create(&self, identity: Identity) -> SecurityResult<SessionRecord>;

    /// Load a live session, extending its expiry when sessions are rolling.
    /// Returns `None` when the id is unknown or expired.
    async fn touch(&self, session_id: &str) -> SecurityResult<Option<SessionRecord>>;

    /// End a session. Returns whether it existed.
    async fn destroy(&self, session_id: &str) -> SecurityResult<bool>;

    /// End every session of a subject, e.g. after a role change
    async fn destroy_subject(&self, subject_id: &str) -> SecurityResult<usize>;

    /// Remove expired sessions
    async fn purge_expired(&self) -> SecurityResult<usize>;
}

pub struct InMemorySessionStore {
    sessions: DashMap<String, SessionRecord>,
    ttl: chrono::Duration,
    rolling: bool,
    clock: Arc<dyn Clock>,
}

impl InMemorySessionStore {
    pub fn new(config: &SessionConfig, clock: Arc<dyn Clock>) -> SecurityResult<Self> {
        let ttl = chrono::Duration::from_std(config.ttl).map_err(|e| {
            SecurityError::Configuration(format!("Session TTL out of range: {}", e))
        })?;
        Ok(Self {
            sessions: DashMap::new(),
            ttl,
            rolling: config.rolling,
            clock,
        })
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn generate_session_id() -> String {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self, identity: Identity) -> SecurityResult<SessionRecord> {
        let now = self.clock.now();
        let record = SessionRecord {
            session_id: Self::generate_session_id(),
            identity,
            created_at: now,
            expires_at: now + self.ttl,
        };
        debug!(subject = %record.identity.subject_id, "Session created");
        self.sessions
            .insert(record.session_id.clone(), record.clone());
        Ok(record)
    }

    async fn touch(&self, session_id: &str) -> SecurityResult<Option<SessionRecord>> {
        let now = self.clock.now();
        let Some(mut entry) = self.sessions.get_mut(session_id) else {
            return Ok(None);
        };

        if now >= entry.expires_at {
            drop(entry);
            self.sessions.remove(session_id);
            debug!("Session expired");
            return Ok(None);
        }

        if self.rolling {
            entry.expires_at = now + self.ttl;
        }
        Ok(Some(entry.clone()))
    }

    async fn destroy(&self, session_id: &str) -> SecurityResult<bool> {
        Ok(self.sessions.remove(session_id).is_some())
    }

    async fn destroy_subject(&self, subject_id: &str) -> SecurityResult<usize> {
        let before = self.sessions.len();
        self.sessions
            .retain(|_, record| record.identity.subject_id != subject_id);
        Ok(before.saturating_sub(self.sessions.len()))
    }

    async fn purge_expired(&self) -> SecurityResult<usize> {
        let now = self.clock.now();
        let before = self.sessions.len();
        self.sessions.retain(|_, record| record.expires_at > now);
        Ok(before.saturating_sub(self.sessions.len()))
    }
}

/// Value of the named cookie in the request's `Cookie` headers
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim_matches('"').to_string())
        .filter(|value| !value.is_empty())
}

/// `Set-Cookie` value carrying a session id
pub fn session_cookie(config: &SessionConfig, session_id: &str) -> String {
    build_cookie(config, session_id, config.ttl.as_secs())
}

/// `Set-Cookie` value that removes the session cookie
pub fn clear_session_cookie(config: &SessionConfig) -> String {
    build_cookie(config, "", 0)
}

fn build_cookie(config: &SessionConfig, value: &str, max_age: u64) -> String {
    let mut cookie = format!(
        "{}={}; Path={}; Max-Age={}; SameSite={}",
        config.cookie_name,
        value,
        config.path,
        max_age,
        config.same_site.as_str()
    );
    if config.http_only {
        cookie.push_str("; HttpOnly");
    }
    if config.secure {
        cookie.push_str("; Secure");
    }
    cookie
}

//! Rate Limiting Module
//!
//! Fixed-window counters keyed by `"{bucket}:{requester}"`. Each key owns one
//! [`CounterEntry`]; the entry is replaced (not merged) when its window has ended.
//!
//! The fixed window has a known boundary effect: a burst of `max_requests` at the end of
//! one window followed by another burst at the start of the next admits up to
//! `2 * max_requests` inside any sliding interval of one window length.

use crate::clock::{Clock, SystemClock};
use crate::errors::{SecurityError, SecurityResult};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Strict bucket for credential submission
pub const AUTH_BUCKET: &str = "auth";
/// Account creation
pub const REGISTRATION_BUCKET: &str = "registration";
/// General API traffic
pub const API_BUCKET: &str = "api";

/// Where the requester part of a rate key comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KeySource {
    /// The client address
    #[default]
    ClientIp,
    /// The value of a request header, e.g. an API key
    Header { name: String },
}

/// A named rate-limit namespace with its own window and threshold
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitBucket {
    #[serde(with = "crate::config::duration_serde")]
    pub window: Duration,
    pub max_requests: u32,
    #[serde(default)]
    pub key: KeySource,
}

impl RateLimitBucket {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            window,
            max_requests,
            key: KeySource::ClientIp,
        }
    }

    pub fn keyed_by(mut self, key: KeySource) -> Self {
        self.key = key;
        self
    }
}

/// Outcome of a single counter check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

impl RateLimitDecision {
    /// Whole seconds until the window resets, rounded up and never below one
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> u64 {
        let millis = (self.reset_at - now).num_milliseconds().max(0) as u64;
        millis.div_ceil(1000).max(1)
    }
}

#[derive(Debug, Clone, Copy)]
struct CounterEntry {
    count: u32,
    window_reset_at: DateTime<Utc>,
}

/// In-memory fixed-window rate limiter.
///
/// Increments for one key are linearizable: the check-and-increment runs under the
/// DashMap shard lock for that key, so two concurrent requests can never both observe
/// the same pre-increment count.
#[derive(Debug)]
pub struct RateLimiter {
    counters: DashMap<String, CounterEntry>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            counters: DashMap::new(),
            clock,
        }
    }

    pub fn with_system_clock() -> Self {
        Self::new(Arc::new(SystemClock))
    }

    /// Compose the counter key for a bucket and requester
    pub fn rate_key(bucket: &str, requester: &str) -> String {
        format!("{}:{}", bucket, requester)
    }

    /// Count one request against `key` using the limiter's clock
    pub fn check(
        &self,
        key: &str,
        window: Duration,
        max_requests: u32,
    ) -> SecurityResult<RateLimitDecision> {
        self.check_at(key, window, max_requests, self.clock.now())
    }

    /// Count one request against `key` at the given instant
    pub fn check_at(
        &self,
        key: &str,
        window: Duration,
        max_requests: u32,
        now: DateTime<Utc>,
    ) -> SecurityResult<RateLimitDecision> {
        if key.is_empty() {
            return Err(SecurityError::Configuration(
                "Rate limit key must not be empty".to_string(),
            ));
        }
        if window.is_zero() || max_requests == 0 {
            return Err(SecurityError::Configuration(format!(
                "Invalid rate limit for '{}': window and maximum must be positive",
                key
            )));
        }
        let window = chrono::Duration::from_std(window).map_err(|e| {
            SecurityError::Configuration(format!("Rate limit window out of range: {}", e))
        })?;

        let fresh = CounterEntry {
            count: 1,
            window_reset_at: now + window,
        };

        let entry = match self.counters.entry(key.to_owned()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if now >= entry.window_reset_at {
                    *entry = fresh;
                } else {
                    entry.count = entry.count.saturating_add(1);
                }
                *entry
            }
            Entry::Vacant(vacant) => {
                vacant.insert(fresh);
                fresh
            }
        };

        let decision = RateLimitDecision {
            allowed: entry.count <= max_requests,
            limit: max_requests,
            remaining: max_requests.saturating_sub(entry.count),
            reset_at: entry.window_reset_at,
        };

        debug!(
            key = key,
            count = entry.count,
            allowed = decision.allowed,
            "Rate limit check"
        );

        Ok(decision)
    }

    /// Number of live counter entries
    pub fn tracked_keys(&self) -> usize {
        self.counters.len()
    }

    /// Live counter entries grouped by bucket name
    pub fn tracked_keys_by_bucket(&self) -> BTreeMap<String, usize> {
        let mut by_bucket = BTreeMap::new();
        for entry in self.counters.iter() {
            let bucket = entry
                .key()
                .split_once(':')
                .map(|(bucket, _)| bucket)
                .unwrap_or(entry.key().as_str());
            *by_bucket.entry(bucket.to_string()).or_insert(0) += 1;
        }
        by_bucket
    }

    /// Drop entries whose window has already ended. The next request for such a key
    /// would have replaced the entry anyway, so this never changes a decision.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.counters.len();
        self.counters.retain(|_, entry| entry.window_reset_at > now);
        let removed = before.saturating_sub(self.counters.len());
        if removed > 0 {
            debug!(removed = removed, "Purged expired rate limit counters");
        }
        removed
    }
}

//! Periodic cleanup of expired sessions and rate-limit counters

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::state::AppState;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PurgeReport {
    pub sessions: usize,
    pub counters: usize,
}

/// Run one purge pass
pub async fn purge(state: &AppState) -> PurgeReport {
    let sessions = match state.services.sessions.purge_expired().await {
        Ok(purged) => purged,
        Err(e) => {
            error!(error = %e, "Session purge failed");
            0
        }
    };
    let counters = state.services.limiter.purge_expired();

    debug!(sessions, counters, "Maintenance pass complete");
    PurgeReport { sessions, counters }
}

/// Purge on a fixed interval until the runtime shuts down
pub fn spawn(state: AppState, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        // The first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            purge(&state).await;
        }
    })
}

//! Session sweeper — removes sessions idle past the TTL.
//!
//! Runs every 10 minutes. Expired sessions are also deleted lazily on
//! access; the sweep bounds how long an untouched one can linger. Rate
//! limiter tables are pruned on the same cadence.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::store::sessions::SESSION_TTL_HOURS;
use crate::AppState;

const SWEEP_INTERVAL_SECS: u64 = 600;

pub fn start(state: Arc<AppState>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(tokio::time::Duration::from_secs(SWEEP_INTERVAL_SECS));

        tracing::info!(
            "Session sweeper started (every {}s, TTL {}h)",
            SWEEP_INTERVAL_SECS,
            SESSION_TTL_HOURS
        );

        loop {
            interval.tick().await;

            let removed = state.sessions.sweep();
            if removed > 0 {
                tracing::info!(count = removed, "Session sweeper: removed idle sessions");
            }

            state.login_limiter.prune();
            state.wake_limiter.prune();
        }
    })
}

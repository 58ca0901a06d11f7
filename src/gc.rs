//! Background stale/disconnect sweep for C5, run as a periodic liftoff task
//! the same way the reference crate runs its own retention sweep.

use std::sync::Arc;
use std::time::Duration;

use crate::session_manager::SessionManager;

const SWEEP_INTERVAL_SECS: u64 = 10;

pub fn spawn_session_gc(sessions: Arc<SessionManager>) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(SWEEP_INTERVAL_SECS)).await;
            match sessions.check_stale_sessions(None) {
                Ok(transitioned) if !transitioned.is_empty() => {
                    tracing::debug!(count = transitioned.len(), "gc: sessions marked stale");
                }
                Ok(_) => {}
                Err(err) => tracing::error!(error = %err, "gc: stale sweep failed"),
            }
            match sessions.cleanup_expired_sessions(None) {
                Ok(disconnected) if !disconnected.is_empty() => {
                    tracing::info!(count = disconnected.len(), "gc: sessions disconnected by gc");
                }
                Ok(_) => {}
                Err(err) => tracing::error!(error = %err, "gc: disconnect sweep failed"),
            }
        }
    });
}

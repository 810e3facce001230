//! Background sweeps: lock expiry, stale presence, idle throttler reap.
//!
//! Each runs on its own interval against every currently active project,
//! rather than piggybacking on a connection's own activity, so a project
//! with no further traffic still gets its locks and presence cleaned up.

use crate::session::SessionRegistry;
use chrono::{Duration, Utc};
use collab_config::CollabConfig;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Spawns the three maintenance sweeps as background tasks, all cooperating
/// with `shutdown` the same way the connection handlers do.
pub fn spawn_sweeps(registry: Arc<SessionRegistry>, config: Arc<CollabConfig>, shutdown: CancellationToken) {
    tokio::spawn(sweep_locks(registry.clone(), config.clone(), shutdown.clone()));
    tokio::spawn(sweep_presence(registry.clone(), config.clone(), shutdown.clone()));
    tokio::spawn(sweep_throttlers(registry, config, shutdown));
}

async fn sweep_locks(registry: Arc<SessionRegistry>, config: Arc<CollabConfig>, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(config.lock.sweep_interval_secs));
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = ticker.tick() => {
                let now = Utc::now();
                for handle in registry.project_handles() {
                    let mut state = handle.lock().await;
                    let released = state.cleanup_expired_locks(now);
                    for lock in released {
                        registry.observer().lock_released(state.project_id, &lock.resource_id, "timeout");
                    }
                }
            }
        }
    }
}

async fn sweep_presence(registry: Arc<SessionRegistry>, config: Arc<CollabConfig>, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(config.presence.sweep_interval_secs));
    let stale_after = Duration::seconds(config.presence.stale_secs as i64);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = ticker.tick() => {
                let now = Utc::now();
                for handle in registry.project_handles() {
                    let mut state = handle.lock().await;
                    let left = state.cleanup_stale_presence(now, stale_after);
                    for presence in left {
                        registry.observer().presence_left(state.project_id, presence.user_id, "timeout");
                    }
                }
            }
        }
    }
}

async fn sweep_throttlers(registry: Arc<SessionRegistry>, config: Arc<CollabConfig>, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(30));
    let idle_after = Duration::seconds(config.throttle.idle_reap_secs as i64);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = ticker.tick() => {
                let now = Utc::now();
                for handle in registry.project_handles() {
                    let mut state = handle.lock().await;
                    state.reap_idle_throttlers(now, idle_after);
                }
            }
        }
    }
}

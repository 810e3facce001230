//! The narrow, fire-and-forget telemetry sink the rest of the core talks to.
//!
//! External collaborator, accessed only through this trait — nothing here
//! blocks or returns a value the caller waits on.

use uuid::Uuid;

/// Structured observability events the coordination plane reports.
///
/// A no-op implementation is a valid `Observer`; the default,
/// [`TracingObserver`], just forwards to `tracing`.
pub trait Observer: Send + Sync {
    fn connection_registered(&self, project_id: Uuid, socket_id: Uuid, client_id: Uuid);
    fn connection_unregistered(&self, project_id: Uuid, socket_id: Uuid);
    fn event_processed(&self, project_id: Uuid, event_id: Uuid, seq: u64);
    fn event_duplicate(&self, project_id: Uuid, event_id: Uuid, seq: u64);
    fn lock_acquired(&self, project_id: Uuid, resource_id: &str, holder: Uuid);
    fn lock_denied(&self, project_id: Uuid, resource_id: &str, holder: Uuid);
    fn lock_released(&self, project_id: Uuid, resource_id: &str, reason: &str);
    fn presence_joined(&self, project_id: Uuid, user_id: Uuid, color: &str);
    fn presence_left(&self, project_id: Uuid, user_id: Uuid, reason: &str);
    fn param_batch_flushed(&self, project_id: Uuid, plugin_id: &str, param_count: usize);
    fn param_batch_rate_limited(&self, project_id: Uuid, plugin_id: &str);
    fn dispatch_error(&self, project_id: Uuid, code: &str, message: &str);
}

/// Forwards every observed event to `tracing` at an appropriate level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn connection_registered(&self, project_id: Uuid, socket_id: Uuid, client_id: Uuid) {
        tracing::info!(%project_id, %socket_id, %client_id, "connection registered");
    }

    fn connection_unregistered(&self, project_id: Uuid, socket_id: Uuid) {
        tracing::info!(%project_id, %socket_id, "connection unregistered");
    }

    fn event_processed(&self, project_id: Uuid, event_id: Uuid, seq: u64) {
        tracing::debug!(%project_id, %event_id, seq, "event processed");
    }

    fn event_duplicate(&self, project_id: Uuid, event_id: Uuid, seq: u64) {
        tracing::debug!(%project_id, %event_id, seq, "duplicate event suppressed");
    }

    fn lock_acquired(&self, project_id: Uuid, resource_id: &str, holder: Uuid) {
        tracing::debug!(%project_id, resource_id, %holder, "lock acquired");
    }

    fn lock_denied(&self, project_id: Uuid, resource_id: &str, holder: Uuid) {
        tracing::debug!(%project_id, resource_id, %holder, "lock denied, already held");
    }

    fn lock_released(&self, project_id: Uuid, resource_id: &str, reason: &str) {
        tracing::debug!(%project_id, resource_id, reason, "lock released");
    }

    fn presence_joined(&self, project_id: Uuid, user_id: Uuid, color: &str) {
        tracing::debug!(%project_id, %user_id, color, "presence joined");
    }

    fn presence_left(&self, project_id: Uuid, user_id: Uuid, reason: &str) {
        tracing::debug!(%project_id, %user_id, reason, "presence left");
    }

    fn param_batch_flushed(&self, project_id: Uuid, plugin_id: &str, param_count: usize) {
        tracing::debug!(%project_id, plugin_id, param_count, "param batch flushed");
    }

    fn param_batch_rate_limited(&self, project_id: Uuid, plugin_id: &str) {
        tracing::warn!(%project_id, plugin_id, "param batch rate limited, pending discarded");
    }

    fn dispatch_error(&self, project_id: Uuid, code: &str, message: &str) {
        tracing::warn!(%project_id, code, message, "dispatch error");
    }
}

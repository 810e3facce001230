//! Parameter-change throttler (C6): per-plugin coalescing and rate limiting
//! of `plugin.param_change` into `plugin.param_batch` events.
//!
//! A throttler only exists for a plugin while its lock is held; queueing
//! requires the caller to hold that lock, and a flush silently discards its
//! pending batch if the lock was lost in the meantime rather than emitting
//! orphaned changes.

use crate::session::{BroadcastOpts, ProjectSessionState};
use chrono::{DateTime, Duration, Utc};
use collab_proto::{EventEnvelope, EventKind, ResourceType};
use uuid::Uuid;

/// Tuning for the coalescing window and rate limit, threaded in from config.
#[derive(Debug, Clone, Copy)]
pub struct ThrottlePolicy {
    pub interval: Duration,
    pub max_flush_per_sec: u32,
    pub max_pending_changes: usize,
}

/// What the caller should do after queueing a param change.
pub enum QueueOutcome {
    /// Coalesced into the pending batch; a flush should be scheduled after
    /// this delay unless one is already pending (`None`).
    Scheduled { flush_in: Option<std::time::Duration> },
    /// Pending batch hit `max_pending_changes` and was flushed inline.
    /// `None` means the flush was discarded by the rate limiter.
    FlushedImmediately(Option<EventEnvelope>),
    /// The caller does not hold the plugin's lock.
    NotLockHolder,
}

impl ProjectSessionState {
    /// `QueueParamChange`: caller must hold the plugin's lock.
    pub fn queue_param_change(
        &mut self,
        plugin_id: &str,
        param_id: &str,
        value: serde_json::Value,
        actor_id: Uuid,
        client_id: Uuid,
        policy: ThrottlePolicy,
    ) -> QueueOutcome {
        if !self.lock_held_by(ResourceType::Plugin, plugin_id, client_id) {
            return QueueOutcome::NotLockHolder;
        }

        let now = Utc::now();
        let throttler = self
            .throttlers
            .entry(plugin_id.to_string())
            .or_insert_with(|| crate::session::ThrottlerState::new(now));
        throttler.pending.insert(param_id.to_string(), (value, now));
        throttler.last_activity = now;
        throttler.locked_by = Some((actor_id, client_id));

        if throttler.pending.len() >= policy.max_pending_changes {
            return QueueOutcome::FlushedImmediately(self.flush_plugin_params(plugin_id, policy, now));
        }

        if self.throttlers.get(plugin_id).map(|t| t.flush_scheduled).unwrap_or(false) {
            return QueueOutcome::Scheduled { flush_in: None };
        }

        let throttler = self.throttlers.get_mut(plugin_id).expect("just inserted");
        throttler.flush_scheduled = true;
        let elapsed = now - throttler.last_flush_at;
        let remaining = policy.interval - elapsed;
        let flush_in = if remaining > Duration::zero() {
            remaining.to_std().unwrap_or(std::time::Duration::ZERO)
        } else {
            std::time::Duration::ZERO
        };
        QueueOutcome::Scheduled { flush_in: Some(flush_in) }
    }

    /// Flushes a plugin's pending batch, called either inline (pending hit
    /// capacity) or by the timer the caller scheduled from `QueueOutcome`.
    ///
    /// Returns `None` if there is nothing to flush, the lock was lost since
    /// queueing, or the rolling rate limit rejected the flush — in all three
    /// cases the pending batch is discarded, never retried.
    pub fn flush_plugin_params(
        &mut self,
        plugin_id: &str,
        policy: ThrottlePolicy,
        now: DateTime<Utc>,
    ) -> Option<EventEnvelope> {
        let Some(throttler) = self.throttlers.get_mut(plugin_id) else {
            return None;
        };
        throttler.flush_scheduled = false;

        if throttler.pending.is_empty() {
            return None;
        }

        let Some((actor_id, client_id)) = throttler.locked_by else {
            throttler.pending.clear();
            return None;
        };
        if !self.lock_held_by(ResourceType::Plugin, plugin_id, client_id) {
            let throttler = self.throttlers.get_mut(plugin_id).expect("checked above");
            throttler.pending.clear();
            return None;
        }

        let throttler = self.throttlers.get_mut(plugin_id).expect("checked above");
        if now - throttler.window_start >= Duration::seconds(1) {
            throttler.window_start = now;
            throttler.flush_count_in_window = 0;
        }
        if throttler.flush_count_in_window >= policy.max_flush_per_sec {
            throttler.pending.clear();
            return None;
        }
        throttler.flush_count_in_window += 1;
        throttler.last_flush_at = now;

        let mut params = serde_json::Map::with_capacity(throttler.pending.len());
        let mut latest: Option<DateTime<Utc>> = None;
        for (param_id, (value, ts)) in throttler.pending.drain() {
            latest = Some(latest.map_or(ts, |cur| cur.max(ts)));
            params.insert(param_id, value);
        }
        let timestamp = latest.unwrap_or(now);

        let event = EventEnvelope {
            event_id: Uuid::new_v4(),
            project_id: self.project_id,
            actor_id,
            client_id,
            seq: None,
            sent_at: now,
            received_at: None,
            kind: EventKind::new("plugin.param_batch"),
            version: "1.0".to_string(),
            payload: serde_json::json!({
                "plugin_id": plugin_id,
                "batch_id": Uuid::new_v4(),
                "params": params,
                "timestamp": timestamp,
            }),
        }
        .stamped(self.next_seq(), now);

        self.mark_processed(event.event_id);
        self.broadcast_event(
            &event,
            BroadcastOpts {
                exclude_socket: None,
                sender_client_id: Some(client_id),
                echo_to_sender: false,
            },
        );

        Some(event)
    }

    /// Removes throttler state for plugins idle longer than `idle_after`.
    /// Does not flush: an idle throttler by definition has no pending batch
    /// worth emitting (a non-empty batch keeps `last_activity` fresh).
    pub fn reap_idle_throttlers(&mut self, now: DateTime<Utc>, idle_after: Duration) {
        self.throttlers
            .retain(|_, throttler| now - throttler.last_activity <= idle_after);
    }
}

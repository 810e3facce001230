//! Lock manager (C5): exclusive leases on {clip,track,plugin,selection};
//! heartbeat; auto-release on disconnect/timeout.

use crate::session::{BroadcastOpts, ProjectSessionState};
use chrono::{DateTime, Duration, Utc};
use collab_proto::{Lock, LockBroadcastAction, LockData, LockReleaseReason, LockRequestAction, ResourceType};
use uuid::Uuid;

/// Tuning for the lease clock, threaded in from config rather than hardcoded
/// so tests can use short durations.
#[derive(Debug, Clone, Copy)]
pub struct LeasePolicy {
    pub lease_ttl: Duration,
    pub max_duration: Duration,
}

/// Outcome of an `Acquire` call.
pub enum AcquireOutcome {
    Granted(Lock),
    Denied { held_by: Lock },
}

/// Outcome of a `Heartbeat` call.
pub enum HeartbeatOutcome {
    /// Lease extended.
    Renewed,
    /// Lock existed and was held by the caller, but `MAX_LOCK_DURATION` had
    /// already been reached; force-released instead of extended.
    ForceReleased,
    /// No such lock, or held by a different client.
    Denied,
}

impl ProjectSessionState {
    /// `Acquire`: extends the caller's own lease if they already hold the
    /// key, denies if another client holds it, else grants a fresh lock.
    pub fn acquire_lock(
        &mut self,
        resource_type: ResourceType,
        resource_id: String,
        holder_user_id: Uuid,
        holder_client_id: Uuid,
        holder_display_name: Option<String>,
        policy: LeasePolicy,
    ) -> AcquireOutcome {
        let key = (resource_type, resource_id.clone());
        let now = Utc::now();

        if let Some(existing) = self.locks.get(&key) {
            if existing.holder_client_id == holder_client_id {
                let extended = self.extend_lock(&key, now, policy);
                return AcquireOutcome::Granted(extended);
            }
            return AcquireOutcome::Denied {
                held_by: existing.clone(),
            };
        }

        let lock = Lock {
            lock_id: Uuid::new_v4(),
            project_id: self.project_id,
            resource_type,
            resource_id,
            holder_user_id,
            holder_client_id,
            holder_display_name,
            acquired_at: now,
            expires_at: now + policy.lease_ttl,
            reason: None,
        };
        self.locks.insert(key, lock.clone());
        self.broadcast_lock_change(LockBroadcastAction::Acquired, Some(lock.clone()), None);
        AcquireOutcome::Granted(lock)
    }

    fn extend_lock(&mut self, key: &(ResourceType, String), now: DateTime<Utc>, policy: LeasePolicy) -> Lock {
        let lock = self.locks.get_mut(key).expect("key checked by caller");
        let cap = lock.acquired_at + policy.max_duration;
        lock.expires_at = (now + policy.lease_ttl).min(cap);
        let updated = lock.clone();
        self.broadcast_lock_change(LockBroadcastAction::Acquired, Some(updated.clone()), None);
        updated
    }

    /// `Release`: only the holder may release.
    pub fn release_lock(
        &mut self,
        resource_type: ResourceType,
        resource_id: &str,
        requester_client_id: Uuid,
    ) -> bool {
        let key = (resource_type, resource_id.to_string());
        let Some(lock) = self.locks.get(&key) else {
            return false;
        };
        if lock.holder_client_id != requester_client_id {
            return false;
        }
        let mut released = self.locks.remove(&key).expect("checked above");
        released.reason = Some(LockReleaseReason::Explicit);
        self.broadcast_lock_change(
            LockBroadcastAction::Released,
            Some(released),
            Some(LockReleaseReason::Explicit),
        );
        true
    }

    /// `Heartbeat`: denied if no such lock or holder mismatch; force-released
    /// if the lock has hit `MAX_LOCK_DURATION`; else renewed.
    pub fn heartbeat_lock(
        &mut self,
        resource_type: ResourceType,
        resource_id: &str,
        requester_client_id: Uuid,
        policy: LeasePolicy,
    ) -> HeartbeatOutcome {
        let key = (resource_type, resource_id.to_string());
        let now = Utc::now();

        let Some(lock) = self.locks.get(&key) else {
            return HeartbeatOutcome::Denied;
        };
        if lock.holder_client_id != requester_client_id {
            return HeartbeatOutcome::Denied;
        }
        if now - lock.acquired_at >= policy.max_duration {
            let mut expired = self.locks.remove(&key).expect("checked above");
            expired.reason = Some(LockReleaseReason::Timeout);
            self.broadcast_lock_change(
                LockBroadcastAction::Released,
                Some(expired),
                Some(LockReleaseReason::Timeout),
            );
            return HeartbeatOutcome::ForceReleased;
        }

        self.extend_lock(&key, now, policy);
        HeartbeatOutcome::Renewed
    }

    /// `ReleaseAllForClient`: used on disconnect. Broadcasts each release.
    pub fn release_all_for_client(&mut self, client_id: Uuid, reason: LockReleaseReason) -> Vec<Lock> {
        let keys: Vec<(ResourceType, String)> = self
            .locks
            .iter()
            .filter(|(_, lock)| lock.holder_client_id == client_id)
            .map(|(key, _)| key.clone())
            .collect();

        let mut released = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(mut lock) = self.locks.remove(&key) {
                lock.reason = Some(reason);
                self.broadcast_lock_change(LockBroadcastAction::Released, Some(lock.clone()), Some(reason));
                released.push(lock);
            }
        }
        released
    }

    /// Sweep: any lock with `now >= expires_at` is released with reason
    /// `timeout`.
    pub fn cleanup_expired_locks(&mut self, now: DateTime<Utc>) -> Vec<Lock> {
        let keys: Vec<(ResourceType, String)> = self
            .locks
            .iter()
            .filter(|(_, lock)| now >= lock.expires_at)
            .map(|(key, _)| key.clone())
            .collect();

        let mut released = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(mut lock) = self.locks.remove(&key) {
                lock.reason = Some(LockReleaseReason::Timeout);
                self.broadcast_lock_change(
                    LockBroadcastAction::Released,
                    Some(lock.clone()),
                    Some(LockReleaseReason::Timeout),
                );
                released.push(lock);
            }
        }
        released
    }

    pub fn lock_snapshot(&self) -> Vec<Lock> {
        self.locks.values().cloned().collect()
    }

    pub fn lock_held_by(&self, resource_type: ResourceType, resource_id: &str, client_id: Uuid) -> bool {
        self.locks
            .get(&(resource_type, resource_id.to_string()))
            .map(|lock| lock.holder_client_id == client_id)
            .unwrap_or(false)
    }

    fn broadcast_lock_change(
        &self,
        action: LockBroadcastAction,
        changed_lock: Option<Lock>,
        reason: Option<LockReleaseReason>,
    ) {
        self.broadcast(
            collab_proto::Outbound::Lock(LockData {
                action,
                locks: self.lock_snapshot(),
                changed_lock,
                reason,
            }),
            BroadcastOpts::default(),
        );
    }
}

/// Maps a [`LockRequestAction`] onto the three primitive operations above.
/// Kept here (rather than in dispatch.rs) since it is purely a lock-manager
/// concern.
pub fn action_name(action: LockRequestAction) -> &'static str {
    match action {
        LockRequestAction::Acquire => "acquire",
        LockRequestAction::Release => "release",
        LockRequestAction::Heartbeat => "heartbeat",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> LeasePolicy {
        LeasePolicy {
            lease_ttl: Duration::seconds(15),
            max_duration: Duration::seconds(300),
        }
    }

    #[test]
    fn acquire_then_release_then_acquire_both_grant() {
        let mut state = crate::session::test_support::empty_project_state();
        let client = Uuid::new_v4();
        let user = Uuid::new_v4();

        let first = state.acquire_lock(ResourceType::Clip, "x".into(), user, client, None, policy());
        assert!(matches!(first, AcquireOutcome::Granted(_)));
        assert!(state.release_lock(ResourceType::Clip, "x", client));
        assert!(!state.lock_held_by(ResourceType::Clip, "x", client));

        let second = state.acquire_lock(ResourceType::Clip, "x".into(), user, client, None, policy());
        assert!(matches!(second, AcquireOutcome::Granted(_)));
    }

    #[test]
    fn acquire_by_other_client_is_denied() {
        let mut state = crate::session::test_support::empty_project_state();
        let (client_a, client_b) = (Uuid::new_v4(), Uuid::new_v4());
        let user_a = Uuid::new_v4();

        state.acquire_lock(ResourceType::Track, "y".into(), user_a, client_a, None, policy());
        let outcome = state.acquire_lock(ResourceType::Track, "y".into(), Uuid::new_v4(), client_b, None, policy());
        assert!(matches!(outcome, AcquireOutcome::Denied { .. }));
    }

    #[test]
    fn heartbeat_fails_and_force_releases_past_max_duration() {
        let mut state = crate::session::test_support::empty_project_state();
        let client = Uuid::new_v4();
        let short_policy = LeasePolicy {
            lease_ttl: Duration::seconds(15),
            max_duration: Duration::seconds(300),
        };
        state.acquire_lock(ResourceType::Plugin, "p".into(), Uuid::new_v4(), client, None, short_policy);

        // Force the lock to look old enough to exceed max_duration.
        if let Some(lock) = state.locks.get_mut(&(ResourceType::Plugin, "p".to_string())) {
            lock.acquired_at = Utc::now() - Duration::seconds(301);
        }

        let outcome = state.heartbeat_lock(ResourceType::Plugin, "p", client, short_policy);
        assert!(matches!(outcome, HeartbeatOutcome::ForceReleased));
        assert!(!state.lock_held_by(ResourceType::Plugin, "p", client));
    }

    #[test]
    fn release_all_for_client_only_touches_their_locks() {
        let mut state = crate::session::test_support::empty_project_state();
        let (client_a, client_b) = (Uuid::new_v4(), Uuid::new_v4());
        state.acquire_lock(ResourceType::Clip, "a".into(), Uuid::new_v4(), client_a, None, policy());
        state.acquire_lock(ResourceType::Clip, "b".into(), Uuid::new_v4(), client_b, None, policy());

        let released = state.release_all_for_client(client_a, LockReleaseReason::Disconnect);
        assert_eq!(released.len(), 1);
        assert!(state.lock_held_by(ResourceType::Clip, "b", client_b));
    }

    #[test]
    fn cleanup_expired_only_removes_past_expiry() {
        let mut state = crate::session::test_support::empty_project_state();
        let client = Uuid::new_v4();
        state.acquire_lock(ResourceType::Selection, "s".into(), Uuid::new_v4(), client, None, policy());
        if let Some(lock) = state.locks.get_mut(&(ResourceType::Selection, "s".to_string())) {
            lock.expires_at = Utc::now() - Duration::seconds(1);
        }
        let expired = state.cleanup_expired_locks(Utc::now());
        assert_eq!(expired.len(), 1);
    }
}

//! Lock entity and the inbound `lock` request shapes (C5).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The kind of resource a lock guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Clip,
    Track,
    Plugin,
    Selection,
}

/// Why a lock was released or force-released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockReleaseReason {
    Explicit,
    Timeout,
    Disconnect,
}

/// An exclusive lease on `(project_id, resource_type, resource_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lock {
    pub lock_id: Uuid,
    pub project_id: Uuid,
    pub resource_type: ResourceType,
    pub resource_id: String,
    pub holder_user_id: Uuid,
    pub holder_client_id: Uuid,
    #[serde(default)]
    pub holder_display_name: Option<String>,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub reason: Option<LockReleaseReason>,
}

impl Lock {
    /// The key a lock is uniquely identified by within a project.
    pub fn key(&self) -> (ResourceType, &str) {
        (self.resource_type, &self.resource_id)
    }
}

/// The action carried by an inbound `lock` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockRequestAction {
    Acquire,
    Release,
    Heartbeat,
}

/// Inbound `lock.data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockRequest {
    pub action: LockRequestAction,
    pub resource_type: ResourceType,
    pub resource_id: String,
}

/// Identity of the current holder, surfaced to a requester denied a lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockHolder {
    pub user_id: Uuid,
    pub client_id: Uuid,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl From<&Lock> for LockHolder {
    fn from(lock: &Lock) -> Self {
        Self {
            user_id: lock.holder_user_id,
            client_id: lock.holder_client_id,
            display_name: lock.holder_display_name.clone(),
        }
    }
}

/// Outbound `lock` broadcast kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockBroadcastAction {
    Sync,
    Acquired,
    Released,
}

/// Outbound `lock.data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockData {
    pub action: LockBroadcastAction,
    pub locks: Vec<Lock>,
    #[serde(default, rename = "changedLock", skip_serializing_if = "Option::is_none")]
    pub changed_lock: Option<Lock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<LockReleaseReason>,
}

/// Outbound `lock_response.data`: the direct reply to a requester.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockResponseData {
    pub action: LockRequestAction,
    pub resource_type: ResourceType,
    pub resource_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub granted: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock: Option<Lock>,
    #[serde(default, rename = "heldBy", skip_serializing_if = "Option::is_none")]
    pub held_by: Option<LockHolder>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_key_is_resource_scoped() {
        let lock = Lock {
            lock_id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            resource_type: ResourceType::Clip,
            resource_id: "clip-1".to_string(),
            holder_user_id: Uuid::new_v4(),
            holder_client_id: Uuid::new_v4(),
            holder_display_name: None,
            acquired_at: Utc::now(),
            expires_at: Utc::now(),
            reason: None,
        };
        assert_eq!(lock.key(), (ResourceType::Clip, "clip-1"));
    }

    #[test]
    fn holder_conversion_carries_identity() {
        let lock = Lock {
            lock_id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            resource_type: ResourceType::Track,
            resource_id: "track-1".to_string(),
            holder_user_id: Uuid::new_v4(),
            holder_client_id: Uuid::new_v4(),
            holder_display_name: Some("Ada".to_string()),
            acquired_at: Utc::now(),
            expires_at: Utc::now(),
            reason: None,
        };
        let holder: LockHolder = (&lock).into();
        assert_eq!(holder.user_id, lock.holder_user_id);
        assert_eq!(holder.display_name.as_deref(), Some("Ada"));
    }
}

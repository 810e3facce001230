//! Presence entity and the inbound `presence` request shapes (C4).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a participant is currently doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activity {
    Idle,
    Editing,
    Playing,
    Recording,
    Dragging,
}

impl Default for Activity {
    fn default() -> Self {
        Self::Idle
    }
}

/// A participant's visible state within a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Presence {
    pub user_id: Uuid,
    pub client_id: Uuid,
    pub display_name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    pub color: String,
    #[serde(default)]
    pub cursor_position: Option<serde_json::Value>,
    #[serde(default)]
    pub playhead_position: Option<f64>,
    #[serde(default)]
    pub selected_track_id: Option<String>,
    #[serde(default)]
    pub selected_clip_ids: Option<Vec<String>>,
    pub activity: Activity,
    pub last_seen: DateTime<Utc>,
    pub joined_at: DateTime<Utc>,
}

/// The action carried by an inbound `presence` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceRequestAction {
    Join,
    Leave,
    Update,
}

/// Inbound `presence` payload. Fields are interpreted according to
/// `action`: `join` reads `display_name`/`avatar_url`, `update` merges
/// whichever optional fields are present, `leave` reads none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceRequest {
    pub action: PresenceRequestAction,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub cursor_position: Option<serde_json::Value>,
    #[serde(default)]
    pub playhead_position: Option<f64>,
    #[serde(default)]
    pub selected_track_id: Option<String>,
    #[serde(default)]
    pub selected_clip_ids: Option<Vec<String>>,
    #[serde(default)]
    pub activity: Option<Activity>,
}

/// Merges the non-null fields of an `update` request into a stored
/// `Presence`, the way C4's `Update` operation does.
pub fn apply_update(presence: &mut Presence, delta: &PresenceRequest) {
    if let Some(cursor) = &delta.cursor_position {
        presence.cursor_position = Some(cursor.clone());
    }
    if let Some(playhead) = delta.playhead_position {
        presence.playhead_position = Some(playhead);
    }
    if let Some(track_id) = &delta.selected_track_id {
        presence.selected_track_id = Some(track_id.clone());
    }
    if let Some(clip_ids) = &delta.selected_clip_ids {
        presence.selected_clip_ids = Some(clip_ids.clone());
    }
    if let Some(activity) = delta.activity {
        presence.activity = activity;
    }
}

/// Outbound `presence` broadcast kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceBroadcastAction {
    Sync,
    Join,
    Leave,
    Update,
}

/// Outbound `presence.data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceData {
    pub action: PresenceBroadcastAction,
    pub users: Vec<Presence>,
    #[serde(default, rename = "updatedUser", skip_serializing_if = "Option::is_none")]
    pub updated_user: Option<Presence>,
}

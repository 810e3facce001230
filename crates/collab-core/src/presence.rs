//! Presence tracker (C4): membership, cursor/playhead/selection, color
//! assignment, stale GC.

use crate::session::{BroadcastOpts, ProjectSessionState};
use chrono::{DateTime, Utc};
use collab_proto::{
    apply_update, Activity, Presence, PresenceBroadcastAction, PresenceData, PresenceRequest,
};
use uuid::Uuid;

/// Why a presence entry was removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveReason {
    Explicit,
    Timeout,
    Disconnect,
}

impl LeaveReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Explicit => "explicit",
            Self::Timeout => "timeout",
            Self::Disconnect => "disconnect",
        }
    }
}

impl ProjectSessionState {
    /// Assigns a stable-per-`(project,user)` color: reuse the user's prior
    /// color if one was ever assigned in this session, else take the first
    /// unused palette entry, else wrap around.
    fn assign_color(&mut self, user_id: Uuid, palette: &[String]) -> String {
        if let Some(existing) = self.presence_colors.get(&user_id) {
            return existing.clone();
        }
        let used: std::collections::HashSet<&String> = self.presence_colors.values().collect();
        let color = palette
            .iter()
            .find(|c| !used.contains(c))
            .cloned()
            .unwrap_or_else(|| palette[self.presence_colors.len() % palette.len().max(1)].clone());
        self.presence_colors.insert(user_id, color.clone());
        color
    }

    /// `Join`: creates a `Presence`, broadcasts it to existing peers, and
    /// returns it (plus the full current membership) so the caller can send
    /// sync snapshots to the joiner.
    pub fn join(
        &mut self,
        user_id: Uuid,
        client_id: Uuid,
        display_name: String,
        avatar_url: Option<String>,
        palette: &[String],
    ) -> Presence {
        let color = self.assign_color(user_id, palette);
        let now = Utc::now();
        let presence = Presence {
            user_id,
            client_id,
            display_name,
            avatar_url,
            color,
            cursor_position: None,
            playhead_position: None,
            selected_track_id: None,
            selected_clip_ids: None,
            activity: Activity::Idle,
            last_seen: now,
            joined_at: now,
        };
        self.presence.insert(client_id, presence.clone());

        self.broadcast(
            collab_proto::Outbound::Presence(PresenceData {
                action: PresenceBroadcastAction::Join,
                users: self.presence.values().cloned().collect(),
                updated_user: Some(presence.clone()),
            }),
            BroadcastOpts {
                exclude_socket: None,
                sender_client_id: Some(client_id),
                echo_to_sender: false,
            },
        );

        presence
    }

    /// `Leave`: removes the entry and broadcasts the updated membership. If
    /// the project empties of presence entries, color assignments are
    /// discarded along with them (they live in the same map-of-maps).
    pub fn leave(&mut self, client_id: Uuid, reason: LeaveReason) -> Option<Presence> {
        let removed = self.presence.remove(&client_id)?;

        self.broadcast(
            collab_proto::Outbound::Presence(PresenceData {
                action: PresenceBroadcastAction::Leave,
                users: self.presence.values().cloned().collect(),
                updated_user: Some(Presence {
                    ..removed.clone()
                }),
            }),
            BroadcastOpts::default(),
        );

        if self.presence.is_empty() {
            self.presence_colors.clear();
        }

        let _ = reason;
        Some(removed)
    }

    /// `Update`: merges non-null fields of `delta` into the stored presence
    /// and broadcasts to peers, excluding the updater.
    pub fn update_presence(&mut self, client_id: Uuid, delta: &PresenceRequest) -> Option<Presence> {
        let presence = self.presence.get_mut(&client_id)?;
        apply_update(presence, delta);
        presence.last_seen = Utc::now();
        let updated = presence.clone();

        self.broadcast(
            collab_proto::Outbound::Presence(PresenceData {
                action: PresenceBroadcastAction::Update,
                users: self.presence.values().cloned().collect(),
                updated_user: Some(updated.clone()),
            }),
            BroadcastOpts {
                exclude_socket: None,
                sender_client_id: Some(client_id),
                echo_to_sender: false,
            },
        );

        Some(updated)
    }

    /// Snapshot of current membership, for a `sync` reply or a fresh
    /// joiner's initial push.
    pub fn presence_snapshot(&self) -> Vec<Presence> {
        self.presence.values().cloned().collect()
    }

    /// Leaves, with reason `timeout`, any presence entry whose `last_seen`
    /// is older than `stale_after`.
    pub fn cleanup_stale_presence(&mut self, now: DateTime<Utc>, stale_after: chrono::Duration) -> Vec<Presence> {
        let stale_clients: Vec<Uuid> = self
            .presence
            .iter()
            .filter(|(_, p)| now - p.last_seen > stale_after)
            .map(|(client_id, _)| *client_id)
            .collect();

        stale_clients
            .into_iter()
            .filter_map(|client_id| self.leave(client_id, LeaveReason::Timeout))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn palette() -> Vec<String> {
        vec!["#111".to_string(), "#222".to_string(), "#333".to_string()]
    }

    #[test]
    fn join_assigns_stable_color_for_same_user() {
        let mut state =
            crate::session::test_support::empty_project_state();
        let user = Uuid::new_v4();
        let p1 = state.join(user, Uuid::new_v4(), "A".into(), None, &palette());
        let p2 = state.join(user, Uuid::new_v4(), "A-second-tab".into(), None, &palette());
        assert_eq!(p1.color, p2.color);
    }

    #[test]
    fn different_users_get_different_colors_until_palette_exhausted() {
        let mut state =
            crate::session::test_support::empty_project_state();
        let colors: Vec<String> = (0..3)
            .map(|_| state.join(Uuid::new_v4(), Uuid::new_v4(), "U".into(), None, &palette()).color)
            .collect();
        let unique: std::collections::HashSet<_> = colors.iter().collect();
        assert_eq!(unique.len(), 3);
    }

    #[test]
    fn leave_clears_colors_once_project_empties() {
        let mut state =
            crate::session::test_support::empty_project_state();
        let user = Uuid::new_v4();
        let client = Uuid::new_v4();
        state.join(user, client, "A".into(), None, &palette());
        state.leave(client, LeaveReason::Explicit);
        assert!(state.presence_colors.is_empty());
    }

    #[test]
    fn update_merges_delta_without_clobbering_other_fields() {
        let mut state =
            crate::session::test_support::empty_project_state();
        let client = Uuid::new_v4();
        state.join(Uuid::new_v4(), client, "A".into(), None, &palette());

        let delta = PresenceRequest {
            action: collab_proto::PresenceRequestAction::Update,
            display_name: None,
            avatar_url: None,
            cursor_position: None,
            playhead_position: Some(4.0),
            selected_track_id: None,
            selected_clip_ids: None,
            activity: Some(Activity::Editing),
        };
        let updated = state.update_presence(client, &delta).unwrap();
        assert_eq!(updated.playhead_position, Some(4.0));
        assert_eq!(updated.display_name, "A");
    }

    #[test]
    fn cleanup_stale_leaves_old_entries_only() {
        let mut state =
            crate::session::test_support::empty_project_state();
        let fresh_client = Uuid::new_v4();
        let stale_client = Uuid::new_v4();
        state.join(Uuid::new_v4(), fresh_client, "Fresh".into(), None, &palette());
        state.join(Uuid::new_v4(), stale_client, "Stale".into(), None, &palette());
        if let Some(p) = state.presence.get_mut(&stale_client) {
            p.last_seen = Utc::now() - chrono::Duration::seconds(60);
        }

        let left = state.cleanup_stale_presence(Utc::now(), chrono::Duration::seconds(30));
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].client_id, stale_client);
        assert!(state.presence.contains_key(&fresh_client));
    }
}

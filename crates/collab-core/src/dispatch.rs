//! Dispatcher (C7): the single reader of a decoded inbound frame, routing it
//! to C3/C4/C5/C6 and producing the reply/broadcast the caller should send.
//!
//! The dispatcher never touches a socket directly — [`crate::ws`] owns I/O
//! and calls [`dispatch`] once per decoded frame under the project's lock
//! (via [`crate::session::SessionRegistry::with_project`]).

use crate::lock::{AcquireOutcome, HeartbeatOutcome, LeasePolicy};
use crate::observer::Observer;
use crate::presence::LeaveReason;
use crate::session::{BroadcastOpts, EventOutcome, ProjectSessionState};
use crate::throttle::{QueueOutcome, ThrottlePolicy};
use chrono::Utc;
use collab_proto::{
    AckData, ErrorCode, ErrorData, EventEnvelope, Inbound, LockBroadcastAction, LockData,
    LockHolder, LockRequestAction, LockResponseData, Outbound, PongData, PresenceBroadcastAction,
    PresenceData, PresenceRequestAction, SyncRequest,
};
use uuid::Uuid;

/// The caller's view of one connection, needed to authorize and address a
/// frame without the dispatcher reaching into [`crate::session::Connection`]
/// directly.
#[derive(Debug, Clone, Copy)]
pub struct DispatchContext {
    pub socket_id: Uuid,
    pub client_id: Uuid,
    pub user_id: Uuid,
    pub project_id: Uuid,
    pub can_edit: bool,
}

/// Policy knobs the dispatcher threads down into C5/C6.
#[derive(Debug, Clone, Copy)]
pub struct DispatchPolicy {
    pub lease: LeasePolicy,
    pub throttle: ThrottlePolicy,
}

/// What [`dispatch`] wants the caller to do: reply to the sender only, or
/// nothing further (everything needed was already broadcast by the C3/C4/C5
/// methods dispatch called, which address their own peers).
pub enum DispatchEffect {
    /// Send this message back to the sender alone.
    ReplyToSender(Outbound),
    /// Send each of these back to the sender alone, in order — used where
    /// the spec calls for more than one sender-directed push (a presence
    /// join's presence+lock sync, or an explicit `sync` request's).
    ReplyManyToSender(Vec<Outbound>),
    /// Already fully handled (broadcasts were sent by the called component).
    Handled,
    /// Reply to the sender, and have the caller schedule a deferred flush of
    /// `plugin_id`'s pending param batch after `delay` elapses (C6 leaves
    /// timer ownership to the caller so the session state never spawns its
    /// own tasks).
    ReplyAndScheduleFlush {
        reply: Outbound,
        plugin_id: String,
        delay: std::time::Duration,
    },
}

/// Routes one decoded inbound frame. Must be called with the project's lock
/// held (i.e. from inside [`crate::session::SessionRegistry::with_project`]).
/// `color_palette` is only consulted for a `presence.join`.
pub fn dispatch(
    state: &mut ProjectSessionState,
    ctx: DispatchContext,
    message: Inbound,
    policy: DispatchPolicy,
    color_palette: &[String],
    observer: &dyn Observer,
) -> DispatchEffect {
    match message {
        Inbound::Ping(_) => DispatchEffect::ReplyToSender(Outbound::Pong(PongData { timestamp: Utc::now() })),

        Inbound::Event(event) => dispatch_event(state, ctx, event, policy, observer),

        Inbound::Presence(request) => dispatch_presence(state, ctx, request, color_palette, observer),

        Inbound::Lock(request) => dispatch_lock(state, ctx, request, policy.lease, observer),

        Inbound::Sync(request) => dispatch_sync(state, ctx, request),
    }
}

fn dispatch_event(
    state: &mut ProjectSessionState,
    ctx: DispatchContext,
    event: EventEnvelope,
    policy: DispatchPolicy,
    observer: &dyn Observer,
) -> DispatchEffect {
    if !ctx.can_edit {
        return DispatchEffect::ReplyToSender(Outbound::error_for_event(
            ErrorCode::Forbidden,
            "connection is read-only",
            event.event_id,
        ));
    }
    if event.project_id != ctx.project_id {
        return DispatchEffect::ReplyToSender(Outbound::error_for_event(
            ErrorCode::ProjectMismatch,
            "event.project_id does not match this connection",
            event.event_id,
        ));
    }
    if event.actor_id != ctx.user_id {
        return DispatchEffect::ReplyToSender(Outbound::error_for_event(
            ErrorCode::ActorMismatch,
            "event.actor_id does not match the authenticated user",
            event.event_id,
        ));
    }

    if event.kind.is_param_change() {
        return dispatch_param_change(state, ctx, event, policy.throttle, observer);
    }

    match process_inbound_event(state, ctx, event, observer) {
        EventOutcome::Duplicate { event_id, seq } => DispatchEffect::ReplyToSender(Outbound::Ack(AckData {
            event_id,
            seq,
            received_at: Utc::now(),
        })),
        EventOutcome::Processed { event } => DispatchEffect::ReplyToSender(Outbound::Ack(AckData {
            event_id: event.event_id,
            seq: event.seq.unwrap_or_default(),
            received_at: event.received_at.unwrap_or_else(Utc::now),
        })),
    }
}

/// The C3 processing path: dup-check, seq-assign, mark-processed, broadcast.
fn process_inbound_event(
    state: &mut ProjectSessionState,
    ctx: DispatchContext,
    event: EventEnvelope,
    observer: &dyn Observer,
) -> EventOutcome {
    if state.is_duplicate(event.event_id) {
        let seq = state.current_seq();
        observer.event_duplicate(ctx.project_id, event.event_id, seq);
        return EventOutcome::Duplicate { event_id: event.event_id, seq };
    }

    let seq = state.next_seq();
    let stamped = event.stamped(seq, Utc::now());
    state.mark_processed(stamped.event_id);
    state.broadcast_event(
        &stamped,
        BroadcastOpts {
            exclude_socket: Some(ctx.socket_id),
            sender_client_id: None,
            echo_to_sender: false,
        },
    );
    observer.event_processed(ctx.project_id, stamped.event_id, seq);
    EventOutcome::Processed { event: stamped }
}

fn dispatch_param_change(
    state: &mut ProjectSessionState,
    ctx: DispatchContext,
    event: EventEnvelope,
    throttle_policy: ThrottlePolicy,
    observer: &dyn Observer,
) -> DispatchEffect {
    let Some(plugin_id) = event.payload.get("plugin_id").and_then(|v| v.as_str()) else {
        return DispatchEffect::ReplyToSender(Outbound::error_for_event(
            ErrorCode::InvalidPayload,
            "plugin.param_change payload missing plugin_id",
            event.event_id,
        ));
    };
    let Some(param_id) = event.payload.get("param_id").and_then(|v| v.as_str()) else {
        return DispatchEffect::ReplyToSender(Outbound::error_for_event(
            ErrorCode::InvalidPayload,
            "plugin.param_change payload missing param_id",
            event.event_id,
        ));
    };
    let value = event.payload.get("value").cloned().unwrap_or(serde_json::Value::Null);
    let plugin_id = plugin_id.to_string();
    let param_id = param_id.to_string();

    let ack = Outbound::Ack(AckData {
        event_id: event.event_id,
        seq: state.current_seq(),
        received_at: Utc::now(),
    });

    match state.queue_param_change(&plugin_id, &param_id, value, ctx.user_id, ctx.client_id, throttle_policy) {
        QueueOutcome::NotLockHolder => DispatchEffect::ReplyToSender(Outbound::error_for_event(
            ErrorCode::Conflict,
            "caller does not hold the plugin's lock",
            event.event_id,
        )),
        QueueOutcome::Scheduled { flush_in: Some(delay) } => DispatchEffect::ReplyAndScheduleFlush {
            reply: ack,
            plugin_id,
            delay,
        },
        QueueOutcome::Scheduled { flush_in: None } => DispatchEffect::ReplyToSender(ack),
        QueueOutcome::FlushedImmediately(flushed) => {
            log_flush_outcome(observer, ctx.project_id, &plugin_id, flushed.as_ref());
            DispatchEffect::ReplyToSender(ack)
        }
    }
}

/// Reports a flush to the observer: `param_batch_flushed` if one actually
/// went out, `param_batch_rate_limited` if the rolling cap discarded it.
pub(crate) fn log_flush_outcome(observer: &dyn Observer, project_id: Uuid, plugin_id: &str, flushed: Option<&EventEnvelope>) {
    match flushed {
        Some(event) => {
            let param_count = event.payload.get("params").and_then(|p| p.as_object()).map(|m| m.len()).unwrap_or(0);
            observer.param_batch_flushed(project_id, plugin_id, param_count);
        }
        None => observer.param_batch_rate_limited(project_id, plugin_id),
    }
}

fn dispatch_presence(
    state: &mut ProjectSessionState,
    ctx: DispatchContext,
    request: collab_proto::PresenceRequest,
    color_palette: &[String],
    observer: &dyn Observer,
) -> DispatchEffect {
    match request.action {
        PresenceRequestAction::Join => {
            let display_name = request.display_name.unwrap_or_default();
            let presence = state.join(ctx.user_id, ctx.client_id, display_name, request.avatar_url, color_palette);
            observer.presence_joined(ctx.project_id, ctx.user_id, &presence.color);
            DispatchEffect::ReplyManyToSender(vec![
                Outbound::Presence(PresenceData {
                    action: PresenceBroadcastAction::Sync,
                    users: state.presence_snapshot(),
                    updated_user: Some(presence),
                }),
                lock_sync(state),
            ])
        }
        PresenceRequestAction::Leave => {
            state.leave(ctx.client_id, LeaveReason::Explicit);
            DispatchEffect::Handled
        }
        PresenceRequestAction::Update => {
            state.update_presence(ctx.client_id, &request);
            DispatchEffect::Handled
        }
    }
}

fn dispatch_lock(
    state: &mut ProjectSessionState,
    ctx: DispatchContext,
    request: collab_proto::LockRequest,
    lease: LeasePolicy,
    observer: &dyn Observer,
) -> DispatchEffect {
    if !ctx.can_edit {
        return DispatchEffect::ReplyToSender(Outbound::LockResponse(LockResponseData {
            action: request.action,
            resource_type: request.resource_type,
            resource_id: request.resource_id,
            granted: Some(false),
            success: Some(false),
            lock: None,
            held_by: None,
            error: Some(ErrorCode::Forbidden.as_str().to_string()),
        }));
    }

    match request.action {
        LockRequestAction::Acquire => {
            let outcome = state.acquire_lock(
                request.resource_type,
                request.resource_id.clone(),
                ctx.user_id,
                ctx.client_id,
                None,
                lease,
            );
            let response = match outcome {
                AcquireOutcome::Granted(lock) => {
                    observer.lock_acquired(ctx.project_id, &lock.resource_id, lock.holder_user_id);
                    LockResponseData {
                        action: LockRequestAction::Acquire,
                        resource_type: request.resource_type,
                        resource_id: request.resource_id,
                        granted: Some(true),
                        success: Some(true),
                        lock: Some(lock),
                        held_by: None,
                        error: None,
                    }
                }
                AcquireOutcome::Denied { held_by } => {
                    observer.lock_denied(ctx.project_id, &request.resource_id, held_by.holder_user_id);
                    LockResponseData {
                        action: LockRequestAction::Acquire,
                        resource_type: request.resource_type,
                        resource_id: request.resource_id,
                        granted: Some(false),
                        success: Some(false),
                        lock: None,
                        held_by: Some(LockHolder::from(&held_by)),
                        error: Some(ErrorCode::Conflict.as_str().to_string()),
                    }
                }
            };
            DispatchEffect::ReplyToSender(Outbound::LockResponse(response))
        }
        LockRequestAction::Release => {
            let success = state.release_lock(request.resource_type, &request.resource_id, ctx.client_id);
            if success {
                observer.lock_released(ctx.project_id, &request.resource_id, "explicit");
            }
            DispatchEffect::ReplyToSender(Outbound::LockResponse(LockResponseData {
                action: LockRequestAction::Release,
                resource_type: request.resource_type,
                resource_id: request.resource_id,
                granted: None,
                success: Some(success),
                lock: None,
                held_by: None,
                error: if success { None } else { Some(ErrorCode::Forbidden.as_str().to_string()) },
            }))
        }
        LockRequestAction::Heartbeat => {
            let outcome = state.heartbeat_lock(request.resource_type, &request.resource_id, ctx.client_id, lease);
            if matches!(outcome, HeartbeatOutcome::ForceReleased) {
                observer.lock_released(ctx.project_id, &request.resource_id, "max_duration_exceeded");
            }
            let success = matches!(outcome, HeartbeatOutcome::Renewed);
            DispatchEffect::ReplyToSender(Outbound::LockResponse(LockResponseData {
                action: LockRequestAction::Heartbeat,
                resource_type: request.resource_type,
                resource_id: request.resource_id,
                granted: None,
                success: Some(success),
                lock: None,
                held_by: None,
                error: if success { None } else { Some(ErrorCode::Forbidden.as_str().to_string()) },
            }))
        }
    }
}

fn dispatch_sync(state: &mut ProjectSessionState, _ctx: DispatchContext, request: SyncRequest) -> DispatchEffect {
    if request.since_seq.is_some() {
        return DispatchEffect::ReplyToSender(Outbound::error(
            ErrorCode::NotImplemented,
            "event replay via since_seq is not supported",
        ));
    }

    DispatchEffect::ReplyManyToSender(vec![
        Outbound::Presence(PresenceData {
            action: PresenceBroadcastAction::Sync,
            users: state.presence_snapshot(),
            updated_user: None,
        }),
        lock_sync(state),
    ])
}

/// Builds the `lock` sync snapshot pushed alongside a presence `join` and a
/// `sync` request — the full per-project lock list, action `sync`.
fn lock_sync(state: &ProjectSessionState) -> Outbound {
    Outbound::Lock(LockData {
        action: LockBroadcastAction::Sync,
        locks: state.lock_snapshot(),
        changed_lock: None,
        reason: None,
    })
}

/// Disconnect teardown, in the order the operations doc specifies: presence
/// leave, then lock release, then (by the caller) registry unregister.
pub fn handle_disconnect(state: &mut ProjectSessionState, client_id: Uuid, observer: &dyn Observer) {
    let project_id = state.project_id;
    if let Some(presence) = state.leave(client_id, LeaveReason::Disconnect) {
        observer.presence_left(project_id, presence.user_id, LeaveReason::Disconnect.as_str());
    }
    for lock in state.release_all_for_client(client_id, collab_proto::LockReleaseReason::Disconnect) {
        observer.lock_released(project_id, &lock.resource_id, "disconnect");
    }
}

/// Maps an unrecognized outer `type` discriminant, already rejected by the
/// codec, onto the wire error code. Kept here since [`crate::ws`] is the
/// only caller and it is a dispatch-level concern, not a codec one.
pub fn error_for_decode_failure(err: &collab_proto::CodecError) -> ErrorData {
    ErrorData::new(err.code(), err.to_string())
        .with_event_id(err.event_id().unwrap_or_else(Uuid::nil))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::LeasePolicy;
    use crate::observer::TracingObserver;
    use chrono::Duration;
    use collab_proto::{Activity, EventKind, LockRequest, PresenceRequest};

    fn observer() -> TracingObserver {
        TracingObserver
    }

    fn policy() -> DispatchPolicy {
        DispatchPolicy {
            lease: LeasePolicy {
                lease_ttl: Duration::seconds(15),
                max_duration: Duration::seconds(300),
            },
            throttle: ThrottlePolicy {
                interval: Duration::milliseconds(33),
                max_flush_per_sec: 30,
                max_pending_changes: 50,
            },
        }
    }

    fn ctx(project_id: Uuid, user_id: Uuid, client_id: Uuid) -> DispatchContext {
        DispatchContext {
            socket_id: Uuid::new_v4(),
            client_id,
            user_id,
            project_id,
            can_edit: true,
        }
    }

    fn sample_event(project_id: Uuid, user_id: Uuid, client_id: Uuid) -> EventEnvelope {
        EventEnvelope {
            event_id: Uuid::new_v4(),
            project_id,
            actor_id: user_id,
            client_id,
            seq: None,
            sent_at: Utc::now(),
            received_at: None,
            kind: EventKind::new("clip.add"),
            version: "1.0".to_string(),
            payload: serde_json::json!({}),
        }
    }

    #[test]
    fn ping_replies_with_pong() {
        let mut state = crate::session::test_support::empty_project_state();
        let project_id = Uuid::new_v4();
        let c = ctx(project_id, Uuid::new_v4(), Uuid::new_v4());
        let effect = dispatch(&mut state, c, Inbound::Ping(collab_proto::Empty {}), policy(), &[], &observer());
        assert!(matches!(effect, DispatchEffect::ReplyToSender(Outbound::Pong(_))));
    }

    #[test]
    fn event_with_mismatched_project_is_rejected() {
        let mut state = crate::session::test_support::empty_project_state();
        let project_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let client_id = Uuid::new_v4();
        let c = ctx(project_id, user_id, client_id);
        let mut event = sample_event(project_id, user_id, client_id);
        event.project_id = Uuid::new_v4();

        let effect = dispatch(&mut state, c, Inbound::Event(event), policy(), &[], &observer());
        match effect {
            DispatchEffect::ReplyToSender(Outbound::Error(err)) => {
                assert_eq!(err.code, ErrorCode::ProjectMismatch);
            }
            _ => panic!("expected a project mismatch error"),
        }
    }

    #[test]
    fn duplicate_event_is_acked_without_reprocessing() {
        let mut state = crate::session::test_support::empty_project_state();
        let project_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let client_id = Uuid::new_v4();
        let c = ctx(project_id, user_id, client_id);
        let event = sample_event(project_id, user_id, client_id);

        let first = dispatch(&mut state, c, Inbound::Event(event.clone()), policy(), &[], &observer());
        let first_seq = match first {
            DispatchEffect::ReplyToSender(Outbound::Ack(ack)) => ack.seq,
            _ => panic!("expected an ack"),
        };

        let second = dispatch(&mut state, c, Inbound::Event(event), policy(), &[], &observer());
        match second {
            DispatchEffect::ReplyToSender(Outbound::Ack(ack)) => assert_eq!(ack.seq, first_seq),
            _ => panic!("expected an ack"),
        }
        assert_eq!(state.current_seq(), first_seq);
    }

    #[test]
    fn lock_acquire_then_conflicting_acquire_is_denied() {
        let mut state = crate::session::test_support::empty_project_state();
        let project_id = Uuid::new_v4();
        let c1 = ctx(project_id, Uuid::new_v4(), Uuid::new_v4());
        let c2 = ctx(project_id, Uuid::new_v4(), Uuid::new_v4());
        let req = LockRequest {
            action: LockRequestAction::Acquire,
            resource_type: collab_proto::ResourceType::Clip,
            resource_id: "clip-1".to_string(),
        };

        let first = dispatch(&mut state, c1, Inbound::Lock(req.clone()), policy(), &[], &observer());
        assert!(matches!(
            first,
            DispatchEffect::ReplyToSender(Outbound::LockResponse(LockResponseData { granted: Some(true), .. }))
        ));

        let second = dispatch(&mut state, c2, Inbound::Lock(req), policy(), &[], &observer());
        match second {
            DispatchEffect::ReplyToSender(Outbound::LockResponse(resp)) => {
                assert_eq!(resp.granted, Some(false));
                assert!(resp.held_by.is_some());
            }
            _ => panic!("expected a lock response"),
        }
    }

    #[test]
    fn param_change_without_lock_is_conflict() {
        let mut state = crate::session::test_support::empty_project_state();
        let project_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let client_id = Uuid::new_v4();
        let c = ctx(project_id, user_id, client_id);
        let mut event = sample_event(project_id, user_id, client_id);
        event.kind = EventKind::new("plugin.param_change");
        event.payload = serde_json::json!({"plugin_id": "synth-1", "param_id": "cutoff", "value": 0.5});

        let effect = dispatch(&mut state, c, Inbound::Event(event), policy(), &[], &observer());
        match effect {
            DispatchEffect::ReplyToSender(Outbound::Error(err)) => assert_eq!(err.code, ErrorCode::Conflict),
            _ => panic!("expected a conflict error"),
        }
    }

    #[test]
    fn disconnect_releases_presence_and_locks() {
        let mut state = crate::session::test_support::empty_project_state();
        let user_id = Uuid::new_v4();
        let client_id = Uuid::new_v4();
        state.join(user_id, client_id, "Ada".to_string(), None, &["#fff".to_string()]);
        state.acquire_lock(
            collab_proto::ResourceType::Clip,
            "clip-1".to_string(),
            user_id,
            client_id,
            None,
            policy().lease,
        );

        handle_disconnect(&mut state, client_id, &observer());
        assert!(state.presence_snapshot().is_empty());
        assert!(!state.lock_held_by(collab_proto::ResourceType::Clip, "clip-1", client_id));
    }

    #[test]
    fn sync_with_since_seq_is_not_implemented() {
        let mut state = crate::session::test_support::empty_project_state();
        let project_id = Uuid::new_v4();
        let c = ctx(project_id, Uuid::new_v4(), Uuid::new_v4());
        let effect = dispatch(&mut state, c, Inbound::Sync(SyncRequest { since_seq: Some(5) }), policy(), &[], &observer());
        match effect {
            DispatchEffect::ReplyToSender(Outbound::Error(err)) => assert_eq!(err.code, ErrorCode::NotImplemented),
            _ => panic!("expected NOT_IMPLEMENTED"),
        }
    }

    #[test]
    fn sync_without_since_seq_pushes_presence_and_lock_snapshots() {
        let mut state = crate::session::test_support::empty_project_state();
        let project_id = Uuid::new_v4();
        let c = ctx(project_id, Uuid::new_v4(), Uuid::new_v4());
        let effect = dispatch(&mut state, c, Inbound::Sync(SyncRequest { since_seq: None }), policy(), &[], &observer());
        match effect {
            DispatchEffect::ReplyManyToSender(messages) => {
                assert!(messages.iter().any(|m| matches!(m, Outbound::Presence(_))));
                assert!(messages.iter().any(|m| matches!(m, Outbound::Lock(_))));
            }
            _ => panic!("expected presence and lock snapshots"),
        }
    }

    #[test]
    fn presence_join_pushes_presence_and_lock_snapshots() {
        let mut state = crate::session::test_support::empty_project_state();
        let project_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let client_id = Uuid::new_v4();
        let c = ctx(project_id, user_id, client_id);
        let request = PresenceRequest {
            action: PresenceRequestAction::Join,
            display_name: Some("Ada".to_string()),
            avatar_url: None,
            cursor_position: None,
            playhead_position: None,
            selected_track_id: None,
            selected_clip_ids: None,
            activity: None,
        };
        let effect = dispatch(&mut state, c, Inbound::Presence(request), policy(), &["#fff".to_string()], &observer());
        match effect {
            DispatchEffect::ReplyManyToSender(messages) => {
                assert!(messages.iter().any(|m| matches!(m, Outbound::Presence(_))));
                assert!(messages.iter().any(|m| matches!(m, Outbound::Lock(_))));
            }
            _ => panic!("expected presence and lock snapshots"),
        }
    }

    #[test]
    fn presence_update_acknowledges_via_handled() {
        let mut state = crate::session::test_support::empty_project_state();
        let project_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let client_id = Uuid::new_v4();
        let c = ctx(project_id, user_id, client_id);
        state.join(user_id, client_id, "Ada".to_string(), None, &["#fff".to_string()]);

        let request = PresenceRequest {
            action: PresenceRequestAction::Update,
            display_name: None,
            avatar_url: None,
            cursor_position: None,
            playhead_position: Some(2.0),
            selected_track_id: None,
            selected_clip_ids: None,
            activity: Some(Activity::Playing),
        };
        let effect = dispatch(&mut state, c, Inbound::Presence(request), policy(), &[], &observer());
        assert!(matches!(effect, DispatchEffect::Handled));
    }
}

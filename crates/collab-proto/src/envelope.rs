//! The envelope codec (C1): the single choke point for wire deserialization.
//!
//! Downstream components never touch raw JSON; they consume `Inbound`
//! values that have already passed shape and structural validation.

use crate::error::CodecError;
use crate::message::{Inbound, Outbound};

/// The outer `type` discriminants the dispatcher accepts. Kept in lockstep
/// with [`Inbound`]'s variants.
const KNOWN_MESSAGE_TYPES: &[&str] = &["ping", "event", "presence", "lock", "sync"];
const KNOWN_PRESENCE_ACTIONS: &[&str] = &["join", "leave", "update"];
const KNOWN_LOCK_ACTIONS: &[&str] = &["acquire", "release", "heartbeat"];

/// Decode and validate one inbound frame.
///
/// Rejects anything that is not a `{type: string, data: object}` shape with
/// [`CodecError::InvalidShape`]; rejects an outer `type` or a `presence`/
/// `lock` `action` this build doesn't know about with the matching
/// `Unknown*` variant rather than letting it fall through to a generic
/// [`CodecError::Parse`]; rejects structurally invalid `event` payloads with
/// [`CodecError::Validation`].
pub fn decode_inbound(raw: &str) -> Result<Inbound, CodecError> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| CodecError::Parse(e.to_string()))?;

    let type_name = value
        .as_object()
        .and_then(|obj| obj.get("type"))
        .and_then(|t| t.as_str());
    let data = value
        .as_object()
        .and_then(|obj| obj.get("data"))
        .and_then(|d| d.as_object());
    let (Some(type_name), Some(data)) = (type_name, data) else {
        return Err(CodecError::InvalidShape);
    };

    if !KNOWN_MESSAGE_TYPES.contains(&type_name) {
        return Err(CodecError::UnknownMessageType(type_name.to_string()));
    }

    if let Some(action) = data.get("action").and_then(|a| a.as_str()) {
        match type_name {
            "presence" if !KNOWN_PRESENCE_ACTIONS.contains(&action) => {
                return Err(CodecError::UnknownPresenceAction(action.to_string()));
            }
            "lock" if !KNOWN_LOCK_ACTIONS.contains(&action) => {
                return Err(CodecError::UnknownLockAction(action.to_string()));
            }
            _ => {}
        }
    }

    let inbound: Inbound =
        serde_json::from_value(value).map_err(|e| CodecError::Parse(e.to_string()))?;

    if let Inbound::Event(ref event) = inbound {
        validate_event(event)?;
    }

    Ok(inbound)
}

fn validate_event(event: &crate::event::EventEnvelope) -> Result<(), CodecError> {
    if event.version != "1.0" {
        return Err(CodecError::Validation {
            event_id: Some(event.event_id),
            message: format!("unsupported event version {:?}", event.version),
        });
    }
    if !event.kind.is_valid() {
        return Err(CodecError::Validation {
            event_id: Some(event.event_id),
            message: format!("unknown event type {:?}", event.kind.as_str()),
        });
    }
    validate_payload_shape(event)
}

/// The fields each event kind's `payload` must carry. `track.*` and
/// `transport.*` are prefix families with no fields of their own beyond the
/// envelope; everything else names a closed set of required keys.
fn required_payload_fields(kind: &str) -> &'static [&'static str] {
    match kind {
        "clip.add" => &["track_id", "clip_id"],
        "clip.move" => &["clip_id"],
        "clip.delete" => &["clip_id"],
        "plugin.add" => &["track_id", "plugin_id"],
        "plugin.update" => &["plugin_id"],
        "plugin.delete" => &["plugin_id"],
        "plugin.reorder" => &["track_id"],
        "plugin.param_change" => &["plugin_id", "param_id", "value"],
        "plugin.param_batch" => &["plugin_id", "batch_id", "params", "timestamp"],
        _ => &[],
    }
}

fn validate_payload_shape(event: &crate::event::EventEnvelope) -> Result<(), CodecError> {
    let Some(payload) = event.payload.as_object() else {
        return Err(CodecError::Validation {
            event_id: Some(event.event_id),
            message: "payload must be an object".to_string(),
        });
    };

    for field in required_payload_fields(event.kind.as_str()) {
        match payload.get(*field) {
            Some(value) if !value.is_null() => {}
            _ => {
                return Err(CodecError::Validation {
                    event_id: Some(event.event_id),
                    message: format!("{} payload missing required field {field:?}", event.kind.as_str()),
                });
            }
        }
    }
    Ok(())
}

/// Serialize one outbound message. This never fails: every `Outbound`
/// variant is built from already-valid in-memory state.
pub fn encode_outbound(message: &Outbound) -> String {
    serde_json::to_string(message).expect("Outbound values are always serializable")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn rejects_non_object_frame() {
        let err = decode_inbound("[1,2,3]").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidMessage);
    }

    #[test]
    fn rejects_missing_data_field() {
        let err = decode_inbound(r#"{"type":"ping"}"#).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidMessage);
    }

    #[test]
    fn accepts_well_formed_ping() {
        let inbound = decode_inbound(r#"{"type":"ping","data":{}}"#).unwrap();
        assert!(matches!(inbound, Inbound::Ping(_)));
    }

    #[test]
    fn rejects_event_with_bad_version() {
        let raw = r#"{"type":"event","data":{
            "event_id":"11111111-1111-1111-1111-111111111111",
            "project_id":"22222222-2222-2222-2222-222222222222",
            "actor_id":"33333333-3333-3333-3333-333333333333",
            "client_id":"44444444-4444-4444-4444-444444444444",
            "sent_at":"2024-01-01T00:00:00Z",
            "type":"clip.add",
            "version":"2.0",
            "payload":{}
        }}"#;
        let err = decode_inbound(raw).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);
    }

    #[test]
    fn rejects_event_with_unknown_kind() {
        let raw = r#"{"type":"event","data":{
            "event_id":"11111111-1111-1111-1111-111111111111",
            "project_id":"22222222-2222-2222-2222-222222222222",
            "actor_id":"33333333-3333-3333-3333-333333333333",
            "client_id":"44444444-4444-4444-4444-444444444444",
            "sent_at":"2024-01-01T00:00:00Z",
            "type":"bogus.kind",
            "version":"1.0",
            "payload":{}
        }}"#;
        let err = decode_inbound(raw).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);
    }

    #[test]
    fn accepts_well_formed_event() {
        let raw = r#"{"type":"event","data":{
            "event_id":"11111111-1111-1111-1111-111111111111",
            "project_id":"22222222-2222-2222-2222-222222222222",
            "actor_id":"33333333-3333-3333-3333-333333333333",
            "client_id":"44444444-4444-4444-4444-444444444444",
            "sent_at":"2024-01-01T00:00:00Z",
            "type":"clip.add",
            "version":"1.0",
            "payload":{"track_id":"t1","clip_id":"c1"}
        }}"#;
        let inbound = decode_inbound(raw).unwrap();
        assert!(matches!(inbound, Inbound::Event(_)));
    }

    #[test]
    fn rejects_event_missing_required_payload_field() {
        let raw = r#"{"type":"event","data":{
            "event_id":"11111111-1111-1111-1111-111111111111",
            "project_id":"22222222-2222-2222-2222-222222222222",
            "actor_id":"33333333-3333-3333-3333-333333333333",
            "client_id":"44444444-4444-4444-4444-444444444444",
            "sent_at":"2024-01-01T00:00:00Z",
            "type":"clip.add",
            "version":"1.0",
            "payload":{"track_id":"t1"}
        }}"#;
        let err = decode_inbound(raw).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);
    }

    #[test]
    fn rejects_unknown_message_type() {
        let err = decode_inbound(r#"{"type":"teleport","data":{}}"#).unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnknownMessageType);
    }

    #[test]
    fn rejects_unknown_presence_action() {
        let err = decode_inbound(r#"{"type":"presence","data":{"action":"teleport"}}"#).unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnknownPresenceAction);
    }

    #[test]
    fn rejects_unknown_lock_action() {
        let raw = r#"{"type":"lock","data":{"action":"steal","resource_type":"clip","resource_id":"c1"}}"#;
        let err = decode_inbound(raw).unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnknownLockAction);
    }

    #[test]
    fn accepts_transport_family_with_empty_payload() {
        let raw = r#"{"type":"event","data":{
            "event_id":"11111111-1111-1111-1111-111111111111",
            "project_id":"22222222-2222-2222-2222-222222222222",
            "actor_id":"33333333-3333-3333-3333-333333333333",
            "client_id":"44444444-4444-4444-4444-444444444444",
            "sent_at":"2024-01-01T00:00:00Z",
            "type":"transport.play",
            "version":"1.0",
            "payload":{}
        }}"#;
        let inbound = decode_inbound(raw).unwrap();
        assert!(matches!(inbound, Inbound::Event(_)));
    }
}

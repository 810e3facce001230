//! The outer `{type, data}` envelope and the typed messages it carries.

use crate::error::ErrorCode;
use crate::event::EventEnvelope;
use crate::lock::{LockData, LockRequest, LockResponseData};
use crate::presence::{PresenceData, PresenceRequest};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Empty payload for messages that carry no meaningful data, e.g. `ping`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Empty {}

/// Inbound `sync.data`. `since_seq` is accepted on the wire but always
/// answered with `NOT_IMPLEMENTED` — replay is out of scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRequest {
    #[serde(default)]
    pub since_seq: Option<u64>,
}

/// Every inbound message shape the dispatcher (C7) accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Inbound {
    Ping(Empty),
    Event(EventEnvelope),
    Presence(PresenceRequest),
    Lock(LockRequest),
    Sync(SyncRequest),
}

/// Outbound `connected.data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectedData {
    pub socket_id: Uuid,
    pub project_id: Uuid,
    pub client_id: Uuid,
    pub can_edit: bool,
    pub timestamp: DateTime<Utc>,
}

/// Outbound `ack.data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckData {
    pub event_id: Uuid,
    pub seq: u64,
    pub received_at: DateTime<Utc>,
}

/// Outbound `error.data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorData {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
}

impl ErrorData {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            event_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_event_id(mut self, event_id: Uuid) -> Self {
        self.event_id = Some(event_id);
        self
    }
}

/// Outbound `pong.data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PongData {
    pub timestamp: DateTime<Utc>,
}

/// Every outbound message shape the core ever sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Outbound {
    Connected(ConnectedData),
    Ack(AckData),
    Error(ErrorData),
    Pong(PongData),
    Event(EventEnvelope),
    Presence(PresenceData),
    Lock(LockData),
    LockResponse(LockResponseData),
}

impl Outbound {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error(ErrorData::new(code, message))
    }

    pub fn error_for_event(code: ErrorCode, message: impl Into<String>, event_id: Uuid) -> Self {
        Self::Error(ErrorData::new(code, message).with_event_id(event_id))
    }
}

//! collab-proto — wire protocol types for the DAW collaboration core.
//!
//! This crate defines the message shapes exchanged between a browser client
//! and the coordination plane over a persistent message channel. It does no
//! I/O: the only thing it knows how to do is decode a raw frame into a typed
//! [`message::Inbound`] value (or reject it) and encode a typed
//! [`message::Outbound`] value back to wire bytes.

pub mod envelope;
pub mod error;
pub mod event;
pub mod lock;
pub mod message;
pub mod presence;

pub use envelope::{decode_inbound, encode_outbound};
pub use error::{CodecError, ErrorCode};
pub use event::{EventEnvelope, EventKind};
pub use lock::{
    Lock, LockBroadcastAction, LockData, LockHolder, LockReleaseReason, LockRequest,
    LockRequestAction, LockResponseData, ResourceType,
};
pub use message::{
    AckData, ConnectedData, Empty, ErrorData, Inbound, Outbound, PongData, SyncRequest,
};
pub use presence::{
    apply_update, Activity, Presence, PresenceBroadcastAction, PresenceData, PresenceRequest,
    PresenceRequestAction,
};

//! Client-visible error codes and the codec's own error type.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The closed set of error codes the core ever sends to a client.
///
/// `NoToken`..`NotACollaborator` are handshake-fatal (the channel closes with
/// code `4001`); everything else is reported as an `error` frame while the
/// channel stays open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NoToken,
    BadToken,
    ProjectNotFound,
    NotACollaborator,
    InvalidMessage,
    ParseError,
    ValidationError,
    UnknownMessageType,
    UnknownPresenceAction,
    UnknownLockAction,
    InvalidPayload,
    ProjectMismatch,
    ActorMismatch,
    Forbidden,
    Conflict,
    RateLimited,
    NotImplemented,
    ProcessingError,
}

impl ErrorCode {
    /// Handshake-fatal codes close the channel with code 4001 instead of
    /// being reported as an in-session `error` frame.
    pub fn is_handshake_fatal(&self) -> bool {
        matches!(
            self,
            Self::NoToken | Self::BadToken | Self::ProjectNotFound | Self::NotACollaborator
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoToken => "NO_TOKEN",
            Self::BadToken => "BAD_TOKEN",
            Self::ProjectNotFound => "PROJECT_NOT_FOUND",
            Self::NotACollaborator => "NOT_A_COLLABORATOR",
            Self::InvalidMessage => "INVALID_MESSAGE",
            Self::ParseError => "PARSE_ERROR",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::UnknownMessageType => "UNKNOWN_MESSAGE_TYPE",
            Self::UnknownPresenceAction => "UNKNOWN_PRESENCE_ACTION",
            Self::UnknownLockAction => "UNKNOWN_LOCK_ACTION",
            Self::InvalidPayload => "INVALID_PAYLOAD",
            Self::ProjectMismatch => "PROJECT_MISMATCH",
            Self::ActorMismatch => "ACTOR_MISMATCH",
            Self::Forbidden => "FORBIDDEN",
            Self::Conflict => "CONFLICT",
            Self::RateLimited => "RATE_LIMITED",
            Self::NotImplemented => "NOT_IMPLEMENTED",
            Self::ProcessingError => "PROCESSING_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors raised by the envelope codec (C1) while decoding an inbound frame.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("message is not a {{type, data}} object")]
    InvalidShape,

    #[error("failed to parse message: {0}")]
    Parse(String),

    #[error("validation failed: {message}")]
    Validation {
        event_id: Option<Uuid>,
        message: String,
    },

    #[error("unknown message type: {0:?}")]
    UnknownMessageType(String),

    #[error("unknown presence action: {0:?}")]
    UnknownPresenceAction(String),

    #[error("unknown lock action: {0:?}")]
    UnknownLockAction(String),
}

impl CodecError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidShape => ErrorCode::InvalidMessage,
            Self::Parse(_) => ErrorCode::ParseError,
            Self::Validation { .. } => ErrorCode::ValidationError,
            Self::UnknownMessageType(_) => ErrorCode::UnknownMessageType,
            Self::UnknownPresenceAction(_) => ErrorCode::UnknownPresenceAction,
            Self::UnknownLockAction(_) => ErrorCode::UnknownLockAction,
        }
    }

    pub fn event_id(&self) -> Option<Uuid> {
        match self {
            Self::Validation { event_id, .. } => *event_id,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_fatal_codes() {
        assert!(ErrorCode::NoToken.is_handshake_fatal());
        assert!(ErrorCode::NotACollaborator.is_handshake_fatal());
        assert!(!ErrorCode::Conflict.is_handshake_fatal());
    }

    #[test]
    fn wire_strings_match_taxonomy() {
        assert_eq!(ErrorCode::RateLimited.as_str(), "RATE_LIMITED");
        assert_eq!(ErrorCode::ActorMismatch.as_str(), "ACTOR_MISMATCH");
    }

    #[test]
    fn serializes_as_screaming_snake_case() {
        let json = serde_json::to_string(&ErrorCode::NotACollaborator).unwrap();
        assert_eq!(json, "\"NOT_A_COLLABORATOR\"");
    }
}

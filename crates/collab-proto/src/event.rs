//! The `Event` envelope and the closed-ish set of event kinds it may carry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A timeline edit or transport action.
///
/// Most kinds are an exact literal (`clip.add`, `plugin.param_change`, …);
/// `track.*` and `transport.*` are prefix families rather than enumerated
/// members, so this is a validated newtype rather than a closed enum.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventKind(String);

const EXACT_KINDS: &[&str] = &[
    "clip.add",
    "clip.move",
    "clip.delete",
    "plugin.add",
    "plugin.update",
    "plugin.delete",
    "plugin.reorder",
    "plugin.param_change",
    "plugin.param_batch",
];

const PREFIX_FAMILIES: &[&str] = &["track.", "transport."];

impl EventKind {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this kind belongs to the closed set the codec accepts.
    pub fn is_valid(&self) -> bool {
        EXACT_KINDS.contains(&self.0.as_str())
            || PREFIX_FAMILIES.iter().any(|prefix| self.0.starts_with(prefix))
    }

    pub fn is_param_change(&self) -> bool {
        self.0 == "plugin.param_change"
    }

    pub fn is_param_batch(&self) -> bool {
        self.0 == "plugin.param_batch"
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EventKind {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A single edit, as it travels the wire. Inbound frames omit `seq` and
/// `received_at`; the session registry (C3) stamps both before fan-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: Uuid,
    pub project_id: Uuid,
    pub actor_id: Uuid,
    pub client_id: Uuid,
    #[serde(default)]
    pub seq: Option<u64>,
    pub sent_at: DateTime<Utc>,
    #[serde(default)]
    pub received_at: Option<DateTime<Utc>>,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub version: String,
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    /// Stamp this event with its assigned sequence number and receipt time,
    /// as C3 does right before fan-out.
    pub fn stamped(mut self, seq: u64, received_at: DateTime<Utc>) -> Self {
        self.seq = Some(seq);
        self.received_at = Some(received_at);
        self
    }
}

//! Tunables for the realtime coordination plane.
//!
//! These are the knobs spec'd out in the wire-protocol configuration table:
//! lock leases, throttling, idempotency window, idle timeouts. They cannot
//! change the *semantics* of the core, only its pacing.

use serde::{Deserialize, Serialize};

/// Resource-lock leasing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockConfig {
    /// How long a heartbeat extends a lock's expiry by.
    #[serde(default = "LockConfig::default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,

    /// Hard ceiling on total lock lifetime, regardless of heartbeats.
    #[serde(default = "LockConfig::default_max_duration_secs")]
    pub max_duration_secs: u64,

    /// How often the expiry sweep runs.
    #[serde(default = "LockConfig::default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl LockConfig {
    fn default_lease_ttl_secs() -> u64 {
        15
    }
    fn default_max_duration_secs() -> u64 {
        300
    }
    fn default_sweep_interval_secs() -> u64 {
        5
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lease_ttl_secs: Self::default_lease_ttl_secs(),
            max_duration_secs: Self::default_max_duration_secs(),
            sweep_interval_secs: Self::default_sweep_interval_secs(),
        }
    }
}

/// Per-plugin parameter coalescing and rate limiting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Minimum spacing between flushes for a given plugin.
    #[serde(default = "ThrottleConfig::default_interval_ms")]
    pub interval_ms: u64,

    /// Flushes permitted per plugin within a rolling one-second window.
    #[serde(default = "ThrottleConfig::default_max_flush_per_sec")]
    pub max_flush_per_sec: u32,

    /// Pending param count that forces an immediate flush.
    #[serde(default = "ThrottleConfig::default_max_pending")]
    pub max_pending_changes: usize,

    /// How long a plugin's throttler state survives without activity.
    #[serde(default = "ThrottleConfig::default_idle_reap_secs")]
    pub idle_reap_secs: u64,
}

impl ThrottleConfig {
    fn default_interval_ms() -> u64 {
        33
    }
    fn default_max_flush_per_sec() -> u32 {
        30
    }
    fn default_max_pending() -> usize {
        50
    }
    fn default_idle_reap_secs() -> u64 {
        300
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            interval_ms: Self::default_interval_ms(),
            max_flush_per_sec: Self::default_max_flush_per_sec(),
            max_pending_changes: Self::default_max_pending(),
            idle_reap_secs: Self::default_idle_reap_secs(),
        }
    }
}

/// Connection lifecycle and idempotency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Size of the per-project recently-processed-eventId FIFO set.
    #[serde(default = "SessionConfig::default_event_id_history")]
    pub event_id_history: usize,

    /// How long a connection may go without inbound activity before it is
    /// closed as idle.
    #[serde(default = "SessionConfig::default_idle_connection_secs")]
    pub idle_connection_secs: u64,

    /// Bound on the per-connection outbound message queue before the
    /// connection is dropped for back-pressure.
    #[serde(default = "SessionConfig::default_outbound_queue")]
    pub outbound_queue: usize,
}

impl SessionConfig {
    fn default_event_id_history() -> usize {
        10_000
    }
    fn default_idle_connection_secs() -> u64 {
        300
    }
    fn default_outbound_queue() -> usize {
        256
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            event_id_history: Self::default_event_id_history(),
            idle_connection_secs: Self::default_idle_connection_secs(),
            outbound_queue: Self::default_outbound_queue(),
        }
    }
}

/// Presence staleness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceConfig {
    /// A presence entry not refreshed within this window is leaved as timed out.
    #[serde(default = "PresenceConfig::default_stale_secs")]
    pub stale_secs: u64,

    /// How often the staleness sweep runs.
    #[serde(default = "PresenceConfig::default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl PresenceConfig {
    fn default_stale_secs() -> u64 {
        30
    }
    fn default_sweep_interval_secs() -> u64 {
        5
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            stale_secs: Self::default_stale_secs(),
            sweep_interval_secs: Self::default_sweep_interval_secs(),
        }
    }
}

/// Fixed 10-color palette assigned to presence participants.
pub fn default_color_palette() -> Vec<String> {
    [
        "#EF4444", "#F97316", "#EAB308", "#22C55E", "#14B8A6", "#3B82F6", "#8B5CF6", "#EC4899",
        "#F472B6", "#A855F7",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

//! Session registry (C3): connection lifecycle, sequencing, idempotency,
//! fan-out.
//!
//! All mutable state for a project — connections, presence, locks,
//! throttlers — lives behind one [`tokio::sync::Mutex`] per `project_id`.
//! Holding that lock for the duration of processing one inbound message is
//! what gives invariant 1 (total seq order) and eliminates read-modify-write
//! races without a global lock.

use crate::observer::Observer;
use chrono::{DateTime, Utc};
use collab_proto::{EventEnvelope, Lock, Outbound, Presence, ResourceType};
use dashmap::DashMap;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

/// A single connected client, as C3 tracks it.
///
/// `socket_id` is process-unique and assigned on registration; `client_id`
/// is chosen by the browser tab and stable across reconnects.
pub struct Connection {
    pub socket_id: Uuid,
    pub client_id: Uuid,
    pub user_id: Uuid,
    pub project_id: Uuid,
    pub can_edit: bool,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub outbound: mpsc::Sender<Outbound>,
    /// Out-of-band close signal, raced against `outbound`/inbound frames in
    /// the connection's own `select!` loop. Used for closes the session
    /// state itself decides on (outbound queue overflow) rather than ones
    /// the socket loop notices directly (idle timeout, auth failure).
    pub close: mpsc::Sender<u16>,
}

/// Per-plugin coalescing/rate-limit state, owned by the project session
/// that the plugin belongs to. Populated by C6.
pub(crate) struct ThrottlerState {
    pub pending: HashMap<String, (serde_json::Value, DateTime<Utc>)>,
    pub last_flush_at: DateTime<Utc>,
    pub flush_scheduled: bool,
    pub window_start: DateTime<Utc>,
    pub flush_count_in_window: u32,
    pub last_activity: DateTime<Utc>,
    pub locked_by: Option<(Uuid, Uuid)>,
}

impl ThrottlerState {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            pending: HashMap::new(),
            last_flush_at: now,
            flush_scheduled: false,
            window_start: now,
            flush_count_in_window: 0,
            last_activity: now,
            locked_by: None,
        }
    }
}

/// All state owned by one project's active collaboration session.
pub struct ProjectSessionState {
    pub(crate) project_id: Uuid,
    pub(crate) connections: HashMap<Uuid, Connection>,
    pub(crate) next_seq: u64,
    pub(crate) recent_event_ids: VecDeque<Uuid>,
    pub(crate) recent_event_id_set: HashSet<Uuid>,
    pub(crate) event_id_history: usize,
    pub(crate) presence: HashMap<Uuid, Presence>,
    pub(crate) presence_colors: HashMap<Uuid, String>,
    pub(crate) locks: HashMap<(ResourceType, String), Lock>,
    pub(crate) throttlers: HashMap<String, ThrottlerState>,
}

impl ProjectSessionState {
    pub(crate) fn new(project_id: Uuid, event_id_history: usize) -> Self {
        Self {
            project_id,
            connections: HashMap::new(),
            next_seq: 0,
            recent_event_ids: VecDeque::new(),
            recent_event_id_set: HashSet::new(),
            event_id_history,
            presence: HashMap::new(),
            presence_colors: HashMap::new(),
            locks: HashMap::new(),
            throttlers: HashMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Monotonic, gap-free per-project counter. Callers MUST assign the
    /// result to the event before fan-out.
    pub fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    pub fn current_seq(&self) -> u64 {
        self.next_seq
    }

    pub fn is_duplicate(&self, event_id: Uuid) -> bool {
        self.recent_event_id_set.contains(&event_id)
    }

    /// Adds `event_id` to the idempotency window, evicting the oldest
    /// insertion (FIFO) once the window exceeds its configured capacity. A
    /// duplicate resubmission is re-acked with the session's live `seq`
    /// counter, not the seq this particular event was originally assigned —
    /// so no per-event seq needs to be remembered here.
    pub fn mark_processed(&mut self, event_id: Uuid) {
        if self.recent_event_id_set.insert(event_id) {
            self.recent_event_ids.push_back(event_id);
            if self.recent_event_ids.len() > self.event_id_history {
                if let Some(evicted) = self.recent_event_ids.pop_front() {
                    self.recent_event_id_set.remove(&evicted);
                }
            }
        }
    }

    /// Serializes `event` once and pushes it to every live connection
    /// except as excluded by `opts`. Connections whose outbound queue is
    /// full are closed with code 1013 (message too big / overloaded) and
    /// returned so the caller can log the back-pressure event.
    pub fn broadcast_event(&self, event: &EventEnvelope, opts: BroadcastOpts) -> Vec<Uuid> {
        self.broadcast(Outbound::Event(event.clone()), opts)
    }

    pub fn broadcast(&self, message: Outbound, opts: BroadcastOpts) -> Vec<Uuid> {
        const OVERFLOW_CLOSE_CODE: u16 = 1013;
        let mut overflowed = Vec::new();
        for conn in self.connections.values() {
            if let Some(exclude) = opts.exclude_socket {
                if conn.socket_id == exclude {
                    continue;
                }
            }
            if !opts.echo_to_sender {
                if let Some(sender_client) = opts.sender_client_id {
                    if conn.client_id == sender_client {
                        continue;
                    }
                }
            }
            match conn.outbound.try_send(message.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    let _ = conn.close.try_send(OVERFLOW_CLOSE_CODE);
                    overflowed.push(conn.socket_id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        overflowed
    }
}

/// Tuning knobs for [`ProjectSessionState::broadcast`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BroadcastOpts {
    pub exclude_socket: Option<Uuid>,
    pub sender_client_id: Option<Uuid>,
    pub echo_to_sender: bool,
}

/// Outcome of feeding an inbound `event` through C3's processing path.
pub enum EventOutcome {
    Duplicate { event_id: Uuid, seq: u64 },
    Processed { event: EventEnvelope },
}

/// The process-wide registry of project sessions.
///
/// Created once and shared (via `Arc`) across every connection handler.
pub struct SessionRegistry {
    sessions: DashMap<Uuid, Arc<Mutex<ProjectSessionState>>>,
    event_id_history: usize,
    observer: Arc<dyn Observer>,
}

impl SessionRegistry {
    pub fn new(event_id_history: usize, observer: Arc<dyn Observer>) -> Self {
        Self {
            sessions: DashMap::new(),
            event_id_history,
            observer,
        }
    }

    /// Gets or lazily creates the project's serialization point.
    pub fn project_handle(&self, project_id: Uuid) -> Arc<Mutex<ProjectSessionState>> {
        self.sessions
            .entry(project_id)
            .or_insert_with(|| Arc::new(Mutex::new(ProjectSessionState::new(project_id, self.event_id_history))))
            .clone()
    }

    /// Registers a new connection, lazily creating the project session.
    /// Returns the connection's `connected_at` timestamp for the `connected`
    /// ack the caller sends back.
    pub async fn register(
        &self,
        project_id: Uuid,
        socket_id: Uuid,
        client_id: Uuid,
        user_id: Uuid,
        can_edit: bool,
        outbound: mpsc::Sender<Outbound>,
        close: mpsc::Sender<u16>,
    ) -> DateTime<Utc> {
        let handle = self.project_handle(project_id);
        let now = Utc::now();
        let mut state = handle.lock().await;
        state.connections.insert(
            socket_id,
            Connection {
                socket_id,
                client_id,
                user_id,
                project_id,
                can_edit,
                connected_at: now,
                last_activity: now,
                outbound,
                close,
            },
        );
        self.observer
            .connection_registered(project_id, socket_id, client_id);
        now
    }

    /// Removes a connection; if the project empties, the session itself is
    /// dropped so its memory (presence, locks, throttlers) is reclaimed.
    pub async fn unregister(&self, project_id: Uuid, socket_id: Uuid) {
        let handle = self.project_handle(project_id);
        let empty = {
            let mut state = handle.lock().await;
            state.connections.remove(&socket_id);
            state.is_empty()
        };
        if empty {
            self.sessions.remove(&project_id);
        }
        self.observer.connection_unregistered(project_id, socket_id);
    }

    /// Runs `f` under the project's lock. This is the only way other
    /// components are allowed to touch a project's state — it is what
    /// keeps C3/C4/C5/C6 serialized per project.
    pub async fn with_project<F, R>(&self, project_id: Uuid, f: F) -> R
    where
        F: FnOnce(&mut ProjectSessionState) -> R,
    {
        let handle = self.project_handle(project_id);
        let mut state = handle.lock().await;
        f(&mut state)
    }

    pub fn project_count(&self) -> usize {
        self.sessions.len()
    }

    /// Every currently-active project's serialization point, for periodic
    /// maintenance sweeps (lock expiry, presence staleness, throttler reap)
    /// that must touch every project rather than one addressed by a caller.
    pub fn project_handles(&self) -> Vec<Arc<Mutex<ProjectSessionState>>> {
        self.sessions.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn observer(&self) -> &Arc<dyn Observer> {
        &self.observer
    }
}

/// Test-only helpers shared across this crate's `#[cfg(test)]` modules.
#[cfg(test)]
pub(crate) mod test_support {
    use super::ProjectSessionState;
    use uuid::Uuid;

    pub(crate) fn empty_project_state() -> ProjectSessionState {
        ProjectSessionState::new(Uuid::new_v4(), 10_000)
    }
}

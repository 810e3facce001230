//! Realtime coordination plane for a browser-based DAW: session registry,
//! event dispatch, resource locking, presence tracking, and parameter-change
//! throttling, all serialized per project behind one lock (see
//! [`session::SessionRegistry`]).

pub mod auth;
pub mod dispatch;
pub mod health;
pub mod lock;
pub mod maintenance;
pub mod observer;
pub mod presence;
pub mod session;
pub mod throttle;
pub mod ws;

pub use auth::{AuthError, AuthorityStore, Identity, InMemoryAuthorityStore};
pub use dispatch::{dispatch, handle_disconnect, DispatchContext, DispatchEffect, DispatchPolicy};
pub use lock::LeasePolicy;
pub use observer::{Observer, TracingObserver};
pub use presence::LeaveReason;
pub use session::{BroadcastOpts, Connection, EventOutcome, ProjectSessionState, SessionRegistry};
pub use throttle::ThrottlePolicy;
pub use ws::{AppState, ConnectQuery};

//! WebSocket transport: the only place that touches a live socket.
//!
//! Authenticates, registers the connection, then runs one `select!` loop
//! racing inbound frames against the connection's outbound queue, same
//! shape as the realtime subscription handler this is grounded on.

use crate::auth::AuthorityStore;
use crate::dispatch::{self, DispatchContext, DispatchEffect, DispatchPolicy};
use crate::lock::LeasePolicy;
use crate::observer::Observer;
use crate::session::SessionRegistry;
use crate::throttle::ThrottlePolicy;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use chrono::{Duration, Utc};
use collab_config::CollabConfig;
use collab_proto::{decode_inbound, encode_outbound, ConnectedData, Outbound};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Shared state handed to every connection handler.
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub authority: Arc<dyn AuthorityStore>,
    pub config: Arc<CollabConfig>,
}

/// Query parameters a client supplies on the WebSocket upgrade request.
#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    pub token: String,
    pub project_id: Uuid,
    #[serde(default)]
    pub client_id: Option<Uuid>,
}

/// `GET /ws` upgrade entry point.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<ConnectQuery>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query))
}

fn dispatch_policy(config: &CollabConfig) -> DispatchPolicy {
    DispatchPolicy {
        lease: LeasePolicy {
            lease_ttl: Duration::seconds(config.lock.lease_ttl_secs as i64),
            max_duration: Duration::seconds(config.lock.max_duration_secs as i64),
        },
        throttle: ThrottlePolicy {
            interval: Duration::milliseconds(config.throttle.interval_ms as i64),
            max_flush_per_sec: config.throttle.max_flush_per_sec,
            max_pending_changes: config.throttle.max_pending_changes,
        },
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, query: ConnectQuery) {
    let (mut sender, mut receiver) = socket.split();

    let identity = match state
        .authority
        .authenticate(&query.token, query.project_id, query.client_id)
        .await
    {
        Ok(identity) => identity,
        Err(err) => {
            tracing::info!(project_id = %query.project_id, code = err.code(), "handshake rejected");
            let _ = sender
                .send(Message::Close(Some(CloseFrame {
                    code: 4001,
                    reason: err.code().into(),
                })))
                .await;
            return;
        }
    };

    let socket_id = Uuid::new_v4();
    let (outbound_tx, mut outbound_rx) = mpsc::channel(state.config.session.outbound_queue);
    let (close_tx, mut close_rx) = mpsc::channel(1);

    let connected_at = state
        .registry
        .register(
            query.project_id,
            socket_id,
            identity.effective_client_id,
            identity.user_id,
            identity.can_edit,
            outbound_tx.clone(),
            close_tx,
        )
        .await;

    let _ = outbound_tx.try_send(Outbound::Connected(ConnectedData {
        socket_id,
        project_id: query.project_id,
        client_id: identity.effective_client_id,
        can_edit: identity.can_edit,
        timestamp: connected_at,
    }));

    let ctx = DispatchContext {
        socket_id,
        client_id: identity.effective_client_id,
        user_id: identity.user_id,
        project_id: query.project_id,
        can_edit: identity.can_edit,
    };
    let policy = dispatch_policy(&state.config);
    let idle_timeout = std::time::Duration::from_secs(state.config.session.idle_connection_secs);

    loop {
        tokio::select! {
            code = close_rx.recv() => {
                if let Some(code) = code {
                    let _ = sender
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: "outbound queue overflow".into(),
                        })))
                        .await;
                }
                break;
            }
            outgoing = outbound_rx.recv() => {
                match outgoing {
                    Some(message) => {
                        if sender.send(Message::Text(encode_outbound(&message).into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = tokio::time::timeout(idle_timeout, receiver.next()) => {
                match incoming {
                    Ok(Some(Ok(Message::Text(text)))) => {
                        handle_frame(&state, ctx, &text, policy, &outbound_tx).await;
                    }
                    Ok(Some(Ok(Message::Close(_)))) => break,
                    Ok(Some(Ok(_))) => {}
                    Ok(Some(Err(_))) | Ok(None) => break,
                    Err(_elapsed) => {
                        let _ = sender
                            .send(Message::Close(Some(CloseFrame {
                                code: 4000,
                                reason: "idle timeout".into(),
                            })))
                            .await;
                        break;
                    }
                }
            }
        }
    }

    let client_id = identity.effective_client_id;
    let observer = state.registry.observer().clone();
    state
        .registry
        .with_project(query.project_id, |project| {
            dispatch::handle_disconnect(project, client_id, observer.as_ref());
        })
        .await;
    state.registry.unregister(query.project_id, socket_id).await;
}

async fn handle_frame(
    state: &AppState,
    ctx: DispatchContext,
    text: &str,
    policy: DispatchPolicy,
    outbound_tx: &mpsc::Sender<Outbound>,
) {
    match decode_inbound(text) {
        Ok(inbound) => {
            let palette = state.config.color_palette.clone();
            let observer = state.registry.observer().clone();
            let effect = state
                .registry
                .with_project(ctx.project_id, |project| {
                    dispatch::dispatch(project, ctx, inbound, policy, &palette, observer.as_ref())
                })
                .await;
            match effect {
                DispatchEffect::ReplyToSender(message) => {
                    let _ = outbound_tx.try_send(message);
                }
                DispatchEffect::ReplyManyToSender(messages) => {
                    for message in messages {
                        let _ = outbound_tx.try_send(message);
                    }
                }
                DispatchEffect::Handled => {}
                DispatchEffect::ReplyAndScheduleFlush { reply, plugin_id, delay } => {
                    let _ = outbound_tx.try_send(reply);
                    schedule_flush(state.registry.clone(), ctx.project_id, plugin_id, policy.throttle, delay);
                }
            }
        }
        Err(err) => {
            state
                .registry
                .observer()
                .dispatch_error(ctx.project_id, err.code().as_str(), &err.to_string());
            let error_data = dispatch::error_for_decode_failure(&err);
            let _ = outbound_tx.try_send(Outbound::Error(error_data));
        }
    }
}

/// Spawns the deferred flush a coalesced `plugin.param_change` batch asked
/// for. The session state never spawns its own tasks (see
/// [`crate::throttle::QueueOutcome::Scheduled`]), so this is the one place
/// that turns a requested delay into an actual timer.
fn schedule_flush(
    registry: Arc<SessionRegistry>,
    project_id: Uuid,
    plugin_id: String,
    policy: ThrottlePolicy,
    delay: std::time::Duration,
) {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let flushed = registry
            .with_project(project_id, |project| project.flush_plugin_params(&plugin_id, policy, Utc::now()))
            .await;
        dispatch::log_flush_outcome(registry.observer().as_ref(), project_id, &plugin_id, flushed.as_ref());
    });
}

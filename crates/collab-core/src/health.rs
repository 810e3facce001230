//! `GET /healthz`: a liveness probe surfacing process uptime and how many
//! projects currently have an active session.

use crate::session::SessionRegistry;
use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Shared state the health handler reads from.
pub struct HealthState {
    pub registry: Arc<SessionRegistry>,
    pub started_at: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_secs: i64,
    pub active_projects: usize,
}

pub async fn health_handler(State(state): State<Arc<HealthState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
        active_projects: state.registry.project_count(),
    })
}

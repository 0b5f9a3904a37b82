//! The small HTTP surface that shares a listener with the WebSocket
//! upgrade endpoint: `/health` and `/ping`.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::ServerState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    uptime: u64,
    rooms: usize,
    users: usize,
}

pub async fn health(State(state): State<ServerState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime: state.uptime_secs(),
        rooms: state.rooms.len(),
        users: state.users.len(),
    })
}

pub async fn ping() -> &'static str {
    "pong"
}

//! Top-level axum router wiring the WebSocket upgrade and HTTP surface
//! together over one shared [`ServerState`].

use axum::routing::get;
use axum::Router;

use crate::state::ServerState;
use crate::{http, ws};

#[must_use]
pub fn create_router(state: ServerState) -> Router {
    Router::new()
        .route("/ws", get(ws::handler))
        .route("/health", get(http::health))
        .route("/ping", get(http::ping))
        .with_state(state)
}

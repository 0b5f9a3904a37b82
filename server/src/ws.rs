//! WebSocket transport: the server side of the signaling connection.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use voicesync_protocol::{PeerId, ServerMessage};

use crate::dispatch::{dispatch, handle_disconnect};
use crate::state::ServerState;

/// Recipients whose outbound queue grows past this are effectively treated
/// as a disconnect by backpressure: a broadcaster's send call stalls rather
/// than letting memory grow unbounded for a dead or frozen peer.
const OUTBOUND_QUEUE_CAPACITY: usize = 64;

pub async fn handler(ws: WebSocketUpgrade, State(state): State<ServerState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Drive one connection until it closes.
///
/// Mirrors the client's own connection loop: a single task owns the
/// socket and multiplexes inbound frames against outbound messages queued
/// by other connections' broadcasts, so replying to a transport-level
/// ping never has to race a second task for the sink.
async fn handle_socket(socket: WebSocket, state: ServerState) {
    let peer_id = PeerId::new();
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(OUTBOUND_QUEUE_CAPACITY);

    // Sent once, immediately on accept, before any client message is
    // processed.
    if sink
        .send(Message::Text(
            serde_json::to_string(&ServerMessage::Connected { peer_id }).unwrap().into(),
        ))
        .await
        .is_err()
    {
        return;
    }

    info!(%peer_id, "connection accepted");

    loop {
        tokio::select! {
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        dispatch(&state, peer_id, &tx, &text).await;
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if sink.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(%peer_id, "client closed connection");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        warn!(%peer_id, %error, "websocket read error");
                        break;
                    }
                    None => {
                        debug!(%peer_id, "connection stream ended");
                        break;
                    }
                }
            }
            outbound = rx.recv() => {
                match outbound {
                    Some(message) => {
                        let json = match serde_json::to_string(&message) {
                            Ok(json) => json,
                            Err(error) => {
                                warn!(%error, "failed to serialize outbound message");
                                continue;
                            }
                        };
                        if sink.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        // All senders dropped; only reachable after this
                        // connection has already unregistered, so it's safe
                        // to keep waiting on inbound frames alone.
                    }
                }
            }
        }
    }

    handle_disconnect(&state, peer_id).await;
    info!(%peer_id, "connection closed");
}

//! Message dispatch: the per-connection state machine that interprets
//! client messages against shared server state.
//!
//! # Concurrency model
//!
//! This server uses a "parallel workers" model: every connection is its
//! own `tokio` task (see [`crate::ws`]), and those tasks
//! call [`dispatch`] concurrently against a shared [`ServerState`]. Safety
//! comes from [`crate::registry::UserRegistry`] and
//! [`crate::registry::RoomRegistry`] serialising their own mutations behind
//! a single lock per registry, so a single call into either registry always
//! observes (and leaves) a consistent snapshot. `dispatch` never holds a
//! registry lock across an `.await`; broadcasts clone sender handles out
//! from under the lock before doing any I/O, so a slow recipient can never
//! block room mutation for everyone else.

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use voicesync_protocol::{ClientMessage, PeerId, RoomKey, RoomPeer, ServerMessage};

use crate::registry::Room;
use crate::state::ServerState;

const MAX_USERNAME_LEN: usize = 32;

/// Parse and act on one inbound frame from `peer_id`.
///
/// `reply` is that connection's own outbound channel — used both to answer
/// the request and, on `login`, stored in the user registry so later
/// broadcasts can reach this connection too. Non-JSON and unknown `type`
/// frames are logged and dropped, never treated as fatal.
pub async fn dispatch(state: &ServerState, peer_id: PeerId, reply: &mpsc::Sender<ServerMessage>, raw: &str) {
    let message: ClientMessage = match serde_json::from_str(raw) {
        Ok(message) => message,
        Err(error) => {
            debug!(%peer_id, %error, "dropping non-JSON or unrecognised frame");
            return;
        }
    };

    match message {
        ClientMessage::Login { username } => handle_login(state, peer_id, reply, username).await,
        ClientMessage::CreateRoom => handle_create_room(state, peer_id, reply).await,
        ClientMessage::JoinRoom { room_key } | ClientMessage::AcceptInvite { room_key } => {
            handle_join_room(state, peer_id, reply, &room_key).await;
        }
        ClientMessage::Invite { to_username } => handle_invite(state, peer_id, reply, to_username).await,
        ClientMessage::DeclineInvite { room_key } => handle_decline_invite(state, peer_id, &room_key).await,
        ClientMessage::LeaveRoom => handle_leave_room(state, peer_id).await,
        ClientMessage::Signal { to_peer_id, data } => handle_signal(state, peer_id, to_peer_id, data).await,
    }
}

async fn send(tx: &mpsc::Sender<ServerMessage>, message: ServerMessage) {
    if let Err(error) = tx.send(message).await {
        warn!(%error, "failed to deliver message to a recipient");
    }
}

async fn handle_login(state: &ServerState, peer_id: PeerId, reply: &mpsc::Sender<ServerMessage>, username: String) {
    let trimmed = username.trim();
    let truncated: String = trimmed.chars().take(MAX_USERNAME_LEN).collect();

    if truncated.is_empty() {
        send(reply, ServerMessage::LoginError {
            message: "username must not be empty".into(),
        })
        .await;
        return;
    }

    let outcome = state.users.register(peer_id, truncated.clone(), reply.clone());
    if outcome.conflict {
        send(reply, ServerMessage::LoginError {
            message: format!("username {truncated:?} is already taken"),
        })
        .await;
        return;
    }

    info!(%peer_id, username = %truncated, "user logged in");
    send(reply, ServerMessage::LoginOk { peer_id }).await;
}

async fn handle_create_room(state: &ServerState, peer_id: PeerId, reply: &mpsc::Sender<ServerMessage>) {
    let Some(user) = state.users.find_by_id(peer_id) else {
        send(reply, ServerMessage::CreateError {
            message: "must be logged in".into(),
        })
        .await;
        return;
    };
    if user.current_room.is_some() {
        send(reply, ServerMessage::CreateError {
            message: "already in a room".into(),
        })
        .await;
        return;
    }

    let room = state.rooms.create(peer_id, user.display_name, reply.clone());
    state.users.set_room(peer_id, Some(room.room_key.clone()));
    info!(%peer_id, room_key = %room.room_key, "room created");
    send(reply, ServerMessage::RoomCreated { room_key: room.room_key }).await;
}

async fn handle_join_room(state: &ServerState, peer_id: PeerId, reply: &mpsc::Sender<ServerMessage>, raw_key: &str) {
    let Some(user) = state.users.find_by_id(peer_id) else {
        send(reply, ServerMessage::JoinError {
            message: "must be logged in".into(),
        })
        .await;
        return;
    };
    if user.current_room.is_some() {
        send(reply, ServerMessage::JoinError {
            message: "already in a room".into(),
        })
        .await;
        return;
    }

    let room_key = match RoomKey::parse(raw_key) {
        Ok(key) => key,
        Err(_) => {
            send(reply, ServerMessage::JoinError {
                message: "malformed room key".into(),
            })
            .await;
            return;
        }
    };

    // Snapshot existing membership before inserting the joiner, so the
    // `room-joined` payload excludes self without extra filtering.
    let existing_peers: Vec<RoomPeer> = state
        .rooms
        .get(&room_key)
        .map(|room| {
            room.members
                .iter()
                .map(|m| RoomPeer {
                    peer_id: m.peer_id,
                    username: m.display_name.clone(),
                })
                .collect()
        })
        .unwrap_or_default();

    let room = match state.rooms.join(&room_key, peer_id, user.display_name.clone(), reply.clone()) {
        Ok(room) => room,
        Err(error) => {
            send(reply, ServerMessage::JoinError {
                message: error.to_string(),
            })
            .await;
            return;
        }
    };
    state.users.set_room(peer_id, Some(room_key.clone()));

    // Deliver to the joiner first: room-joined must precede the
    // peer-joined fan-out to the rest of the room.
    send(reply, ServerMessage::RoomJoined {
        room_key: room_key.clone(),
        peers: existing_peers,
    })
    .await;

    info!(%peer_id, %room_key, "peer joined room");
    broadcast_except(&room, peer_id, ServerMessage::PeerJoined {
        peer_id,
        username: user.display_name,
    })
    .await;
}

async fn handle_invite(state: &ServerState, peer_id: PeerId, reply: &mpsc::Sender<ServerMessage>, to_username: String) {
    let Some(inviter) = state.users.find_by_id(peer_id) else {
        send(reply, ServerMessage::InviteError {
            message: "must be logged in".into(),
        })
        .await;
        return;
    };
    let Some(room_key) = inviter.current_room.clone() else {
        send(reply, ServerMessage::InviteError {
            message: "must be in a room to invite".into(),
        })
        .await;
        return;
    };

    let Some(target) = state.users.find_by_name(&to_username) else {
        send(reply, ServerMessage::InviteError {
            message: format!("{to_username:?} is not online"),
        })
        .await;
        return;
    };
    if target.peer_id == peer_id {
        send(reply, ServerMessage::InviteError {
            message: "cannot invite yourself".into(),
        })
        .await;
        return;
    }
    if target.current_room.is_some() {
        send(reply, ServerMessage::InviteError {
            message: format!("{to_username:?} is already in a room"),
        })
        .await;
        return;
    }

    send(&target.socket, ServerMessage::Invite {
        from_username: inviter.display_name,
        room_key,
    })
    .await;
    send(reply, ServerMessage::InviteSent { to_username: target.display_name }).await;
}

async fn handle_decline_invite(state: &ServerState, peer_id: PeerId, raw_key: &str) {
    let Ok(room_key) = RoomKey::parse(raw_key) else {
        return;
    };
    let Some(room) = state.rooms.get(&room_key) else {
        return;
    };
    let Some(decliner) = state.users.find_by_id(peer_id) else {
        return;
    };

    // Broadcasts to the whole room rather than replying to the inviter
    // alone: any member may have been waiting on the same invite.
    broadcast_except(&room, peer_id, ServerMessage::InviteDeclined {
        username: decliner.display_name,
    })
    .await;
}

async fn handle_leave_room(state: &ServerState, peer_id: PeerId) {
    let Some(user) = state.users.find_by_id(peer_id) else {
        return;
    };
    let reply = user.socket.clone();

    let Some(room_key) = user.current_room.clone() else {
        send(&reply, ServerMessage::LeftRoom).await;
        return;
    };

    let outcome = state.rooms.leave(&room_key, peer_id);
    state.users.set_room(peer_id, None);

    if let Some(room) = &outcome.room {
        broadcast_except(room, peer_id, ServerMessage::PeerLeft {
            peer_id,
            username: user.display_name,
        })
        .await;
    }
    send(&reply, ServerMessage::LeftRoom).await;
}

async fn handle_signal(state: &ServerState, peer_id: PeerId, to_peer_id: PeerId, data: serde_json::Value) {
    let Some(target) = state.users.find_by_id(to_peer_id) else {
        debug!(%peer_id, to = %to_peer_id, "dropping signal for unknown peer");
        return;
    };

    send(&target.socket, ServerMessage::Signal {
        from_peer_id: peer_id,
        data,
    })
    .await;
}

/// Clean up after an unexpected disconnect: an implicit `leave-room`
/// followed by `unregister`. Produces the same fan-out as an explicit
/// `leave-room` so observers can't tell the two apart.
pub async fn handle_disconnect(state: &ServerState, peer_id: PeerId) {
    if let Some(user) = state.users.find_by_id(peer_id) {
        if let Some(room_key) = user.current_room.clone() {
            let outcome = state.rooms.leave(&room_key, peer_id);
            if let Some(room) = &outcome.room {
                broadcast_except(room, peer_id, ServerMessage::PeerLeft {
                    peer_id,
                    username: user.display_name,
                })
                .await;
            }
        }
    }
    state.users.unregister(peer_id);
}

/// Best-effort fan-out to everyone in `room` but `exclude`.
///
/// Sender handles are cloned out from the snapshot (no lock is held here —
/// `room` is already a point-in-time copy), so one slow or gone recipient
/// can never delay, or abort delivery to, the others.
async fn broadcast_except(room: &Room, exclude: PeerId, message: ServerMessage) {
    for member in room.other_members(exclude) {
        send(&member.socket, message.clone()).await;
    }
}

//! The signaling wire protocol: JSON objects tagged by `type`.

use serde::{Deserialize, Serialize};

use crate::peer_id::PeerId;
use crate::room_key::RoomKey;

/// Messages sent from a client to the signaling server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Claim a display name. Trimmed and truncated to 32 chars server-side.
    Login { username: String },
    /// Create a new room with the caller as host.
    CreateRoom,
    /// Join an existing room by key.
    JoinRoom {
        #[serde(rename = "roomKey")]
        room_key: String,
    },
    /// Invite an online, roomless user into the caller's current room.
    Invite {
        #[serde(rename = "toUsername")]
        to_username: String,
    },
    /// Semantically identical to `JoinRoom`.
    AcceptInvite {
        #[serde(rename = "roomKey")]
        room_key: String,
    },
    /// Decline a pending invite. Broadcasts to the room, not just the inviter.
    DeclineInvite {
        #[serde(rename = "roomKey")]
        room_key: String,
    },
    /// Leave the current room, if any. Idempotent.
    LeaveRoom,
    /// Forward an opaque negotiation fragment to another peer in the room.
    Signal {
        #[serde(rename = "toPeerId")]
        to_peer_id: PeerId,
        data: serde_json::Value,
    },
}

/// A peer entry inside `room-joined`'s membership snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomPeer {
    #[serde(rename = "peerId")]
    pub peer_id: PeerId,
    pub username: String,
}

/// Messages sent from the signaling server to a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Sent once, immediately after the WebSocket upgrade completes.
    Connected {
        #[serde(rename = "peerId")]
        peer_id: PeerId,
    },
    LoginOk {
        #[serde(rename = "peerId")]
        peer_id: PeerId,
    },
    LoginError {
        message: String,
    },
    RoomCreated {
        #[serde(rename = "roomKey")]
        room_key: RoomKey,
    },
    CreateError {
        message: String,
    },
    RoomJoined {
        #[serde(rename = "roomKey")]
        room_key: RoomKey,
        peers: Vec<RoomPeer>,
    },
    JoinError {
        message: String,
    },
    PeerJoined {
        #[serde(rename = "peerId")]
        peer_id: PeerId,
        username: String,
    },
    PeerLeft {
        #[serde(rename = "peerId")]
        peer_id: PeerId,
        username: String,
    },
    Invite {
        #[serde(rename = "fromUsername")]
        from_username: String,
        #[serde(rename = "roomKey")]
        room_key: RoomKey,
    },
    InviteSent {
        #[serde(rename = "toUsername")]
        to_username: String,
    },
    InviteError {
        message: String,
    },
    InviteDeclined {
        username: String,
    },
    Signal {
        #[serde(rename = "fromPeerId")]
        from_peer_id: PeerId,
        data: serde_json::Value,
    },
    LeftRoom,
}

impl ServerMessage {
    /// The `type` discriminant, as it appears on the wire.
    ///
    /// Used by the client's request/response correlator, which matches on
    /// the event name rather than re-deriving it from the enum variant.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::LoginOk { .. } => "login-ok",
            Self::LoginError { .. } => "login-error",
            Self::RoomCreated { .. } => "room-created",
            Self::CreateError { .. } => "create-error",
            Self::RoomJoined { .. } => "room-joined",
            Self::JoinError { .. } => "join-error",
            Self::PeerJoined { .. } => "peer-joined",
            Self::PeerLeft { .. } => "peer-left",
            Self::Invite { .. } => "invite",
            Self::InviteSent { .. } => "invite-sent",
            Self::InviteError { .. } => "invite-error",
            Self::InviteDeclined { .. } => "invite-declined",
            Self::Signal { .. } => "signal",
            Self::LeftRoom => "left-room",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_message_round_trips_through_json() {
        let msg = ClientMessage::JoinRoom {
            room_key: "ACD-EFG-HJK".into(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"join-room""#));
        assert!(json.contains(r#""roomKey":"ACD-EFG-HJK""#));
        let back: ClientMessage = serde_json::from_str(&json).unwrap();
        match back {
            ClientMessage::JoinRoom { room_key } => assert_eq!(room_key, "ACD-EFG-HJK"),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn server_message_type_name_matches_wire_tag() {
        let msg = ServerMessage::LeftRoom;
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], msg.type_name());
    }

    #[test]
    fn unknown_type_fails_to_parse() {
        let raw = r#"{"type":"does-not-exist"}"#;
        assert!(serde_json::from_str::<ClientMessage>(raw).is_err());
    }
}

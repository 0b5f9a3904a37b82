//! Wire protocol shared by the voicesync signaling server and client.
//!
//! This crate has no I/O: it is pure types and the room-key pure functions,
//! so both sides of the signaling connection can depend on it without
//! pulling in a networking stack.

mod message;
mod peer_id;
pub mod room_key;

pub use message::{ClientMessage, RoomPeer, ServerMessage};
pub use peer_id::PeerId;
pub use room_key::RoomKey;

//! Process-wide registry of voice rooms.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Instant;

use tokio::sync::mpsc;
use voicesync_protocol::{PeerId, RoomKey, ServerMessage};

use crate::error::RoomError;

/// One member of a room's membership mapping.
#[derive(Clone)]
pub struct Member {
    pub peer_id: PeerId,
    pub display_name: String,
    pub socket: mpsc::Sender<ServerMessage>,
}

struct RoomEntry {
    host_peer_id: PeerId,
    /// Insertion-ordered so snapshots reflect join order.
    members: Vec<Member>,
    created_at: Instant,
}

impl RoomEntry {
    fn member_index(&self, peer_id: PeerId) -> Option<usize> {
        self.members.iter().position(|m| m.peer_id == peer_id)
    }
}

/// A point-in-time, read-only view of a room's membership.
#[derive(Clone)]
pub struct Room {
    pub room_key: RoomKey,
    pub host_peer_id: PeerId,
    pub members: Vec<Member>,
    pub created_at: Instant,
}

impl Room {
    fn snapshot(room_key: RoomKey, entry: &RoomEntry) -> Self {
        Self {
            room_key,
            host_peer_id: entry.host_peer_id,
            members: entry.members.clone(),
            created_at: entry.created_at,
        }
    }

    #[must_use]
    pub fn other_members(&self, exclude: PeerId) -> Vec<&Member> {
        self.members.iter().filter(|m| m.peer_id != exclude).collect()
    }
}

/// Result of [`RoomRegistry::leave`].
pub struct LeaveOutcome {
    /// The room as it stood right before the peer left, if it existed.
    pub room: Option<Room>,
    /// Whether the member set became empty as a result of this leave.
    pub was_empty: bool,
}

/// `∀ r ∈ rooms: r.members ≠ ∅` — a room with no members is deleted
/// immediately, never observed in an empty state by another operation.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: RwLock<HashMap<RoomKey, RoomEntry>>,
}

impl RoomRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a room with a freshly generated, unique key and the host as
    /// its sole member.
    pub fn create(
        &self,
        host_peer_id: PeerId,
        host_name: String,
        socket: mpsc::Sender<ServerMessage>,
    ) -> Room {
        let mut rooms = self.rooms.write().expect("room registry lock poisoned");

        let room_key = loop {
            let candidate = RoomKey::generate();
            if !rooms.contains_key(&candidate) {
                break candidate;
            }
        };

        let entry = RoomEntry {
            host_peer_id,
            members: vec![Member {
                peer_id: host_peer_id,
                display_name: host_name,
                socket,
            }],
            created_at: Instant::now(),
        };
        let snapshot = Room::snapshot(room_key.clone(), &entry);
        rooms.insert(room_key, entry);
        snapshot
    }

    /// Join an existing room.
    pub fn join(
        &self,
        room_key: &RoomKey,
        peer_id: PeerId,
        name: String,
        socket: mpsc::Sender<ServerMessage>,
    ) -> Result<Room, RoomError> {
        let mut rooms = self.rooms.write().expect("room registry lock poisoned");
        let entry = rooms.get_mut(room_key).ok_or(RoomError::RoomNotFound)?;

        if entry.member_index(peer_id).is_some() {
            return Err(RoomError::AlreadyInRoom);
        }

        entry.members.push(Member {
            peer_id,
            display_name: name,
            socket,
        });
        Ok(Room::snapshot(room_key.clone(), entry))
    }

    /// Remove a peer from a room, deleting the room if it becomes empty.
    ///
    /// Unknown keys yield `{room: None, was_empty: true}`.
    pub fn leave(&self, room_key: &RoomKey, peer_id: PeerId) -> LeaveOutcome {
        let mut rooms = self.rooms.write().expect("room registry lock poisoned");

        let Some(entry) = rooms.get_mut(room_key) else {
            return LeaveOutcome {
                room: None,
                was_empty: true,
            };
        };

        let Some(idx) = entry.member_index(peer_id) else {
            // Peer wasn't a member; room state is unaffected.
            let snapshot = Room::snapshot(room_key.clone(), entry);
            return LeaveOutcome {
                room: Some(snapshot),
                was_empty: entry.members.is_empty(),
            };
        };
        entry.members.remove(idx);

        if entry.members.is_empty() {
            let entry = rooms.remove(room_key).expect("entry was just looked up");
            let snapshot = Room::snapshot(room_key.clone(), &entry);
            LeaveOutcome {
                room: Some(snapshot),
                was_empty: true,
            }
        } else {
            let snapshot = Room::snapshot(room_key.clone(), entry);
            LeaveOutcome {
                room: Some(snapshot),
                was_empty: false,
            }
        }
    }

    #[must_use]
    pub fn get(&self, room_key: &RoomKey) -> Option<Room> {
        let rooms = self.rooms.read().expect("room registry lock poisoned");
        rooms.get(room_key).map(|entry| Room::snapshot(room_key.clone(), entry))
    }

    #[must_use]
    pub fn list(&self) -> Vec<Room> {
        self.rooms
            .read()
            .expect("room registry lock poisoned")
            .iter()
            .map(|(key, entry)| Room::snapshot(key.clone(), entry))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rooms.read().expect("room registry lock poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender() -> mpsc::Sender<ServerMessage> {
        mpsc::channel(8).0
    }

    #[test]
    fn create_inserts_host_as_sole_member() {
        let registry = RoomRegistry::new();
        let host = PeerId::new();
        let room = registry.create(host, "alice".into(), sender());

        assert_eq!(room.host_peer_id, host);
        assert_eq!(room.members.len(), 1);
        assert_eq!(room.members[0].peer_id, host);
    }

    #[test]
    fn join_unknown_room_fails() {
        let registry = RoomRegistry::new();
        let bogus = RoomKey::parse("ZZZ-ZZZ-ZZZ").unwrap();
        let err = registry
            .join(&bogus, PeerId::new(), "bob".into(), sender())
            .unwrap_err();
        assert_eq!(err, RoomError::RoomNotFound);
    }

    #[test]
    fn joining_twice_is_rejected() {
        let registry = RoomRegistry::new();
        let host = PeerId::new();
        let room = registry.create(host, "alice".into(), sender());
        let guest = PeerId::new();
        registry.join(&room.room_key, guest, "bob".into(), sender()).unwrap();

        let err = registry
            .join(&room.room_key, guest, "bob".into(), sender())
            .unwrap_err();
        assert_eq!(err, RoomError::AlreadyInRoom);
    }

    #[test]
    fn room_disappears_exactly_once_on_last_leave() {
        let registry = RoomRegistry::new();
        let host = PeerId::new();
        let room = registry.create(host, "alice".into(), sender());
        let guest = PeerId::new();
        registry.join(&room.room_key, guest, "bob".into(), sender()).unwrap();

        let first = registry.leave(&room.room_key, guest);
        assert!(!first.was_empty);
        assert!(registry.get(&room.room_key).is_some());

        let second = registry.leave(&room.room_key, host);
        assert!(second.was_empty);
        assert!(registry.get(&room.room_key).is_none());
    }

    #[test]
    fn leave_on_unknown_room_reports_empty() {
        let registry = RoomRegistry::new();
        let bogus = RoomKey::parse("ZZZ-ZZZ-ZZZ").unwrap();
        let outcome = registry.leave(&bogus, PeerId::new());
        assert!(outcome.was_empty);
        assert!(outcome.room.is_none());
    }
}

//! Process-wide registry of connected users.

use std::collections::HashMap;
use std::sync::RwLock;

use tokio::sync::mpsc;
use voicesync_protocol::{PeerId, RoomKey, ServerMessage};

/// One connected, logged-in user.
#[derive(Clone)]
pub struct User {
    pub peer_id: PeerId,
    pub display_name: String,
    /// Non-owning handle to the connection's outbound channel.
    pub socket: mpsc::Sender<ServerMessage>,
    pub current_room: Option<RoomKey>,
}

/// Outcome of [`UserRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterOutcome {
    pub conflict: bool,
}

/// Mapping of connection to `{display name, current room}`.
///
/// `find_by_name` is injective modulo case: at most one live user ever
/// carries a given name compared case-insensitively.
#[derive(Default)]
pub struct UserRegistry {
    users: RwLock<HashMap<PeerId, User>>,
}

impl UserRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user, rejecting a case-insensitive duplicate display name.
    pub fn register(
        &self,
        peer_id: PeerId,
        name: String,
        socket: mpsc::Sender<ServerMessage>,
    ) -> RegisterOutcome {
        let mut users = self.users.write().expect("user registry lock poisoned");

        let conflict = users
            .values()
            .any(|u| u.display_name.eq_ignore_ascii_case(&name));
        if conflict {
            return RegisterOutcome { conflict: true };
        }

        users.insert(
            peer_id,
            User {
                peer_id,
                display_name: name,
                socket,
                current_room: None,
            },
        );
        RegisterOutcome { conflict: false }
    }

    /// Remove a user. No-op on an unknown id.
    pub fn unregister(&self, peer_id: PeerId) {
        self.users.write().expect("user registry lock poisoned").remove(&peer_id);
    }

    #[must_use]
    pub fn find_by_id(&self, peer_id: PeerId) -> Option<User> {
        self.users
            .read()
            .expect("user registry lock poisoned")
            .get(&peer_id)
            .cloned()
    }

    #[must_use]
    pub fn find_by_name(&self, name: &str) -> Option<User> {
        self.users
            .read()
            .expect("user registry lock poisoned")
            .values()
            .find(|u| u.display_name.eq_ignore_ascii_case(name))
            .cloned()
    }

    /// Set, or clear, a user's current room. No-op on an unknown id.
    pub fn set_room(&self, peer_id: PeerId, room_key: Option<RoomKey>) {
        if let Some(user) = self
            .users
            .write()
            .expect("user registry lock poisoned")
            .get_mut(&peer_id)
        {
            user.current_room = room_key;
        }
    }

    #[must_use]
    pub fn list(&self) -> Vec<User> {
        self.users
            .read()
            .expect("user registry lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.users.read().expect("user registry lock poisoned").len()
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
    fn duplicate_names_are_rejected_case_insensitively() {
        let registry = UserRegistry::new();
        let p1 = PeerId::new();
        let p2 = PeerId::new();

        let r1 = registry.register(p1, "Alice".into(), sender());
        assert!(!r1.conflict);

        let r2 = registry.register(p2, "alice".into(), sender());
        assert!(r2.conflict);
        assert!(registry.find_by_id(p2).is_none());
    }

    #[test]
    fn find_by_name_is_case_insensitive() {
        let registry = UserRegistry::new();
        let peer_id = PeerId::new();
        registry.register(peer_id, "Bob".into(), sender());

        assert!(registry.find_by_name("BOB").is_some());
        assert!(registry.find_by_name("bob").is_some());
        assert!(registry.find_by_name("bobby").is_none());
    }

    #[test]
    fn unregister_unknown_id_is_a_no_op() {
        let registry = UserRegistry::new();
        registry.unregister(PeerId::new());
        assert!(registry.is_empty());
    }

    #[test]
    fn set_room_on_unknown_id_is_a_no_op() {
        let registry = UserRegistry::new();
        registry.set_room(PeerId::new(), Some(RoomKey::generate()));
    }
}

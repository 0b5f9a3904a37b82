//! Process-wide server state.
//!
//! A single [`ServerState`] value is constructed once by the listener and
//! handed to every connection's dispatch calls, so tests can build a fresh
//! instance per test instead of relying on a global reset hook.

use std::sync::Arc;
use std::time::Instant;

use crate::registry::{RoomRegistry, UserRegistry};

#[derive(Clone)]
pub struct ServerState {
    pub users: Arc<UserRegistry>,
    pub rooms: Arc<RoomRegistry>,
    pub started_at: Instant,
}

impl ServerState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            users: Arc::new(UserRegistry::new()),
            rooms: Arc::new(RoomRegistry::new()),
            started_at: Instant::now(),
        }
    }

    #[must_use]
    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

impl Default for ServerState {
    fn default() -> Self {
        Self::new()
    }
}

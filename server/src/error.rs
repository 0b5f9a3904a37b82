//! Server-side error taxonomy.
//!
//! These never close a connection; the dispatcher turns each one into the
//! matching `*-error` wire reply with a human-readable message.

use thiserror::Error;

/// Errors raised by [`crate::registry::RoomRegistry`] operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RoomError {
    #[error("room not found")]
    RoomNotFound,

    #[error("already in a room")]
    AlreadyInRoom,

    #[error("{0}")]
    RoomError(String),
}

impl RoomError {
    /// Stable code for this error kind, used in logs.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::RoomNotFound => "ROOM_NOT_FOUND",
            Self::AlreadyInRoom => "ALREADY_IN_ROOM",
            Self::RoomError(_) => "ROOM_ERROR",
        }
    }
}

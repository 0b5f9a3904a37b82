//! Client-side error taxonomy.
//!
//! Mirrors the server's `*Error` enums in shape (a `thiserror`-derived enum
//! with a stable `code()`), but these are returned to callers and surfaced
//! via [`crate::session::SessionEvent::Error`] rather than turned into wire
//! replies.

use thiserror::Error;

/// Errors from [`crate::transport::SignalingTransport`].
#[derive(Debug, Error, Clone)]
pub enum SignalingError {
    #[error("failed to open signaling connection: {0}")]
    ConnectFailed(String),

    #[error("signaling transport error: {0}")]
    WsError(String),

    #[error("reconnection exhausted after {attempts} attempts")]
    ConnLost { attempts: u32 },

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
}

impl SignalingError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConnectFailed(_) => "CONNECT_FAILED",
            Self::WsError(_) => "WS_ERROR",
            Self::ConnLost { .. } => "CONN_LOST",
            Self::Timeout(_) => "WS_ERROR",
        }
    }
}

/// Errors from room lifecycle requests (`create-room`, `join-room`, invites).
///
/// The wire only carries a human message for these, not a stable sub-code, so
/// every server-originated failure is classified as the generic variant; the
/// named variants exist for the client's own preconditions (e.g. rejecting a
/// `join_room` call while already in a room) where the kind is known locally.
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
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::RoomNotFound => "ROOM_NOT_FOUND",
            Self::AlreadyInRoom => "ALREADY_IN_ROOM",
            Self::RoomError(_) => "ROOM_ERROR",
        }
    }
}

/// Errors from the audio subsystem. Never fatal to a call; surfaced as
/// non-fatal `error` events.
#[derive(Debug, Error, Clone)]
pub enum AudioError {
    #[error("failed to open microphone: {0}")]
    MicOpenFailed(String),

    #[error("microphone stream error: {0}")]
    MicStreamError(String),

    #[error("{0}")]
    AudioError(String),
}

impl AudioError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::MicOpenFailed(_) => "MIC_OPEN_FAILED",
            Self::MicStreamError(_) => "MIC_STREAM_ERROR",
            Self::AudioError(_) => "AUDIO_ERROR",
        }
    }
}

/// Errors from the [`crate::peer::PeerEngine`] adapter. Never fatal to a
/// call; surfaced as non-fatal `error` events.
#[derive(Debug, Error, Clone)]
pub enum PeerError {
    #[error("webrtc error: {0}")]
    WebRtcError(String),

    #[error("{0}")]
    PeerError(String),
}

impl PeerError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::WebRtcError(_) => "WEBRTC_ERROR",
            Self::PeerError(_) => "PEER_ERROR",
        }
    }
}

/// The union of error kinds a [`crate::session::Session`] can surface,
/// either as the `Err` of a request method or via `SessionEvent::Error`.
#[derive(Debug, Error, Clone)]
pub enum SessionError {
    #[error(transparent)]
    Signaling(#[from] SignalingError),

    #[error(transparent)]
    Room(#[from] RoomError),

    #[error(transparent)]
    Audio(#[from] AudioError),

    #[error(transparent)]
    Peer(#[from] PeerError),
}

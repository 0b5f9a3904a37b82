//! Signaling rendezvous server.
//!
//! Tracks connected users and rooms and relays peer-to-peer negotiation
//! messages between them. Does not participate in media itself: once two
//! peers have exchanged enough signaling to agree on a direct connection,
//! the server's job for that pair is done.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod registry;
pub mod router;
pub mod state;
pub mod ws;

pub use config::Config;
pub use router::create_router;
pub use state::ServerState;

//! Session coordinator: signaling transport, peer negotiation and audio for voicesync.

pub mod audio;
pub mod error;
pub mod peer;
pub mod session;
pub mod transport;

pub use audio::{AudioAdapter, CpalAudioAdapter, NullAudioAdapter};
pub use error::SessionError;
pub use session::{Participant, Session, SessionEvent};

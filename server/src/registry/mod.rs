//! The two process-wide registries the dispatcher mutates.

mod room;
mod user;

pub use room::{LeaveOutcome, Member, Room, RoomRegistry};
pub use user::{RegisterOutcome, User, UserRegistry};

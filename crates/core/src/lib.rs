//! Shared wire contracts and primitive types for the palaver chat backend.
//!
//! Everything in this crate is pure data: the socket event vocabulary, the
//! client-visible error codes, and the timestamp/presence primitives shared
//! by the data layer and the server. No I/O happens here.

pub mod error;
pub mod events;
pub mod message;
pub mod presence;
mod time;

pub use error::{ChatError, ErrorKind};
pub use time::UnixMillis;

/// Stable identifier of a user.
pub type UserId = uuid::Uuid;
/// Stable identifier of a room.
pub type RoomId = uuid::Uuid;
/// Stable identifier of a message, assigned by the database.
///
/// Message ids are monotonically increasing within the database, which is
/// what lets them double as pagination cursors and timestamp tie-breakers.
pub type MessageId = i64;

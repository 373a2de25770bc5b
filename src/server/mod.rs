//! Room relay: the server side of the diagram room protocol.

pub mod relay;
pub mod rooms;

pub use relay::router;
pub use rooms::{Membership, Room, RoomRegistry, DEFAULT_DOCUMENT};

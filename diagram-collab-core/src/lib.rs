//! Diagram Collab Core Library
//!
//! Keeps a locally edited diagram in sync with the other participants of
//! a room: full-document broadcasts, echo suppression and advisory
//! per-element locks.

pub mod bridge;
pub mod room;
pub mod sync;

pub use bridge::{DocumentBridge, LocalEvent, MarkerKind, MemoryDocument};
pub use room::{endpoint_for, resolve_room, RoomId, RoomResolution, DEFAULT_ROOM};
pub use sync::{
    ClientOptions, ConnectionState, DocumentError, InboundMessage, OutboundMessage, SessionInfo,
    SyncClient, SyncClientHandle, SyncError,
};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

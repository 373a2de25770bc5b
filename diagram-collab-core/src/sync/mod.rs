//! Real-time sync with a diagram room.
//!
//! ## Protocol
//!
//! One JSON object per WebSocket text frame, discriminated by `type`:
//! 1. Connect to `/ws/diagram/<room>/`
//! 2. Receive `init` with our id, the document and the room's locks
//! 3. Send `update_diagram` (debounced) and `lock_element`/`unlock_element`
//!    (on selection change)
//! 4. Receive `users`, `diagram_update`, `lock`, `unlock`, `bulk_unlock`
//!
//! On any close the client reconnects after a fixed delay and starts over
//! at step 2.

mod client;
mod connection;
mod debounce;
mod error;
mod locks;
mod protocol;
mod router;
mod session;
mod timer;

pub use client::{ClientOptions, SyncClient, SyncClientHandle};
pub use connection::{ConnectionEvent, ConnectionManager, ConnectionState, Outbox, RECONNECT_DELAY};
pub use debounce::{BroadcastDebouncer, BROADCAST_DEBOUNCE};
pub use error::{DocumentError, ProtocolError, SyncError, TransportError};
pub use locks::{LocalLock, LockCoordinator, LockTable};
pub use protocol::{InboundMessage, LockMap, OutboundMessage};
pub use router::{dispatch, route_frame, Dispatch};
pub use session::{Session, SessionInfo, SyncState};
pub use timer::Timer;

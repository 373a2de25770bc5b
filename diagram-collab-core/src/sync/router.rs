//! Inbound message routing.
//!
//! Each decoded frame goes to exactly one handler. Unknown types are
//! skipped so older clients keep working when the protocol grows.
//! Undecodable frames are dropped and logged; the connection stays open.

use tracing::{debug, warn};

use super::locks::LockCoordinator;
use super::protocol::InboundMessage;
use super::session::SyncState;
use crate::bridge::DocumentBridge;

/// What routing one frame did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Malformed frame, dropped
    Dropped,
    /// Unknown type, echo of our own broadcast, or nothing to update
    Ignored,
    /// Session or lock state changed
    Applied,
    /// `init` handled. The session is established either way; the
    /// document and locks were only applied if the engine accepted it.
    Initialized { document_loaded: bool },
    /// Remote document refused by the engine; previous document kept
    DocumentRejected,
}

/// Decodes and dispatches one inbound text frame.
pub async fn route_frame<B: DocumentBridge>(
    frame: &str,
    state: &mut SyncState,
    coordinator: &LockCoordinator,
    bridge: &mut B,
) -> Dispatch {
    match InboundMessage::decode(frame) {
        Ok(message) => dispatch(message, state, coordinator, bridge).await,
        Err(e) => {
            warn!(error = %e, "dropping malformed frame");
            Dispatch::Dropped
        }
    }
}

/// Applies one decoded message to the sync state and the engine.
///
/// Every state change finishes before this returns, so the next event
/// never sees a half-applied update.
pub async fn dispatch<B: DocumentBridge>(
    message: InboundMessage,
    state: &mut SyncState,
    coordinator: &LockCoordinator,
    bridge: &mut B,
) -> Dispatch {
    match message {
        InboundMessage::Init {
            self_id,
            users_count,
            bpmn_xml,
            locks,
        } => {
            debug!(self_id = %self_id, "session established");
            state.establish(self_id, users_count);
            match bridge.load_document(&bpmn_xml).await {
                Ok(()) => {
                    coordinator.replace_locks(state, bridge, locks);
                    Dispatch::Initialized {
                        document_loaded: true,
                    }
                }
                Err(e) => {
                    warn!(error = %e, "initial document rejected");
                    Dispatch::Initialized {
                        document_loaded: false,
                    }
                }
            }
        }
        InboundMessage::Users { users_count } => {
            if state.update_participants(users_count) {
                Dispatch::Applied
            } else {
                debug!("participant count before init, ignoring");
                Dispatch::Ignored
            }
        }
        InboundMessage::DiagramUpdate {
            user_id,
            bpmn_xml,
            locks,
        } => {
            if state.is_self(&user_id) {
                debug!("ignoring echo of our own broadcast");
                return Dispatch::Ignored;
            }
            match bridge.load_document(&bpmn_xml).await {
                Ok(()) => {
                    coordinator.replace_locks(state, bridge, locks);
                    Dispatch::Applied
                }
                Err(e) => {
                    warn!(error = %e, user_id = %user_id, "remote document rejected");
                    Dispatch::DocumentRejected
                }
            }
        }
        InboundMessage::Lock {
            element_id,
            user_id,
        } => {
            coordinator.apply_lock(state, bridge, element_id, user_id);
            Dispatch::Applied
        }
        InboundMessage::Unlock { element_id } => {
            coordinator.apply_unlock(state, bridge, &element_id);
            Dispatch::Applied
        }
        InboundMessage::BulkUnlock { element_ids } => {
            coordinator.apply_bulk_unlock(state, bridge, &element_ids);
            Dispatch::Applied
        }
        InboundMessage::Unknown => {
            debug!("skipping message of unknown type");
            Dispatch::Ignored
        }
    }
}

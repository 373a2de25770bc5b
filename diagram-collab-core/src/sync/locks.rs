//! Advisory element locks.
//!
//! Locks are hints: nothing here blocks a local edit or waits for the
//! server. Selecting an element requests its lock, selecting something
//! else (or nothing) releases it, and locks held by other participants
//! are shown with a [`MarkerKind::LockedByOther`] marker.

use std::collections::btree_map;
use std::collections::BTreeMap;

use tracing::debug;

use super::protocol::{LockMap, OutboundMessage};
use super::session::SyncState;
use crate::bridge::{DocumentBridge, MarkerKind};

/// Every lock known to this client: element id -> owner id.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LockTable {
    entries: BTreeMap<String, String>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or overwrites a lock, returning the previous owner.
    pub fn insert(
        &mut self,
        element_id: impl Into<String>,
        owner_id: impl Into<String>,
    ) -> Option<String> {
        self.entries.insert(element_id.into(), owner_id.into())
    }

    /// Removes a lock, returning its owner.
    pub fn remove(&mut self, element_id: &str) -> Option<String> {
        self.entries.remove(element_id)
    }

    pub fn owner_of(&self, element_id: &str) -> Option<&str> {
        self.entries.get(element_id).map(String::as_str)
    }

    pub fn contains(&self, element_id: &str) -> bool {
        self.entries.contains_key(element_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, String> {
        self.entries.iter()
    }

    /// Number of locks whose owner is not `self_id`.
    pub fn count_held_by_others(&self, self_id: Option<&str>) -> usize {
        self.entries
            .values()
            .filter(|owner| Some(owner.as_str()) != self_id)
            .count()
    }

    /// Swaps in a whole new table and returns the old one.
    pub fn replace_all(&mut self, locks: LockMap) -> LockTable {
        std::mem::replace(self, LockTable { entries: locks })
    }
}

/// What the local participant holds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LocalLock {
    #[default]
    Unlocked,
    Holding(String),
}

/// Drives lock requests from local selection and lock markers from
/// remote lock messages.
///
/// The session and lock table are passed in explicitly on every call;
/// the coordinator itself only owns [`LocalLock`].
#[derive(Debug, Default)]
pub struct LockCoordinator {
    local: LocalLock,
}

impl LockCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn local_lock(&self) -> &LocalLock {
        &self.local
    }

    /// The element we hold, if any.
    pub fn held(&self) -> Option<&str> {
        match &self.local {
            LocalLock::Unlocked => None,
            LocalLock::Holding(element_id) => Some(element_id),
        }
    }

    /// Transitions on a selection change and returns the messages to send,
    /// in order. An empty id counts as no selection.
    pub fn on_selection_changed(&mut self, selected: Option<&str>) -> Vec<OutboundMessage> {
        let selected = selected.filter(|id| !id.is_empty());

        match (selected, &self.local) {
            (Some(element_id), LocalLock::Holding(held)) if held == element_id => Vec::new(),
            (Some(element_id), LocalLock::Holding(held)) => {
                let messages = vec![
                    OutboundMessage::unlock(held.clone()),
                    OutboundMessage::lock(element_id),
                ];
                self.local = LocalLock::Holding(element_id.to_string());
                messages
            }
            (Some(element_id), LocalLock::Unlocked) => {
                self.local = LocalLock::Holding(element_id.to_string());
                vec![OutboundMessage::lock(element_id)]
            }
            (None, LocalLock::Holding(held)) => {
                let messages = vec![OutboundMessage::unlock(held.clone())];
                self.local = LocalLock::Unlocked;
                messages
            }
            (None, LocalLock::Unlocked) => Vec::new(),
        }
    }

    /// Applies a remote `lock`. Our own locks are recorded but never
    /// marked.
    pub fn apply_lock<B: DocumentBridge>(
        &self,
        state: &mut SyncState,
        bridge: &mut B,
        element_id: String,
        owner_id: String,
    ) {
        if state.is_self(&owner_id) {
            bridge.clear_element_marker(&element_id, MarkerKind::LockedByOther);
        } else {
            bridge.set_element_marker(&element_id, MarkerKind::LockedByOther);
        }
        debug!(element_id = %element_id, owner_id = %owner_id, "element locked");
        state.locks_mut().insert(element_id, owner_id);
    }

    /// Applies a remote `unlock`.
    pub fn apply_unlock<B: DocumentBridge>(
        &self,
        state: &mut SyncState,
        bridge: &mut B,
        element_id: &str,
    ) {
        state.locks_mut().remove(element_id);
        bridge.clear_element_marker(element_id, MarkerKind::LockedByOther);
        debug!(element_id = %element_id, "element unlocked");
    }

    /// Applies a remote `bulk_unlock`. Other entries are untouched.
    pub fn apply_bulk_unlock<B: DocumentBridge>(
        &self,
        state: &mut SyncState,
        bridge: &mut B,
        element_ids: &[String],
    ) {
        for element_id in element_ids {
            state.locks_mut().remove(element_id);
            bridge.clear_element_marker(element_id, MarkerKind::LockedByOther);
        }
        debug!(count = element_ids.len(), "elements bulk unlocked");
    }

    /// Replaces the whole lock table after a full document load. `None`
    /// means no locks accompanied the document.
    pub fn replace_locks<B: DocumentBridge>(
        &self,
        state: &mut SyncState,
        bridge: &mut B,
        locks: Option<LockMap>,
    ) {
        let previous = state.locks_mut().replace_all(locks.unwrap_or_default());
        for (element_id, _) in previous.iter() {
            bridge.clear_element_marker(element_id, MarkerKind::LockedByOther);
        }

        let self_id = state.self_id();
        for (element_id, owner_id) in state.locks().iter() {
            if Some(owner_id.as_str()) != self_id {
                bridge.set_element_marker(element_id, MarkerKind::LockedByOther);
            }
        }
    }

    /// Empties the lock table and removes every marker (local import).
    pub fn clear_locks<B: DocumentBridge>(&self, state: &mut SyncState, bridge: &mut B) {
        self.replace_locks(state, bridge, None);
    }
}

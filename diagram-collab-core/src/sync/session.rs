//! Connection identity and the state the sync core owns.

use super::connection::ConnectionState;
use super::locks::LockTable;

/// Identity assigned by the server for one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    self_id: String,
    participant_count: u32,
}

impl Session {
    /// Creates a session from an `init` message. A missing count means
    /// we are alone in the room; the count never drops below one.
    pub fn new(self_id: impl Into<String>, users_count: Option<u32>) -> Self {
        Self {
            self_id: self_id.into(),
            participant_count: users_count.unwrap_or(1).max(1),
        }
    }

    pub fn self_id(&self) -> &str {
        &self.self_id
    }

    pub fn participant_count(&self) -> u32 {
        self.participant_count
    }

    fn set_participant_count(&mut self, users_count: Option<u32>) {
        self.participant_count = users_count.unwrap_or(1).max(1);
    }
}

/// Session plus lock table: the single source of truth for who we are
/// and which elements other participants hold.
///
/// Only the message router and the lock coordinator mutate it, always
/// from the client's event loop.
#[derive(Debug, Default)]
pub struct SyncState {
    session: Option<Session>,
    locks: LockTable,
}

impl SyncState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn self_id(&self) -> Option<&str> {
        self.session.as_ref().map(Session::self_id)
    }

    /// True if `participant_id` is the id the server assigned to us.
    pub fn is_self(&self, participant_id: &str) -> bool {
        self.self_id() == Some(participant_id)
    }

    /// Replaces the session wholesale. Called for `init` only.
    pub fn establish(&mut self, self_id: impl Into<String>, users_count: Option<u32>) {
        self.session = Some(Session::new(self_id, users_count));
    }

    /// Applies a `users` message. Returns false when no session exists yet.
    pub fn update_participants(&mut self, users_count: Option<u32>) -> bool {
        match self.session.as_mut() {
            Some(session) => {
                session.set_participant_count(users_count);
                true
            }
            None => false,
        }
    }

    pub fn locks(&self) -> &LockTable {
        &self.locks
    }

    pub fn locks_mut(&mut self) -> &mut LockTable {
        &mut self.locks
    }
}

/// Snapshot published to observers (status line, online user count).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub room: String,
    pub connection: ConnectionState,
    pub self_id: Option<String>,
    pub participant_count: u32,
    /// Elements locked by other participants
    pub remote_locks: usize,
    /// Element the local participant holds
    pub held_lock: Option<String>,
}

impl SessionInfo {
    pub fn new(room: impl Into<String>) -> Self {
        Self {
            room: room.into(),
            connection: ConnectionState::Closed,
            self_id: None,
            participant_count: 0,
            remote_locks: 0,
            held_lock: None,
        }
    }
}

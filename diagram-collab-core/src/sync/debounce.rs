//! Trailing-edge debounce for full document broadcasts.
//!
//! A single user gesture (drag, resize) produces many edit-history
//! changes. Each change pushes the pending broadcast back; only after a
//! quiet period does [`BroadcastDebouncer::ready`] complete, once.

use tokio::time::Duration;

use super::timer::Timer;

/// Quiet period before a burst of changes is broadcast.
pub const BROADCAST_DEBOUNCE: Duration = Duration::from_millis(400);

/// Pending broadcast state: one timer plus a "dirty since last send" flag.
#[derive(Debug)]
pub struct BroadcastDebouncer {
    delay: Duration,
    timer: Timer,
    dirty: bool,
}

impl BroadcastDebouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            timer: Timer::new(),
            dirty: false,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Records a committed document change and restarts the quiet period.
    pub fn note_change(&mut self) {
        self.dirty = true;
        self.timer.schedule(self.delay);
    }

    /// True while a change is waiting to be broadcast.
    pub fn is_pending(&self) -> bool {
        self.dirty
    }

    /// Drops the pending broadcast, if any.
    pub fn cancel(&mut self) {
        self.timer.cancel();
        self.dirty = false;
    }

    /// Completes when the quiet period after the last change has elapsed.
    ///
    /// The caller performs the broadcast itself, reading the document
    /// state at that moment. Cancel safe.
    pub async fn ready(&mut self) {
        self.timer.fired().await;
        self.dirty = false;
    }
}

impl Default for BroadcastDebouncer {
    fn default() -> Self {
        Self::new(BROADCAST_DEBOUNCE)
    }
}

//! Single-shot, reschedulable timer handle.
//!
//! The debouncer and the reconnect loop each own their own instance, so
//! rescheduling one can never cancel the other.

use std::future;

use tokio::time::{sleep_until, Duration, Instant};

/// A timer that is either disarmed or armed with one deadline.
#[derive(Debug, Default)]
pub struct Timer {
    deadline: Option<Instant>,
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms the timer `after` from now, replacing any pending deadline.
    pub fn schedule(&mut self, after: Duration) {
        self.deadline = Some(Instant::now() + after);
    }

    /// Disarms the timer. A no-op if it is not armed.
    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Completes once the armed deadline has passed and disarms the timer.
    ///
    /// Never completes while disarmed. Cancel safe: dropping the future
    /// before it completes leaves the deadline in place.
    pub async fn fired(&mut self) {
        match self.deadline {
            Some(deadline) => {
                sleep_until(deadline).await;
                self.deadline = None;
            }
            None => future::pending::<()>().await,
        }
    }
}

//! Heartbeat monitor
//!
//! Dead-man's switch for the stream. The server sends a `nop` every 30s; the
//! monitor is armed on connect and re-armed on every `nop`. If the deadline
//! passes the connection is treated as dead, because a half-open socket never
//! reports a close on its own.

use std::time::Duration;

use tokio::time::Instant;

/// Server heartbeat cadence plus a guard band
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(35);

#[derive(Debug)]
pub struct HeartbeatMonitor {
    window: Duration,
    deadline: Option<Instant>,
}

impl HeartbeatMonitor {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
        }
    }

    /// Start (or restart) the window from `now`
    pub fn arm(&mut self, now: Instant) {
        self.deadline = Some(now + self.window);
    }

    /// Cancel the pending deadline
    pub fn stop(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// True once the window has elapsed without a re-arm
    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

impl Default for HeartbeatMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_HEARTBEAT_TIMEOUT)
    }
}

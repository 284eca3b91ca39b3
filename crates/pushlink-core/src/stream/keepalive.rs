//! Keepalive pulse
//!
//! While connected, a no-op frame goes out every 20s so the host does not
//! consider the process idle. The interval is owned here; the manager checks
//! the stream on every tick and stops the pulse if it is gone.

use std::future;
use std::time::Duration;

use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

/// Below the host's inactivity threshold
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(20);

#[derive(Debug)]
pub struct KeepalivePulse {
    period: Duration,
    interval: Option<Interval>,
}

impl KeepalivePulse {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            interval: None,
        }
    }

    /// Start ticking; the first tick is one period from now
    pub fn start(&mut self) {
        let mut interval = interval_at(Instant::now() + self.period, self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.interval = Some(interval);
    }

    pub fn stop(&mut self) {
        self.interval = None;
    }

    pub fn is_running(&self) -> bool {
        self.interval.is_some()
    }

    /// Resolve on the next tick; never resolves while stopped
    pub async fn tick(&mut self) {
        match self.interval.as_mut() {
            Some(interval) => {
                interval.tick().await;
            }
            None => future::pending::<()>().await,
        }
    }
}

impl Default for KeepalivePulse {
    fn default() -> Self {
        Self::new(DEFAULT_KEEPALIVE_INTERVAL)
    }
}

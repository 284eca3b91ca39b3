//! Reconnection policy
//!
//! Two tiers driven by one object:
//!
//! - **Fast tier**: after a disconnect, retry every `retry_interval` until
//!   `max_attempts` consecutive failures. A due retry that finds the network
//!   down (or the stream already back) re-schedules itself without spending
//!   an attempt.
//! - **Slow sweep**: a periodic check that, once the fast tier is exhausted
//!   and nothing is connected, resets the budget and tries once more.
//!
//! The policy only decides. The connection manager owns the clock loop and
//! calls [`ReconnectionPolicy::poll`] whenever [`next_wakeup`] passes.
//!
//! [`next_wakeup`]: ReconnectionPolicy::next_wakeup

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::ConnectionSettings;

/// Snapshot of the world the policy needs when a deadline passes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyContext {
    pub online: bool,
    pub has_credential: bool,
    /// The manager is Disconnected with no stream handle
    pub idle: bool,
}

/// What the manager should do after a poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyAction {
    /// Open a new stream (fast tier)
    Retry,
    /// Open a new stream after a budget reset (slow sweep)
    Sweep,
}

/// Outcome of reporting a disconnect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disconnected {
    /// A retry is scheduled at the given instant
    Scheduled { attempt: u32, at: Instant },
    /// The fast tier gave up
    Exhausted,
    /// No credential; nothing scheduled
    Idle,
}

#[derive(Debug)]
pub struct ReconnectionPolicy {
    max_attempts: u32,
    retry_interval: Duration,
    sweep_interval: Duration,
    attempts: u32,
    next_retry: Option<Instant>,
    next_sweep: Instant,
}

impl ReconnectionPolicy {
    pub fn new(settings: &ConnectionSettings, now: Instant) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            retry_interval: settings.retry_interval(),
            sweep_interval: settings.sweep_interval(),
            attempts: 0,
            next_retry: None,
            next_sweep: now + settings.sweep_interval(),
        }
    }

    /// Consecutive failed attempts, in `[0, max_attempts]`
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// The fast tier has given up; a manual retry is worth offering
    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    pub fn pending_retry(&self) -> Option<Instant> {
        self.next_retry
    }

    /// Fresh start: zero the budget and drop any pending retry
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.next_retry = None;
    }

    /// A stream opened successfully
    pub fn on_connected(&mut self) {
        self.reset();
    }

    /// A stream closed, failed to open, or went silent
    pub fn on_disconnected(&mut self, now: Instant, has_credential: bool) -> Disconnected {
        if !has_credential {
            self.next_retry = None;
            return Disconnected::Idle;
        }

        self.attempts = (self.attempts + 1).min(self.max_attempts);
        if self.attempts < self.max_attempts {
            let at = now + self.retry_interval;
            self.next_retry = Some(at);
            info!(
                "Reconnection attempt {}/{} in {:?}",
                self.attempts, self.max_attempts, self.retry_interval
            );
            Disconnected::Scheduled {
                attempt: self.attempts,
                at,
            }
        } else {
            self.next_retry = None;
            warn!("Max reconnection attempts reached - manual retry required");
            Disconnected::Exhausted
        }
    }

    /// Schedule a retry without spending an attempt (network reported down)
    pub fn defer(&mut self, now: Instant) {
        self.next_retry = Some(now + self.retry_interval);
    }

    /// Earliest instant at which [`poll`](Self::poll) has work to do
    pub fn next_wakeup(&self) -> Instant {
        match self.next_retry {
            Some(retry) => retry.min(self.next_sweep),
            None => self.next_sweep,
        }
    }

    /// Advance both tiers to `now`
    pub fn poll(&mut self, now: Instant, ctx: PolicyContext) -> Option<PolicyAction> {
        let mut action = None;

        if let Some(retry_at) = self.next_retry {
            if now >= retry_at {
                self.next_retry = None;
                if !ctx.has_credential {
                    debug!("Dropping scheduled retry: no credential");
                } else if !ctx.idle {
                    debug!("Dropping scheduled retry: connection already in progress");
                } else if !ctx.online {
                    debug!("Network unreachable, deferring retry");
                    self.defer(now);
                } else {
                    action = Some(PolicyAction::Retry);
                }
            }
        }

        if now >= self.next_sweep {
            self.next_sweep = now + self.sweep_interval;
            if action.is_none()
                && self.is_exhausted()
                && ctx.idle
                && ctx.has_credential
                && ctx.online
            {
                info!("Sweep: retry budget exhausted and disconnected, trying a fresh connection");
                self.reset();
                action = Some(PolicyAction::Sweep);
            }
        }

        action
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IDLE_ONLINE: PolicyContext = PolicyContext {
        online: true,
        has_credential: true,
        idle: true,
    };

    fn policy_with_sweep(sweep_secs: u64) -> (ReconnectionPolicy, Instant) {
        let now = Instant::now();
        let settings = ConnectionSettings {
            sweep_interval_secs: sweep_secs,
            ..ConnectionSettings::default()
        };
        (ReconnectionPolicy::new(&settings, now), now)
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn test_disconnect_schedules_retry_after_interval() {
        let (mut policy, now) = policy_with_sweep(600);

        let outcome = policy.on_disconnected(now, true);
        assert_eq!(
            outcome,
            Disconnected::Scheduled {
                attempt: 1,
                at: now + secs(5)
            }
        );
        assert_eq!(policy.next_wakeup(), now + secs(5));

        assert_eq!(policy.poll(now + secs(4), IDLE_ONLINE), None);
        assert_eq!(
            policy.poll(now + secs(5), IDLE_ONLINE),
            Some(PolicyAction::Retry)
        );
        assert!(policy.pending_retry().is_none());
    }

    #[test]
    fn test_counter_never_exceeds_max_and_stops_scheduling() {
        let (mut policy, now) = policy_with_sweep(600);

        for attempt in 1..5 {
            assert!(matches!(
                policy.on_disconnected(now, true),
                Disconnected::Scheduled { attempt: a, .. } if a == attempt
            ));
            assert!(!policy.is_exhausted());
        }

        assert_eq!(policy.on_disconnected(now, true), Disconnected::Exhausted);
        assert!(policy.is_exhausted());
        assert!(policy.pending_retry().is_none());

        // Further failures do not push the counter past the bound
        policy.on_disconnected(now, true);
        assert_eq!(policy.attempts(), 5);
    }

    #[test]
    fn test_offline_retry_defers_without_spending_attempt() {
        let (mut policy, now) = policy_with_sweep(600);
        policy.on_disconnected(now, true);

        let offline = PolicyContext {
            online: false,
            ..IDLE_ONLINE
        };
        assert_eq!(policy.poll(now + secs(5), offline), None);
        assert_eq!(policy.pending_retry(), Some(now + secs(10)));
        assert_eq!(policy.attempts(), 1);

        assert_eq!(
            policy.poll(now + secs(10), IDLE_ONLINE),
            Some(PolicyAction::Retry)
        );
    }

    #[test]
    fn test_retry_dropped_when_not_idle() {
        let (mut policy, now) = policy_with_sweep(600);
        policy.on_disconnected(now, true);

        let busy = PolicyContext {
            idle: false,
            ..IDLE_ONLINE
        };
        assert_eq!(policy.poll(now + secs(5), busy), None);
        assert!(policy.pending_retry().is_none());
    }

    #[test]
    fn test_no_credential_schedules_nothing() {
        let (mut policy, now) = policy_with_sweep(600);
        assert_eq!(policy.on_disconnected(now, false), Disconnected::Idle);
        assert_eq!(policy.attempts(), 0);
        assert!(policy.pending_retry().is_none());
    }

    #[test]
    fn test_reset_clears_budget_and_pending_retry() {
        let (mut policy, now) = policy_with_sweep(600);
        for _ in 0..5 {
            policy.on_disconnected(now, true);
        }
        assert!(policy.is_exhausted());

        policy.reset();
        assert_eq!(policy.attempts(), 0);
        assert!(!policy.is_exhausted());
        assert!(policy.pending_retry().is_none());
    }

    #[test]
    fn test_sweep_only_fires_when_exhausted() {
        let (mut policy, now) = policy_with_sweep(5);

        // Not exhausted: the sweep tick passes without action
        assert_eq!(policy.poll(now + secs(5), IDLE_ONLINE), None);

        for _ in 0..5 {
            policy.on_disconnected(now + secs(5), true);
        }
        assert!(policy.is_exhausted());

        assert_eq!(
            policy.poll(now + secs(10), IDLE_ONLINE),
            Some(PolicyAction::Sweep)
        );
        assert_eq!(policy.attempts(), 0);
    }

    #[test]
    fn test_sweep_skips_when_connected_or_signed_out() {
        let (mut policy, now) = policy_with_sweep(5);
        for _ in 0..5 {
            policy.on_disconnected(now, true);
        }

        let connected = PolicyContext {
            idle: false,
            ..IDLE_ONLINE
        };
        assert_eq!(policy.poll(now + secs(5), connected), None);

        let signed_out = PolicyContext {
            has_credential: false,
            ..IDLE_ONLINE
        };
        assert_eq!(policy.poll(now + secs(10), signed_out), None);
        assert!(policy.is_exhausted());
    }

    #[test]
    fn test_next_wakeup_is_earliest_deadline() {
        let (mut policy, now) = policy_with_sweep(60);
        assert_eq!(policy.next_wakeup(), now + secs(60));

        policy.on_disconnected(now, true);
        assert_eq!(policy.next_wakeup(), now + secs(5));
    }
}

//! Reconnect backoff
//!
//! The delay grows by a fixed factor on every lost connection and resets as
//! soon as a transport opens. `max_attempts` is checked before the attempt
//! counter moves, `connect_timeout` after each wait.

use std::time::Duration;

use crate::config::ReconnectConfig;

const INITIAL_DELAY: Duration = Duration::from_millis(150);
const BACKOFF_FACTOR: f64 = 1.7;

/// Backoff bookkeeping for one outbound connector
#[derive(Debug, Clone)]
pub struct ReconnectState {
    limits: ReconnectConfig,
    delay: Duration,
    backoff_factor: f64,
    attempts: u32,
    total_waited: Duration,
}

impl ReconnectState {
    pub fn new(limits: ReconnectConfig) -> Self {
        Self {
            limits,
            delay: INITIAL_DELAY,
            backoff_factor: BACKOFF_FACTOR,
            attempts: 1,
            total_waited: Duration::ZERO,
        }
    }

    /// Called on every transport open
    pub fn reset(&mut self) {
        self.delay = INITIAL_DELAY;
        self.backoff_factor = BACKOFF_FACTOR;
        self.attempts = 1;
        self.total_waited = Duration::ZERO;
    }

    /// Advance after a lost connection
    ///
    /// Returns the delay to wait and the attempt number, or `None` once
    /// `max_attempts` is exhausted.
    pub fn next_delay(&mut self) -> Option<(Duration, u32)> {
        let millis = (self.delay.as_millis() as f64 * self.backoff_factor).floor() as u64;
        let mut next = Duration::from_millis(millis);
        if let Some(max) = self.limits.max_delay() {
            next = next.min(max);
        }
        self.delay = next;

        if let Some(max_attempts) = self.limits.max_attempts {
            if self.attempts >= max_attempts {
                return None;
            }
        }

        self.attempts += 1;
        Some((self.delay, self.attempts))
    }

    /// Account for a completed wait; `false` when `connect_timeout` is reached
    pub fn record_wait(&mut self, waited: Duration) -> bool {
        self.total_waited += waited;
        match self.limits.connect_timeout() {
            Some(timeout) => self.total_waited < timeout,
            None => true,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn total_waited(&self) -> Duration {
        self.total_waited
    }

    pub fn current_delay(&self) -> Duration {
        self.delay
    }
}

//! Retry controller for failed page requests
//!
//! Failures are mapped onto a [`RetryDecision`]:
//! - Network and server failures back off exponentially: `min(base * 2^k, cap)`
//!   after `k` consecutive such failures, plus jitter
//! - Protocol failures pause for a fixed interval plus jitter without touching
//!   the backoff counter
//! - Client failures are fatal
//!
//! There is no attempt limit. A harvest keeps retrying transient failures for
//! as long as it runs, and the cap bounds how long any single wait can be.

use crate::config::RetryConfig;
use crate::crawler::fetcher::FetchFailure;
use rand::Rng;
use std::time::Duration;
use tracing::debug;

/// What to do after a failed page request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait this long, then request the same page again
    Retry(Duration),

    /// Give up and surface the failure
    Fatal,
}

/// Tracks the current failure streak and computes retry delays
#[derive(Debug, Clone)]
pub struct RetryController {
    base_delay: Duration,
    max_delay: Duration,
    max_jitter: Duration,
    protocol_pause: Duration,
    consecutive_failures: u32,
}

impl RetryController {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
            max_jitter: config.max_jitter(),
            protocol_pause: config.protocol_pause(),
            consecutive_failures: 0,
        }
    }

    /// Number of back-to-back transient failures since the last success
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Decides how to handle a failure and advances the streak for transient ones
    pub fn on_failure(&mut self, failure: &FetchFailure) -> RetryDecision {
        if failure.is_fatal() {
            return RetryDecision::Fatal;
        }

        if !failure.is_transient() {
            return RetryDecision::Retry(self.protocol_pause + self.jitter());
        }

        let delay = self.backoff_delay(self.consecutive_failures) + self.jitter();
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        debug!(
            streak = self.consecutive_failures,
            delay_ms = delay.as_millis() as u64,
            "backing off"
        );
        RetryDecision::Retry(delay)
    }

    /// Ends any failure streak
    pub fn on_success(&mut self) {
        if self.consecutive_failures > 0 {
            debug!(
                streak = self.consecutive_failures,
                "request succeeded, backoff reset"
            );
        }
        self.consecutive_failures = 0;
    }

    /// Backoff before jitter after `streak` consecutive transient failures
    pub fn backoff_delay(&self, streak: u32) -> Duration {
        2u32.checked_pow(streak)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    fn jitter(&self) -> Duration {
        let bound = self.max_jitter.as_micros() as u64;
        if bound == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(rand::thread_rng().gen_range(0..bound))
    }
}

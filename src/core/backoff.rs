//! Reconnect Backoff
//!
//! Bounded exponential backoff with jitter, used between connection
//! attempts.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry policy parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Reconnect attempts after the first failure; 0 retries forever.
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    pub initial_delay_ms: u64,
    /// Upper bound for the delay, in milliseconds.
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            multiplier: 2.0,
        }
    }
}

/// Tracks the state of consecutive retries.
#[derive(Debug)]
pub struct Backoff {
    config: RetryConfig,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: RetryConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Number of retries handed out since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Upper bound of the delay for the given retry, before jitter.
    fn ceiling(&self, attempt: u32) -> Duration {
        let factor = self.config.multiplier.max(1.0).powi(attempt as i32);
        let millis = (self.config.initial_delay_ms as f64 * factor)
            .min(self.config.max_delay_ms as f64)
            .max(0.0);
        Duration::from_millis(millis as u64)
    }

    /// Returns the delay before the next attempt, or `None` once the attempts
    /// are used up.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.config.max_attempts != 0 && self.attempt >= self.config.max_attempts {
            return None;
        }
        let ceiling = self.ceiling(self.attempt);
        self.attempt += 1;
        // delay is drawn from the upper half of the ceiling
        let half = ceiling / 2;
        let jitter = if half.is_zero() {
            Duration::ZERO
        } else {
            rand::thread_rng().gen_range(Duration::ZERO..=half)
        };
        Some(half + jitter)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

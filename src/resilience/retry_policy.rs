//! Retry Policy
//!
//! Sole authority on retry-versus-dead-letter. Every other component hands
//! its failures here and obeys the decision.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Classification of a delivery failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Infrastructure trouble (broker/DB unreachable, timeout). Retried
    /// with backoff.
    Transient,
    /// Serialization or validation failure. Retrying cannot help; goes
    /// straight to the dead letter sink regardless of attempt count.
    NonRetryable,
}

/// Decision for a record that just failed a delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Schedule another attempt after `delay`.
    Retry { delay: Duration },
    /// Hand the record to the dead letter sink.
    DeadLetter,
}

/// Exponential backoff with jitter and a dead-letter ceiling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Failed attempts after which a record is dead-lettered
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i32,
    /// Base delay in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Delay cap in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Jitter as a fraction of the delay (0.1 = ±10%)
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

fn default_max_attempts() -> i32 {
    5
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_jitter_factor() -> f64 {
    0.1
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_factor: default_jitter_factor(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: i32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay_ms: base_delay.as_millis() as u64,
            max_delay_ms: max_delay.as_millis() as u64,
            jitter_factor: default_jitter_factor(),
        }
    }

    /// Decide what happens to a record whose delivery just failed.
    ///
    /// `attempts` counts failed deliveries *including* the one that just
    /// happened, so with `max_attempts = 5` the fifth failure dead-letters
    /// and a sixth attempt never runs.
    pub fn next_attempt(&self, attempts: i32, class: ErrorClass) -> RetryDecision {
        if class == ErrorClass::NonRetryable || attempts >= self.max_attempts {
            return RetryDecision::DeadLetter;
        }
        RetryDecision::Retry {
            delay: self.jittered(self.raw_delay(attempts)),
        }
    }

    /// Wall-clock timestamp of the next attempt implied by `next_attempt`.
    pub fn next_attempt_at(&self, attempts: i32, now: DateTime<Utc>) -> DateTime<Utc> {
        let delay = self.jittered(self.raw_delay(attempts));
        now + chrono::Duration::milliseconds(delay.as_millis() as i64)
    }

    /// Deterministic backoff before jitter: `min(max, base * 2^(n-1))` for
    /// the n-th failure. Non-decreasing in `attempts` and capped.
    pub fn raw_delay(&self, attempts: i32) -> Duration {
        let exponent = attempts.saturating_sub(1).clamp(0, 62) as u32;
        let delay_ms = self
            .base_delay_ms
            .saturating_mul(2u64.saturating_pow(exponent))
            .min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        let delay_ms = delay.as_millis() as i64;
        let jitter_range = (delay_ms as f64 * self.jitter_factor) as i64;
        if jitter_range == 0 {
            return delay;
        }
        let jitter = rand::thread_rng().gen_range(-jitter_range..=jitter_range);
        Duration::from_millis((delay_ms + jitter).max(0) as u64)
    }
}

//! Task-level retry policy with exponential backoff and jitter.
//!
//! The decision itself is a pure function of the attempt number, the error
//! class and a jitter value; [`RetryPolicy::decide`] draws the jitter.

use std::time::Duration;

use rand::Rng;

use lingo_models::ErrorKind;

/// What to do with a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-run after `delay`
    Retry { delay: Duration },
    /// Give up and mark the task FAILURE
    Fail,
}

/// Retry configuration.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts in total, including the first one.
    pub max_attempts: u32,
    /// Base delay for exponential backoff (doubles each attempt).
    pub base_delay: Duration,
    /// Cap on the exponential part of the delay.
    pub max_delay: Duration,
    /// Upper bound (exclusive) of the random jitter added to every delay.
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            max_jitter: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Create from `LINGO_RETRY_*` environment variables.
    pub fn from_env() -> Self {
        let base_ms: u64 = std::env::var("LINGO_RETRY_BASE_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(1000);
        Self {
            max_attempts: std::env::var("LINGO_RETRY_MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &u32| *n > 0)
                .unwrap_or(3),
            base_delay: Duration::from_millis(base_ms),
            max_delay: Duration::from_millis(
                std::env::var("LINGO_RETRY_MAX_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(300_000),
            ),
            // Jitter defaults to [0, base)
            max_jitter: Duration::from_millis(
                std::env::var("LINGO_RETRY_JITTER_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(base_ms),
            ),
        }
    }

    /// Exponential part of the delay after `attempt` failed: `base * 2^attempt`,
    /// capped at `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Decide with an explicit jitter value. `attempt` is the 1-based number
    /// of the attempt that just failed. Jitter is clamped below `max_jitter`.
    pub fn decide_with_jitter(&self, attempt: u32, kind: ErrorKind, jitter: Duration) -> RetryDecision {
        if !kind.is_retryable() || attempt >= self.max_attempts {
            return RetryDecision::Fail;
        }
        let jitter = if self.max_jitter.is_zero() {
            Duration::ZERO
        } else {
            jitter.min(self.max_jitter.saturating_sub(Duration::from_nanos(1)))
        };
        RetryDecision::Retry {
            delay: self.backoff(attempt) + jitter,
        }
    }

    /// Decide with jitter drawn uniformly from `[0, max_jitter)`.
    pub fn decide(&self, attempt: u32, kind: ErrorKind) -> RetryDecision {
        let max = self.max_jitter.as_millis() as u64;
        let jitter = if max == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::rng().random_range(0..max))
        };
        self.decide_with_jitter(attempt, kind, jitter)
    }
}

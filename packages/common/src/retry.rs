use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// A single failed attempt, kept for the DLQ envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryAttempt {
    /// 1-based attempt number.
    pub attempt: u8,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

impl RetryAttempt {
    pub fn new(attempt: u8, error: impl Into<String>) -> Self {
        Self {
            attempt,
            error: error.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Bounded exponential backoff for queue-level failures.
///
/// Retries are reserved for infrastructure faults; a cleanly recorded
/// verdict (including `SystemError`) is never retried.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Attempts after the first failure before giving up.
    pub max_attempts: u8,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
        }
    }
}

impl RetryPolicy {
    /// Whether another attempt is allowed after `attempt` failures.
    pub fn allows(&self, attempt: u8) -> bool {
        attempt <= self.max_attempts
    }

    /// Delay before the given 1-based attempt.
    ///
    /// `min(base * 2^(attempt-1) + jitter, max)` with 0-25% jitter.
    pub fn delay_for(&self, attempt: u8) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exp = 2u64.saturating_pow(u32::from(attempt - 1));
        let delay_ms = self.base_delay_ms.saturating_mul(exp);
        let jitter = if delay_ms > 0 {
            rand::rng().random_range(0..=delay_ms / 4)
        } else {
            0
        };

        Duration::from_millis(delay_ms.saturating_add(jitter).min(self.max_delay_ms))
    }
}

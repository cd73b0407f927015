use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::FetchError;

/// Which failures are retried, and how long to wait in between.
///
/// `attempt` is 1-based everywhere: the first try is attempt 1.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use harvest_fetch::RetryPolicy;
///
/// let policy = RetryPolicy::default();
/// assert_eq!(policy.delay_for(1), Duration::from_secs(2));
/// assert_eq!(policy.delay_for(3), Duration::from_secs(8));
/// assert_eq!(policy.delay_for(10), Duration::from_secs(60));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: f64,
    pub backoff_max_secs: u64,
    pub retry_on_429: bool,
    pub retry_on_403: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: 2.0,
            backoff_max_secs: 60,
            retry_on_429: true,
            retry_on_403: false,
        }
    }
}

impl RetryPolicy {
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn backoff(mut self, base: f64, max_secs: u64) -> Self {
        self.backoff_base = base;
        self.backoff_max_secs = max_secs;
        self
    }

    pub fn backoff_max(&self) -> Duration { Duration::from_secs(self.backoff_max_secs) }

    /// Whether `err`, raised by attempt number `attempt`, deserves another try.
    pub fn is_retryable(&self, err: &FetchError, attempt: u32) -> bool {
        if attempt >= self.max_attempts {
            return false;
        }
        match err {
            FetchError::Connect(_)
            | FetchError::Timeout
            | FetchError::Body(_)
            | FetchError::ProtocolViolation(_) => true,
            FetchError::HttpStatus { status, .. } => match *status {
                500..=599 | 408 => true,
                429 => self.retry_on_429,
                403 => self.retry_on_403,
                _ => false,
            },
            FetchError::Ftp { code, .. } => (400..500).contains(code),
            _ => false,
        }
    }

    /// `min(backoff_base ^ attempt, backoff_max)` seconds.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let max = self.backoff_max_secs as f64;
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = self.backoff_base.powi(exponent);
        let secs = if raw.is_nan() || raw < 0.0 {
            0.0
        } else {
            raw.min(max)
        };
        Duration::try_from_secs_f64(secs).unwrap_or(self.backoff_max())
    }
}

//! Retry classification and exponential backoff schedule.
//!
//! The policy is a pure function of the failed attempt's error and the
//! attempt index. It keeps no memory between requests and adds no jitter:
//! `delay(i) = 2^i * base_delay` with an uncapped exponent.

use std::time::Duration;

use crate::error::{ErrorKind, RequestError};

/// Retries used when neither the client config nor the service sets one.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Base unit of the backoff schedule.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(30);

/// Error code a service returns when temporary credentials have expired.
pub const EXPIRED_TOKEN_CODE: &str = "ExpiredTokenException";

/// Error code a service returns when the caller is being throttled.
pub const THROTTLING_CODE: &str = "ProvisionedThroughputExceededException";

/// Retry decision and delay schedule for one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubled for every following one.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Policy with the given retry budget and the default base delay.
    #[must_use]
    pub fn with_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Whether another attempt is permitted for this error.
    ///
    /// Checked in order, first match wins: networking failure, expired
    /// credentials, throttling, HTTP status >= 500.
    #[must_use]
    pub fn is_retryable(&self, error: &RequestError) -> bool {
        if error.kind == ErrorKind::Networking {
            return true;
        }
        if error.code == EXPIRED_TOKEN_CODE || error.code == THROTTLING_CODE {
            return true;
        }
        error.status_code.is_some_and(|status| status >= 500)
    }

    /// Delay to wait after failed attempt `attempt` (0-indexed).
    ///
    /// Saturates at `Duration::MAX` instead of overflowing for very large
    /// attempt indices.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .unwrap_or(Duration::MAX)
    }

    /// Whether a retry budget remains after `retries_so_far` retries.
    #[must_use]
    pub fn has_budget(&self, retries_so_far: u32) -> bool {
        retries_so_far < self.max_retries
    }

    /// The full schedule of delays this policy can produce.
    #[must_use]
    pub fn schedule(&self) -> Vec<Duration> {
        (0..self.max_retries)
            .map(|attempt| self.delay_for_attempt(attempt))
            .collect()
    }
}

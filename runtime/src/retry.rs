//! Retry schedule with exponential backoff and jitter.
//!
//! The schedule is a pure function of the attempt number and a jitter sample,
//! so it can be tested without sleeping. The request executor owns the loop.
//!
//! # Example
//!
//! ```rust
//! use ticket_sync_runtime::retry::RetryPolicy;
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::builder()
//!     .max_retries(3)
//!     .base_delay(Duration::from_secs(1))
//!     .max_delay(Duration::from_secs(30))
//!     .build();
//!
//! assert_eq!(policy.delay_for_attempt(1, Duration::ZERO), Duration::from_secs(2));
//! assert_eq!(policy.delay_for_attempt(3, Duration::from_millis(250)), Duration::from_millis(8250));
//! ```

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry policy configuration for exponential backoff.
///
/// # Default Values
///
/// - `max_retries`: 3 (four attempts in total)
/// - `base_delay`: 1 second
/// - `max_delay`: 30 seconds
/// - `max_jitter`: 1 second
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Additional attempts after the first one
    pub max_retries: u32,
    /// Base of the exponential schedule
    pub base_delay: Duration,
    /// Cap on any single delay
    pub max_delay: Duration,
    /// Upper bound of the random jitter added to each delay
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_jitter: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub const fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            max_retries: None,
            base_delay: None,
            max_delay: None,
            max_jitter: None,
        }
    }

    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before attempt `attempt` (the first retry is attempt 1).
    ///
    /// `min(base · 2^attempt + jitter, max_delay)`, saturating instead of overflowing.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32, jitter: Duration) -> Duration {
        let factor = 2_u32.saturating_pow(attempt);
        self.base_delay
            .saturating_mul(factor)
            .saturating_add(jitter)
            .min(self.max_delay)
    }

    /// Sample a jitter in `[0, max_jitter]`.
    #[must_use]
    pub fn jitter(&self) -> Duration {
        let max_ms = u64::try_from(self.max_jitter.as_millis()).unwrap_or(u64::MAX);
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }

    /// Delay before attempt `attempt` with a fresh jitter sample.
    #[must_use]
    pub fn next_delay(&self, attempt: u32) -> Duration {
        self.delay_for_attempt(attempt, self.jitter())
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    max_retries: Option<u32>,
    base_delay: Option<Duration>,
    max_delay: Option<Duration>,
    max_jitter: Option<Duration>,
}

impl RetryPolicyBuilder {
    /// Set maximum number of retries.
    #[must_use]
    pub const fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Set the base delay.
    #[must_use]
    pub const fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = Some(delay);
        self
    }

    /// Set maximum delay (cap for exponential backoff).
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Set the jitter bound. `Duration::ZERO` disables jitter.
    #[must_use]
    pub const fn max_jitter(mut self, jitter: Duration) -> Self {
        self.max_jitter = Some(jitter);
        self
    }

    /// Build the [`RetryPolicy`].
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        let defaults = RetryPolicy::default();
        RetryPolicy {
            max_retries: self.max_retries.unwrap_or(defaults.max_retries),
            base_delay: self.base_delay.unwrap_or(defaults.base_delay),
            max_delay: self.max_delay.unwrap_or(defaults.max_delay),
            max_jitter: self.max_jitter.unwrap_or(defaults.max_jitter),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_exponential_schedule() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.delay_for_attempt(1, Duration::ZERO), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(2, Duration::ZERO), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(3, Duration::ZERO), Duration::from_secs(8));
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.delay_for_attempt(5, Duration::ZERO), Duration::from_secs(30));
        assert_eq!(
            policy.delay_for_attempt(4, Duration::from_secs(15)),
            Duration::from_secs(30)
        );
        assert_eq!(policy.delay_for_attempt(u32::MAX, Duration::ZERO), Duration::from_secs(30));
    }

    #[test]
    fn test_zero_jitter_bound() {
        let policy = RetryPolicy::builder().max_jitter(Duration::ZERO).build();
        assert_eq!(policy.jitter(), Duration::ZERO);
        assert_eq!(policy.next_delay(1), Duration::from_secs(2));
    }

    #[test]
    fn test_none_policy() {
        assert_eq!(RetryPolicy::none().max_retries, 0);
    }

    proptest! {
        #[test]
        fn jitter_stays_in_bounds(max_ms in 0_u64..5_000) {
            let policy = RetryPolicy::builder().max_jitter(Duration::from_millis(max_ms)).build();
            prop_assert!(policy.jitter() <= Duration::from_millis(max_ms));
        }

        #[test]
        fn delay_never_exceeds_cap(attempt in 0_u32..64, jitter_ms in 0_u64..10_000) {
            let policy = RetryPolicy::default();
            let delay = policy.delay_for_attempt(attempt, Duration::from_millis(jitter_ms));
            prop_assert!(delay <= policy.max_delay);
        }
    }
}

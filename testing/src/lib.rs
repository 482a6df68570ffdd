//! # Ticket Sync Testing
//!
//! Testing utilities for the ticket sync layer.
//!
//! This crate provides:
//! - Deterministic clocks ([`FixedClock`], [`ManualClock`])
//! - Mock implementations of the environment traits ([`InMemoryStorage`],
//!   [`MockTransport`], [`RecordingPushSink`])
//! - Fixtures for tickets, messages, push frames and API responses
//! - proptest strategies for domain types
//!
//! ## Example
//!
//! ```
//! use ticket_sync_testing::{MockTransport, Reply, fixtures};
//! use ticket_sync_core::api::Method;
//!
//! let transport = MockTransport::new();
//! transport.respond(Method::Get, "/tickets", Reply::status(503));
//! transport.respond(Method::Get, "/tickets", Reply::ok(fixtures::tickets_json(&[])));
//! ```

use chrono::{DateTime, Utc};
use ticket_sync_core::environment::Clock;

mod storage;
mod transport;

/// Builders for domain values, push frames and API payloads
pub mod fixtures;

pub use storage::InMemoryStorage;
pub use transport::{MockTransport, RecordingPushSink, Reply};

/// Mock clocks for testing.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Mutex, PoisonError};
    use std::time::Duration;

    /// 2025-01-01 00:00:00 UTC, the epoch of every test.
    #[must_use]
    pub fn test_epoch() -> DateTime<Utc> {
        DateTime::from_timestamp(1_735_689_600, 0).unwrap_or_default()
    }

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use ticket_sync_testing::mocks::FixedClock;
    /// use ticket_sync_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(test_epoch())
    }

    /// Clock that only moves when told to.
    ///
    /// Used where behavior depends on elapsed wall-clock time (breaker cooldown,
    /// cache TTL) but the test must not sleep.
    #[derive(Debug)]
    pub struct ManualClock {
        time: Mutex<DateTime<Utc>>,
    }

    impl Default for ManualClock {
        fn default() -> Self {
            Self::new(test_epoch())
        }
    }

    impl ManualClock {
        /// Start at `time`.
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Mutex::new(time),
            }
        }

        /// Move forward by `by`.
        pub fn advance(&self, by: Duration) {
            let by = chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
            let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            *time = time.checked_add_signed(by).unwrap_or(*time);
        }

        /// Jump to `time`, forwards or backwards.
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner) = time;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::prelude::*;
    use ticket_sync_core::ticket::{SenderRole, TicketStatus};

    /// Any ticket status.
    pub fn arb_status() -> impl Strategy<Value = TicketStatus> {
        prop_oneof![
            Just(TicketStatus::Open),
            Just(TicketStatus::InProgress),
            Just(TicketStatus::Waiting),
            Just(TicketStatus::Done),
            Just(TicketStatus::Closed),
        ]
    }

    /// Any sender role.
    pub fn arb_role() -> impl Strategy<Value = SenderRole> {
        prop_oneof![
            Just(SenderRole::User),
            Just(SenderRole::Admin),
            Just(SenderRole::System),
        ]
    }

    /// Short message text.
    pub fn arb_text() -> impl Strategy<Value = String> {
        "[a-z ]{1,24}"
    }
}

/// Install a `tracing` subscriber for tests.
///
/// Honors `RUST_LOG`; safe to call from every test.
pub fn init_test_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use mocks::{FixedClock, ManualClock, test_clock, test_epoch};

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
        assert_eq!(time1.to_rfc3339(), "2025-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::default();
        clock.advance(Duration::from_secs(90));
        assert_eq!(clock.now(), test_epoch() + chrono::Duration::seconds(90));

        clock.set(test_epoch());
        assert_eq!(clock.now(), test_epoch());
    }
}

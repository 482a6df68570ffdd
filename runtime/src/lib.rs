//! # Ticket Sync Runtime
//!
//! Imperative shell of the ticket synchronization stack.
//!
//! The pure reconciliation rules live in `ticket-sync-core`. This crate runs
//! them against real I/O and adds the resilience policies around the network.
//!
//! ## Core Components
//!
//! - **Request Executor**: deadline, retry with backoff, circuit breaker and offline cache ([`executor`])
//! - **Circuit Breaker**: one windowed breaker per endpoint ([`circuit_breaker`])
//! - **Offline Cache**: versioned, TTL-bound last-known-good reads ([`cache`])
//! - **Ticket Store**: the reducer runtime owning the shared projection ([`store`])
//! - **Synchronizer**: push subscription with adaptive polling fallback ([`sync`])
//! - **Mutation Coordinator**: optimistic writes with confirm/rollback ([`coordinator`])
//! - **Health**: breaker, push and connectivity snapshot ([`health`])
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ticket_sync_runtime::client::TicketSyncClient;
//! use ticket_sync_runtime::config::SyncConfig;
//! use ticket_sync_runtime::signals::EnvironmentSignals;
//! # use ticket_sync_core::environment::{PushSink, Storage};
//! # async fn example(storage: Arc<dyn Storage>, sink: Arc<dyn PushSink>) {
//! let client = TicketSyncClient::over_http(
//!     SyncConfig::from_env(),
//!     storage,
//!     sink,
//!     EnvironmentSignals::default(),
//! );
//!
//! let _poller = client.synchronizer().start_polling();
//! let _guard = client.store().subscribe(|n| println!("{n:?}"));
//! client.load_tickets().await.ok();
//! # }
//! ```

/// Offline cache of last-known-good reads
pub mod cache;

/// Circuit breaker pattern for preventing cascading failures
pub mod circuit_breaker;

/// Component wiring
pub mod client;

/// Environment-driven configuration
pub mod config;

/// Optimistic mutation coordinator
pub mod coordinator;

/// Request executor
pub mod executor;

/// Connectivity health reporting
pub mod health;

/// `reqwest` transport
pub mod http;

/// Notification listeners
pub mod listeners;

/// Prometheus metrics for observability
pub mod metrics;

/// Retry logic with exponential backoff
pub mod retry;

/// Page visibility and network availability
pub mod signals;

/// Ticket store
pub mod store;

/// Realtime synchronizer
pub mod sync;

/// Keyed cancellable timers
pub mod timers;

/// Error types for the runtime
pub mod error {
    use thiserror::Error;
    use ticket_sync_core::error::RequestError;
    use ticket_sync_core::ticket::TicketId;

    /// Why an optimistic mutation was rolled back.
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum MutationError {
        /// The request failed after the executor's retries
        #[error("Mutation rejected: {0}")]
        Rejected(#[from] RequestError),

        /// The ticket is not in the local projection
        #[error("Unknown ticket: {0}")]
        UnknownTicket(TicketId),

        /// The server accepted the write but its answer could not be decoded
        #[error("Failed to decode mutation result: {0}")]
        Decode(String),
    }

    impl MutationError {
        /// The underlying request failure, if any.
        #[must_use]
        pub const fn request_error(&self) -> Option<&RequestError> {
            match self {
                Self::Rejected(error) => Some(error),
                _ => None,
            }
        }
    }
}

pub use client::TicketSyncClient;
pub use config::SyncConfig;
pub use coordinator::{Mutation, MutationCoordinator, MutationResult};
pub use error::MutationError;
pub use executor::RequestExecutor;
pub use health::{HealthReport, HealthStatus};
pub use store::TicketStore;
pub use sync::{PushSignal, Synchronizer};

#[cfg(test)]
mod tests {
    use super::*;
    use ticket_sync_core::error::RequestError;

    #[test]
    fn test_mutation_error_exposes_request_error() {
        let error = MutationError::from(RequestError::from_status(500, "boom"));
        assert!(error.request_error().is_some());
        assert!(MutationError::Decode("bad".into()).request_error().is_none());
    }
}

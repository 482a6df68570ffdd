//! # Ticket Sync Core
//!
//! Pure domain layer for the client-side ticket synchronization stack.
//!
//! This crate holds everything that can be expressed without I/O:
//!
//! - **Model**: tickets, messages and their identifiers ([`ticket`])
//! - **Wire formats**: the remote API envelope ([`api`]) and the push channel frames ([`event`])
//! - **Errors**: the request/cache/reconciliation taxonomy ([`error`])
//! - **Reducer**: every reconciliation rule, as a pure function ([`reducer`])
//! - **Effects**: descriptions of side effects the runtime executes ([`effect`])
//! - **Environment**: the traits the runtime injects (clock, storage, transport, push sink)
//!
//! ## Architecture Principles
//!
//! - Functional Core, Imperative Shell
//! - Every writer of the ticket projection goes through [`reducer::TicketReducer`]
//! - An older `updated_at` never overwrites a newer one
//! - Reconciliation is idempotent and order-independent
//!
//! ## Example
//!
//! ```
//! use ticket_sync_core::event::InboundFrame;
//! use ticket_sync_core::reducer::{Reducer, ReconcileSettings, TicketAction, TicketReducer, TicketState};
//!
//! let frame = InboundFrame::parse(r#"{"type":"ticket:created","data":{
//!     "id":"TK-1","subject":"Printer on fire","status":"open","priority":"high",
//!     "updatedAt":"2025-01-01T00:00:00Z"}}"#).unwrap();
//!
//! let mut state = TicketState::default();
//! let effects = TicketReducer.reduce(
//!     &mut state,
//!     TicketAction::from(frame),
//!     &ReconcileSettings::default(),
//! );
//!
//! assert_eq!(state.tickets.len(), 1);
//! assert_eq!(effects.len(), 1);
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

/// Ticket, message and identifier types
pub mod ticket;

/// Remote API request/response envelope
pub mod api;

/// Push channel frames (inbound events and outbound commands)
pub mod event;

/// Error taxonomy shared by the cache, executor and synchronizer
pub mod error;

/// Observable notifications produced by reconciliation
pub mod notification;

/// Effect descriptions returned by reducers
pub mod effect;

/// Reconciliation reducer over the ticket projection
pub mod reducer;

/// Environment module - Dependency injection traits
///
/// All external collaborators are abstracted behind traits and injected by the
/// runtime: wall-clock time, the persistent key/value store backing the offline
/// cache, the HTTP transport and the outbound half of the push channel.
pub mod environment {
    use crate::api::{ApiRequest, ApiResponse};
    use crate::error::{CacheError, PushError, RequestError};
    use crate::event::OutboundFrame;
    use chrono::{DateTime, Utc};
    use std::future::Future;
    use std::pin::Pin;

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Production - uses system clock
    /// struct SystemClock;
    /// impl Clock for SystemClock {
    ///     fn now(&self) -> DateTime<Utc> {
    ///         Utc::now()
    ///     }
    /// }
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock backed [`Clock`].
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }

    /// Persistent string key/value storage backing the offline cache.
    ///
    /// Implementations report failures (storage disabled, quota exhausted) as
    /// [`CacheError`]; callers are expected to swallow them.
    pub trait Storage: Send + Sync {
        /// Read a value.
        ///
        /// # Errors
        ///
        /// Returns [`CacheError`] if the storage backend is unavailable.
        fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

        /// Write a value, replacing any previous one.
        ///
        /// # Errors
        ///
        /// Returns [`CacheError`] if the backend is unavailable or over quota.
        fn set(&self, key: &str, value: &str) -> Result<(), CacheError>;

        /// Delete a value. Deleting a missing key is not an error.
        ///
        /// # Errors
        ///
        /// Returns [`CacheError`] if the storage backend is unavailable.
        fn remove(&self, key: &str) -> Result<(), CacheError>;

        /// List every stored key.
        ///
        /// # Errors
        ///
        /// Returns [`CacheError`] if the storage backend is unavailable.
        fn keys(&self) -> Result<Vec<String>, CacheError>;
    }

    /// HTTP transport to the remote ticket API.
    ///
    /// A transport performs exactly one network exchange per call. It returns
    /// `Ok` for every HTTP response regardless of status; only connectivity
    /// failures are reported as [`RequestError::Network`]. Deadlines, retries and
    /// status classification belong to the request executor.
    ///
    /// # Dyn Compatibility
    ///
    /// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn`
    /// so the runtime can hold it as `Arc<dyn Transport>`.
    pub trait Transport: Send + Sync {
        /// Perform a single request.
        fn send(
            &self,
            request: ApiRequest,
        ) -> Pin<Box<dyn Future<Output = Result<ApiResponse, RequestError>> + Send + '_>>;
    }

    /// Outbound half of the push channel.
    ///
    /// Reconnection is owned by whoever implements this trait; the synchronizer
    /// only writes frames while it believes the channel is connected.
    pub trait PushSink: Send + Sync {
        /// Queue a frame for delivery.
        ///
        /// # Errors
        ///
        /// Returns [`PushError::Closed`] if the channel is gone.
        fn send(&self, frame: OutboundFrame) -> Result<(), PushError>;
    }
}

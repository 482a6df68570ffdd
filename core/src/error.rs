//! Error taxonomy.
//!
//! | Error | Retried | Counts against breaker | Reaches caller |
//! |---|---|---|---|
//! | [`RequestError::Network`] | yes | no | after retries |
//! | [`RequestError::Timeout`] | yes | yes | after retries |
//! | [`RequestError::HttpServer`] (5xx, 408, 429) | yes | yes | after retries |
//! | [`RequestError::HttpClient`] (other 4xx) | no | no | immediately |
//! | [`RequestError::ServiceUnavailable`] | no | no | immediately |
//! | [`CacheError`] | - | - | never (swallowed) |
//! | [`ReconciliationError`] | - | - | never (frame dropped) |

use std::time::Duration;
use thiserror::Error;

/// Errors from the request executor and transports.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// No connectivity, or the connection was aborted
    #[error("Network error: {0}")]
    Network(String),

    /// The request exceeded its deadline
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Non-retryable 4xx response
    #[error("Client error (status {status}): {message}")]
    HttpClient {
        /// HTTP status code
        status: u16,
        /// Error text from the response envelope
        message: String,
    },

    /// Retryable response: 5xx, 408 Request Timeout or 429 Too Many Requests
    #[error("Server error (status {status}): {message}")]
    HttpServer {
        /// HTTP status code
        status: u16,
        /// Error text from the response envelope
        message: String,
    },

    /// The endpoint's circuit breaker is open and no cached copy exists
    #[error("Service unavailable: circuit open for {endpoint}")]
    ServiceUnavailable {
        /// Endpoint key of the open breaker
        endpoint: String,
    },

    /// A successful response carried a payload of the wrong shape
    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl RequestError {
    /// Classify a non-2xx status.
    #[must_use]
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        if status >= 500 || status == 408 || status == 429 {
            Self::HttpServer { status, message }
        } else {
            Self::HttpClient { status, message }
        }
    }

    /// Whether another attempt may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Timeout(_) | Self::HttpServer { .. }
        )
    }

    /// Whether this failure says something about the endpoint's health.
    #[must_use]
    pub const fn counts_against_breaker(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::HttpServer { .. })
    }

    /// Short label used in logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::Timeout(_) => "timeout",
            Self::HttpClient { .. } => "http_client",
            Self::HttpServer { .. } => "http_server",
            Self::ServiceUnavailable { .. } => "service_unavailable",
            Self::Decode(_) => "decode",
        }
    }
}

/// Failures of the persistent storage behind the offline cache.
///
/// Never surfaced to callers of the cache.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// Storage is disabled or inaccessible
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// Storage refused the write
    #[error("Storage quota exceeded")]
    QuotaExceeded,

    /// A stored entry could not be (de)serialized
    #[error("Cache serialization error: {0}")]
    Serialization(String),
}

/// A push frame that could not be reconciled.
///
/// The offending frame is dropped; other frames are unaffected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReconciliationError {
    /// Not valid JSON, or not an object
    #[error("Malformed frame: {0}")]
    Malformed(String),

    /// The `type` discriminator is missing
    #[error("Frame has no type")]
    MissingType,

    /// The `type` discriminator is not one we subscribe to
    #[error("Unknown frame type: {0}")]
    UnknownType(String),

    /// A known frame whose payload has the wrong shape
    #[error("Invalid {frame_type} payload: {reason}")]
    InvalidPayload {
        /// Frame type
        frame_type: String,
        /// What was wrong
        reason: String,
    },
}

/// Errors from the outbound push channel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PushError {
    /// The channel is closed
    #[error("Push channel closed")]
    Closed,
}

//! Point-in-time view of how well the client can reach the ticket API.
//!
//! The report is read off the live components: each endpoint breaker, the push
//! channel, the connectivity signal and the number of unsettled optimistic
//! writes. [`HealthReport::status`] folds them into one level.

use crate::circuit_breaker::{BreakerSnapshot, State};
use chrono::{DateTime, Utc};
use std::fmt;
use ticket_sync_core::notification::ConnectionState;

/// Overall condition, ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HealthStatus {
    /// Live push, every endpoint closed, online
    Healthy,
    /// Still serving, but through polling, the cache or a trial request
    Degraded,
    /// At least one endpoint is refusing requests
    Unhealthy,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// One endpoint's breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointHealth {
    /// Endpoint key, e.g. `/tickets`
    pub endpoint: String,
    /// Breaker state
    pub state: State,
    /// Failures still inside the monitoring window
    pub recent_failures: usize,
}

impl EndpointHealth {
    /// Condition this breaker contributes to the report.
    #[must_use]
    pub const fn status(&self) -> HealthStatus {
        match self.state {
            State::Closed => HealthStatus::Healthy,
            State::HalfOpen => HealthStatus::Degraded,
            State::Open => HealthStatus::Unhealthy,
        }
    }
}

impl From<BreakerSnapshot> for EndpointHealth {
    fn from(snapshot: BreakerSnapshot) -> Self {
        Self {
            endpoint: snapshot.endpoint,
            state: snapshot.state,
            recent_failures: snapshot.failure_log.len(),
        }
    }
}

/// Health of the sync layer at `checked_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthReport {
    /// Clock reading when the report was taken
    pub checked_at: DateTime<Utc>,
    /// Connectivity signal
    pub online: bool,
    /// Push channel lifecycle
    pub connection: ConnectionState,
    /// Breakers, one per endpoint contacted so far
    pub endpoints: Vec<EndpointHealth>,
    /// Optimistic writes still waiting for the server
    pub pending_mutations: usize,
}

impl HealthReport {
    /// Worst condition across every component.
    #[must_use]
    pub fn status(&self) -> HealthStatus {
        let fallback = if self.online && self.connection == ConnectionState::Connected {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };
        self.endpoints
            .iter()
            .map(EndpointHealth::status)
            .fold(fallback, Ord::max)
    }

    /// Whether nothing is degraded.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.status() == HealthStatus::Healthy
    }

    /// The breaker guarding `endpoint`, if it has been contacted.
    #[must_use]
    pub fn endpoint(&self, endpoint: &str) -> Option<&EndpointHealth> {
        self.endpoints.iter().find(|e| e.endpoint == endpoint)
    }
}

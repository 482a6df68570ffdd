//! Per-endpoint circuit breakers.
//!
//! A circuit breaker monitors calls to one endpoint and "opens" (stops allowing
//! requests) once enough failures land inside a sliding monitoring window.
//!
//! # States
//!
//! - **Closed**: Normal operation. Failures are logged and pruned to the window.
//! - **Open**: The pruned failure log reached the threshold. Attempts are refused
//!   until `reset_timeout` has passed since the failure that opened it.
//! - **HalfOpen**: The cooldown elapsed. Trial requests pass; the first success
//!   closes the breaker, failures follow the same windowed rule as in `Closed`.
//!
//! Breakers are created lazily by [`CircuitBreakerRegistry`] on the first failure
//! of an endpoint and live for the lifetime of the registry.
//!
//! # Example
//!
//! ```rust
//! use ticket_sync_runtime::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerRegistry, State};
//! use ticket_sync_core::environment::SystemClock;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() {
//! let config = CircuitBreakerConfig::builder()
//!     .failure_threshold(5)
//!     .monitoring_window(Duration::from_secs(60))
//!     .reset_timeout(Duration::from_secs(60))
//!     .build();
//!
//! let breakers = CircuitBreakerRegistry::new(config, Arc::new(SystemClock));
//! assert!(breakers.can_attempt("/tickets").await);
//! assert_eq!(breakers.state("/tickets").await, State::Closed);
//! # }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use ticket_sync_core::environment::Clock;
use tokio::sync::RwLock;

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Failures inside the monitoring window that open the circuit
    pub failure_threshold: usize,
    /// How far back failures are remembered
    pub monitoring_window: Duration,
    /// Duration to wait before transitioning from Open to `HalfOpen`
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            monitoring_window: Duration::from_secs(60),
            reset_timeout: Duration::from_secs(60),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new configuration builder.
    #[must_use]
    pub const fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder {
            failure_threshold: None,
            monitoring_window: None,
            reset_timeout: None,
        }
    }
}

/// Builder for [`CircuitBreakerConfig`].
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfigBuilder {
    failure_threshold: Option<usize>,
    monitoring_window: Option<Duration>,
    reset_timeout: Option<Duration>,
}

impl CircuitBreakerConfigBuilder {
    /// Set the failure threshold.
    #[must_use]
    pub const fn failure_threshold(mut self, threshold: usize) -> Self {
        self.failure_threshold = Some(threshold);
        self
    }

    /// Set the monitoring window.
    #[must_use]
    pub const fn monitoring_window(mut self, window: Duration) -> Self {
        self.monitoring_window = Some(window);
        self
    }

    /// Set the reset timeout.
    ///
    /// How long to wait in Open state before trying `HalfOpen`.
    #[must_use]
    pub const fn reset_timeout(mut self, duration: Duration) -> Self {
        self.reset_timeout = Some(duration);
        self
    }

    /// Build the configuration.
    #[must_use]
    pub fn build(self) -> CircuitBreakerConfig {
        let defaults = CircuitBreakerConfig::default();
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold.unwrap_or(defaults.failure_threshold),
            monitoring_window: self.monitoring_window.unwrap_or(defaults.monitoring_window),
            reset_timeout: self.reset_timeout.unwrap_or(defaults.reset_timeout),
        }
    }
}

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum State {
    /// Circuit is closed, requests pass through normally
    Closed,
    /// Circuit is open, requests fail immediately
    Open,
    /// Circuit is half-open, testing if service recovered
    HalfOpen,
}

impl State {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A remembered failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecord {
    /// When it happened
    pub at: DateTime<Utc>,
    /// What went wrong
    pub error: String,
}

/// Internal state of the circuit breaker.
#[derive(Debug)]
struct CircuitBreakerState {
    state: State,
    failure_log: VecDeque<FailureRecord>,
    last_failure_time: Option<DateTime<Utc>>,
}

/// Point-in-time view of one breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerSnapshot {
    /// Endpoint key
    pub endpoint: String,
    /// Current state
    pub state: State,
    /// Failures still inside the monitoring window
    pub failure_log: Vec<FailureRecord>,
    /// When the breaker last opened
    pub last_failure_time: Option<DateTime<Utc>>,
}

/// Circuit breaker guarding a single endpoint.
#[derive(Clone)]
pub struct CircuitBreaker {
    endpoint: Arc<str>,
    config: Arc<CircuitBreakerConfig>,
    clock: Arc<dyn Clock>,
    state: Arc<RwLock<CircuitBreakerState>>,
    // Metrics
    total_successes: Arc<AtomicU64>,
    total_failures: Arc<AtomicU64>,
    total_rejections: Arc<AtomicU64>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("endpoint", &self.endpoint)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker {
    /// Create a closed circuit breaker for `endpoint`.
    #[must_use]
    pub fn new(
        endpoint: impl Into<Arc<str>>,
        config: Arc<CircuitBreakerConfig>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            config,
            clock,
            state: Arc::new(RwLock::new(CircuitBreakerState {
                state: State::Closed,
                failure_log: VecDeque::new(),
                last_failure_time: None,
            })),
            total_successes: Arc::new(AtomicU64::new(0)),
            total_failures: Arc::new(AtomicU64::new(0)),
            total_rejections: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Endpoint key guarded by this breaker.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Get the current state of the circuit breaker.
    pub async fn state(&self) -> State {
        self.state.read().await.state
    }

    /// Whether a call may go out now.
    ///
    /// In `Open`, the first call after `reset_timeout` has elapsed since the
    /// breaker opened moves it to `HalfOpen` and is allowed through.
    pub async fn can_attempt(&self) -> bool {
        let mut state = self.state.write().await;

        match state.state {
            State::Closed | State::HalfOpen => true,
            State::Open => {
                let now = self.clock.now();
                let cooled_down = state
                    .last_failure_time
                    .and_then(|opened| (now - opened).to_std().ok())
                    .is_some_and(|elapsed| elapsed >= self.config.reset_timeout);

                if cooled_down {
                    self.transition(&mut state, State::HalfOpen);
                    true
                } else {
                    self.total_rejections.fetch_add(1, Ordering::Relaxed);
                    false
                }
            },
        }
    }

    /// Record a failure that counts against this endpoint.
    pub async fn record_failure(&self, error: &str) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        let now = self.clock.now();
        let mut state = self.state.write().await;

        state.failure_log.push_back(FailureRecord {
            at: now,
            error: error.to_string(),
        });
        prune(&mut state.failure_log, now, self.config.monitoring_window);

        if state.failure_log.len() >= self.config.failure_threshold {
            state.last_failure_time = Some(now);
            if state.state != State::Open {
                tracing::warn!(
                    endpoint = %self.endpoint,
                    failures = state.failure_log.len(),
                    threshold = self.config.failure_threshold,
                    error,
                    "Circuit breaker opening"
                );
                self.transition(&mut state, State::Open);
            }
        }
    }

    /// Record a successful call. Closes the breaker only from `HalfOpen`.
    pub async fn record_success(&self) {
        self.total_successes.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.write().await;

        if state.state == State::HalfOpen {
            state.failure_log.clear();
            state.last_failure_time = None;
            self.transition(&mut state, State::Closed);
        }
    }

    /// Current state and the failures still inside the window.
    pub async fn snapshot(&self) -> BreakerSnapshot {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        prune(&mut state.failure_log, now, self.config.monitoring_window);

        BreakerSnapshot {
            endpoint: self.endpoint.to_string(),
            state: state.state,
            failure_log: state.failure_log.iter().cloned().collect(),
            last_failure_time: state.last_failure_time,
        }
    }

    /// Get circuit breaker metrics.
    #[must_use]
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        CircuitBreakerMetrics {
            total_successes: self.total_successes.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            total_rejections: self.total_rejections.load(Ordering::Relaxed),
        }
    }

    /// Reset the circuit breaker to closed state.
    pub async fn reset(&self) {
        let mut state = self.state.write().await;
        tracing::info!(endpoint = %self.endpoint, "Circuit breaker manually reset to CLOSED");
        state.failure_log.clear();
        state.last_failure_time = None;
        self.transition(&mut state, State::Closed);
    }

    fn transition(&self, state: &mut CircuitBreakerState, to: State) {
        let from = state.state;
        if from == to {
            return;
        }
        state.state = to;
        if to != State::Open {
            tracing::info!(endpoint = %self.endpoint, %from, %to, "Circuit breaker transition");
        }
        metrics::counter!(
            "circuit_breaker_state_change",
            "endpoint" => self.endpoint.to_string(),
            "from" => from.as_str(),
            "to" => to.as_str()
        )
        .increment(1);
    }
}

fn prune(log: &mut VecDeque<FailureRecord>, now: DateTime<Utc>, window: Duration) {
    while let Some(oldest) = log.front() {
        let expired = (now - oldest.at)
            .to_std()
            .is_ok_and(|age| age > window);
        if !expired {
            break;
        }
        log.pop_front();
    }
}

/// Metrics for circuit breaker monitoring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CircuitBreakerMetrics {
    /// Total number of successful calls
    pub total_successes: u64,
    /// Total number of failed calls
    pub total_failures: u64,
    /// Total number of rejected calls (circuit open)
    pub total_rejections: u64,
}

impl CircuitBreakerMetrics {
    /// Calculate rejection rate (0.0 to 1.0).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn rejection_rate(&self) -> f64 {
        let total = self.total_successes + self.total_failures + self.total_rejections;
        if total == 0 {
            return 0.0;
        }
        self.total_rejections as f64 / total as f64
    }
}

/// Breakers keyed by endpoint, created on first failure.
///
/// Breakers never share state; a failing endpoint does not affect any other.
#[derive(Clone)]
pub struct CircuitBreakerRegistry {
    config: Arc<CircuitBreakerConfig>,
    clock: Arc<dyn Clock>,
    breakers: Arc<RwLock<HashMap<String, CircuitBreaker>>>,
}

impl fmt::Debug for CircuitBreakerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerRegistry")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CircuitBreakerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config: Arc::new(config),
            clock,
            breakers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Breaker for `endpoint`, if one has been created.
    pub async fn get(&self, endpoint: &str) -> Option<CircuitBreaker> {
        self.breakers.read().await.get(endpoint).cloned()
    }

    async fn get_or_create(&self, endpoint: &str) -> CircuitBreaker {
        if let Some(breaker) = self.get(endpoint).await {
            return breaker;
        }
        let mut breakers = self.breakers.write().await;
        breakers
            .entry(endpoint.to_string())
            .or_insert_with(|| {
                CircuitBreaker::new(endpoint, Arc::clone(&self.config), Arc::clone(&self.clock))
            })
            .clone()
    }

    /// Whether a call to `endpoint` may go out now.
    pub async fn can_attempt(&self, endpoint: &str) -> bool {
        match self.get(endpoint).await {
            Some(breaker) => breaker.can_attempt().await,
            None => true,
        }
    }

    /// Record a failure against `endpoint`, creating its breaker if needed.
    pub async fn record_failure(&self, endpoint: &str, error: &str) {
        self.get_or_create(endpoint).await.record_failure(error).await;
    }

    /// Record a success for `endpoint`.
    pub async fn record_success(&self, endpoint: &str) {
        if let Some(breaker) = self.get(endpoint).await {
            breaker.record_success().await;
        }
    }

    /// State of `endpoint`'s breaker; `Closed` if it has never failed.
    pub async fn state(&self, endpoint: &str) -> State {
        match self.get(endpoint).await {
            Some(breaker) => breaker.state().await,
            None => State::Closed,
        }
    }

    /// Snapshots of every breaker, ordered by endpoint.
    pub async fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let breakers: Vec<CircuitBreaker> = self.breakers.read().await.values().cloned().collect();
        let mut snapshots = Vec::with_capacity(breakers.len());
        for breaker in breakers {
            snapshots.push(breaker.snapshot().await);
        }
        snapshots.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));
        snapshots
    }

    /// Manually close `endpoint`'s breaker.
    pub async fn reset(&self, endpoint: &str) {
        if let Some(breaker) = self.get(endpoint).await {
            breaker.reset().await;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Mutex;

    /// Minimal settable clock for breaker tests.
    struct StepClock(Mutex<DateTime<Utc>>);

    impl StepClock {
        fn new() -> Arc<Self> {
            Arc::new(Self(Mutex::new(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap())))
        }

        fn advance(&self, by: Duration) {
            let mut now = self.0.lock().unwrap();
            *now += chrono::Duration::from_std(by).unwrap();
        }
    }

    impl Clock for StepClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    fn breaker(clock: Arc<StepClock>) -> CircuitBreaker {
        CircuitBreaker::new("/tickets", Arc::new(CircuitBreakerConfig::default()), clock)
    }

    #[tokio::test]
    async fn test_opens_after_threshold_and_recovers() {
        let clock = StepClock::new();
        let breaker = breaker(Arc::clone(&clock));

        for _ in 0..4 {
            breaker.record_failure("503").await;
            assert!(breaker.can_attempt().await);
        }
        breaker.record_failure("503").await;
        assert_eq!(breaker.state().await, State::Open);
        assert!(!breaker.can_attempt().await);

        clock.advance(Duration::from_secs(59));
        assert!(!breaker.can_attempt().await);

        clock.advance(Duration::from_secs(1));
        assert!(breaker.can_attempt().await);
        assert_eq!(breaker.state().await, State::HalfOpen);

        breaker.record_success().await;
        let snapshot = breaker.snapshot().await;
        assert_eq!(snapshot.state, State::Closed);
        assert!(snapshot.failure_log.is_empty());
    }

    #[tokio::test]
    async fn test_failures_outside_window_are_pruned() {
        let clock = StepClock::new();
        let breaker = breaker(Arc::clone(&clock));

        for _ in 0..4 {
            breaker.record_failure("503").await;
        }
        clock.advance(Duration::from_secs(61));
        breaker.record_failure("503").await;

        assert_eq!(breaker.state().await, State::Closed);
        assert_eq!(breaker.snapshot().await.failure_log.len(), 1);
    }

    #[tokio::test]
    async fn test_success_in_closed_is_noop() {
        let clock = StepClock::new();
        let breaker = breaker(clock);

        breaker.record_failure("503").await;
        breaker.record_success().await;

        assert_eq!(breaker.snapshot().await.failure_log.len(), 1);
        assert_eq!(breaker.state().await, State::Closed);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens_when_window_is_full() {
        let clock = StepClock::new();
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(2)
            .monitoring_window(Duration::from_secs(120))
            .reset_timeout(Duration::from_secs(10))
            .build();
        let breaker = CircuitBreaker::new("/tickets", Arc::new(config), Arc::clone(&clock) as Arc<dyn Clock>);

        breaker.record_failure("503").await;
        breaker.record_failure("503").await;
        clock.advance(Duration::from_secs(10));
        assert!(breaker.can_attempt().await);

        breaker.record_failure("503").await;
        assert_eq!(breaker.state().await, State::Open);
        assert!(!breaker.can_attempt().await);
    }

    #[tokio::test]
    async fn test_registry_is_lazy_and_isolated() {
        let clock = StepClock::new();
        let registry = CircuitBreakerRegistry::new(
            CircuitBreakerConfig::builder().failure_threshold(1).build(),
            clock,
        );

        assert!(registry.get("/tickets").await.is_none());
        registry.record_success("/tickets").await;
        assert!(registry.get("/tickets").await.is_none());

        registry.record_failure("/tickets", "500").await;
        assert_eq!(registry.state("/tickets").await, State::Open);
        assert_eq!(registry.state("/tickets/TK-1").await, State::Closed);
        assert!(registry.can_attempt("/tickets/TK-1").await);
        assert!(!registry.can_attempt("/tickets").await);

        let metrics = registry.get("/tickets").await.unwrap().metrics();
        assert_eq!(metrics.total_failures, 1);
        assert_eq!(metrics.total_rejections, 1);

        registry.reset("/tickets").await;
        assert!(registry.can_attempt("/tickets").await);
        assert_eq!(registry.snapshots().await.len(), 1);
    }

    #[test]
    fn test_config_builder_defaults() {
        let config = CircuitBreakerConfig::builder().failure_threshold(3).build();
        assert_eq!(config.failure_threshold, 3);
        assert_eq!(config.monitoring_window, Duration::from_secs(60));
        assert_eq!(config.reset_timeout, Duration::from_secs(60));
    }
}

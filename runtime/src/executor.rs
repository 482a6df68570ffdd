//! Request executor: deadline, retry with backoff, circuit breaker and offline cache.
//!
//! For every request the executor:
//!
//! 1. asks the endpoint's breaker; if it refuses, a cacheable read is served
//!    from cache, anything else fails with [`RequestError::ServiceUnavailable`]
//! 2. serves cacheable reads from cache without touching the network while offline
//! 3. runs up to `1 + max_retries` sequential attempts, each under a deadline,
//!    sleeping [`RetryPolicy::next_delay`] between them
//! 4. stores successful cacheable reads, and falls back to the cache when a
//!    read runs out of retries
//!
//! Only timeouts and retryable statuses count against the breaker. Other 4xx
//! responses fail immediately and are never retried.

use crate::cache::{OfflineCache, cache_key};
use crate::circuit_breaker::CircuitBreakerRegistry;
use crate::retry::RetryPolicy;
use crate::signals::EnvironmentSignals;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use ticket_sync_core::api::{ApiRequest, Pagination};
use ticket_sync_core::environment::Transport;
use ticket_sync_core::error::RequestError;
use tokio::time::Instant;

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    /// A live network exchange
    Network,
    /// The offline cache
    Cache,
}

/// A successful result.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorResponse {
    /// Response data (`null` when the envelope had none)
    pub data: Value,
    /// Optional message from the envelope
    pub message: Option<String>,
    /// Pagination from the envelope
    pub pagination: Option<Pagination>,
    /// Network or cache
    pub source: ResponseSource,
}

impl ExecutorResponse {
    fn cached(data: Value) -> Self {
        Self {
            data,
            message: None,
            pagination: None,
            source: ResponseSource::Cache,
        }
    }

    /// Whether this response was served from the offline cache.
    #[must_use]
    pub fn is_cached(&self) -> bool {
        self.source == ResponseSource::Cache
    }
}

/// Issues requests through a [`Transport`] with resilience policies applied.
#[derive(Clone)]
pub struct RequestExecutor {
    transport: Arc<dyn Transport>,
    breakers: CircuitBreakerRegistry,
    cache: OfflineCache,
    signals: EnvironmentSignals,
    retry: RetryPolicy,
    timeout: Duration,
}

impl fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl RequestExecutor {
    /// Default per-attempt deadline.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Create an executor.
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        breakers: CircuitBreakerRegistry,
        cache: OfflineCache,
        signals: EnvironmentSignals,
    ) -> Self {
        Self {
            transport,
            breakers,
            cache,
            signals,
            retry: RetryPolicy::default(),
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    /// Replace the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Replace the per-attempt deadline.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Breakers consulted by this executor.
    #[must_use]
    pub const fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    /// Cache consulted by this executor.
    #[must_use]
    pub const fn cache(&self) -> &OfflineCache {
        &self.cache
    }

    /// Environment signals consulted by this executor.
    #[must_use]
    pub const fn signals(&self) -> &EnvironmentSignals {
        &self.signals
    }

    /// Execute `request`.
    ///
    /// `cacheable` only has an effect on read methods.
    ///
    /// # Errors
    ///
    /// - [`RequestError::ServiceUnavailable`] if the breaker is open and nothing is cached
    /// - [`RequestError::Network`] if offline and nothing is cached, or after retries
    /// - [`RequestError::Timeout`] / [`RequestError::HttpServer`] after retries
    /// - [`RequestError::HttpClient`] immediately
    /// - [`RequestError::Decode`] if a 2xx response reports `success: false`
    #[tracing::instrument(
        skip(self, request),
        fields(method = %request.method, path = %request.path)
    )]
    pub async fn execute(
        &self,
        request: ApiRequest,
        cacheable: bool,
    ) -> Result<ExecutorResponse, RequestError> {
        let endpoint = request.endpoint_key().to_string();
        let key = (cacheable && request.method.is_read())
            .then(|| cache_key(&request.path, &request.query));

        if !self.breakers.can_attempt(&endpoint).await {
            tracing::warn!(endpoint, "Circuit open, not sending request");
            return self
                .from_cache(key.as_deref())
                .ok_or(RequestError::ServiceUnavailable { endpoint });
        }

        if key.is_some() && !self.signals.is_online() {
            tracing::debug!("Offline, serving read from cache");
            return self
                .from_cache(key.as_deref())
                .ok_or_else(|| RequestError::Network("offline".to_string()));
        }

        let mut attempt: u32 = 0;
        loop {
            let error = match self.attempt(request.clone()).await {
                Ok(response) => {
                    self.breakers.record_success(&endpoint).await;
                    if let Some(key) = &key {
                        self.cache.set(key, &response.data);
                    }
                    if attempt > 0 {
                        tracing::info!(attempt, "Request succeeded after retry");
                    }
                    return Ok(response);
                },
                Err(error) => error,
            };

            metrics::counter!("request_failures_total", "kind" => error.kind()).increment(1);
            if error.counts_against_breaker() {
                self.breakers.record_failure(&endpoint, &error.to_string()).await;
            }

            if !error.is_transient() {
                return Err(error);
            }
            if attempt >= self.retry.max_retries {
                tracing::error!(attempt, %error, "Request failed after max retries");
                return self.from_cache(key.as_deref()).ok_or(error);
            }

            attempt += 1;
            let delay = self.retry.next_delay(attempt);
            tracing::warn!(
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                %error,
                "Request failed, retrying"
            );
            metrics::counter!("request_retries_total").increment(1);
            tokio::time::sleep(delay).await;

            if !self.breakers.can_attempt(&endpoint).await {
                tracing::warn!(endpoint, "Circuit opened during retries");
                return self
                    .from_cache(key.as_deref())
                    .ok_or(RequestError::ServiceUnavailable { endpoint });
            }
        }
    }

    /// One network exchange under the deadline, with status classification.
    async fn attempt(&self, request: ApiRequest) -> Result<ExecutorResponse, RequestError> {
        metrics::counter!("request_attempts_total").increment(1);
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.timeout, self.transport.send(request)).await;
        metrics::histogram!("request_duration_seconds").record(started.elapsed().as_secs_f64());

        let response = outcome.map_err(|_| RequestError::Timeout(self.timeout))??;
        if !response.is_success_status() {
            return Err(RequestError::from_status(
                response.status,
                response.body.error_text(),
            ));
        }
        if !response.body.success {
            return Err(RequestError::Decode(format!(
                "status {} with success=false: {}",
                response.status,
                response.body.error_text()
            )));
        }

        Ok(ExecutorResponse {
            data: response.body.data.unwrap_or(Value::Null),
            message: response.body.message,
            pagination: response.body.pagination,
            source: ResponseSource::Network,
        })
    }

    fn from_cache(&self, key: Option<&str>) -> Option<ExecutorResponse> {
        key.and_then(|key| self.cache.get(key))
            .map(ExecutorResponse::cached)
    }
}

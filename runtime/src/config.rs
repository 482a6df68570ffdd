//! Configuration management.
//!
//! Loads configuration from `TICKET_SYNC_*` environment variables; anything
//! missing or unparsable falls back to the default.

use crate::cache::CacheConfig;
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use ticket_sync_core::reducer::ReconcileSettings;
use ticket_sync_core::ticket::SenderRole;

/// Fallback polling cadence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Interval while the page is in the foreground
    pub base_interval: Duration,
    /// Interval multiplier while the page is in the background
    pub background_multiplier: u32,
    /// Minimum spacing between two polls, whatever the state
    pub min_spacing: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_secs(30),
            background_multiplier: 3,
            min_spacing: Duration::from_secs(5),
        }
    }
}

impl PollingConfig {
    /// Interval between polls for the given visibility.
    #[must_use]
    pub fn interval_for(&self, visible: bool) -> Duration {
        let interval = if visible {
            self.base_interval
        } else {
            self.base_interval.saturating_mul(self.background_multiplier)
        };
        interval.max(self.min_spacing)
    }
}

/// Complete client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Base URL of the ticket API
    pub base_url: String,
    /// Bearer token sent with every request
    pub auth_token: Option<String>,
    /// Session user, named in the subscribe request and outbound typing frames
    pub user_id: String,
    /// Per-attempt deadline
    pub request_timeout: Duration,
    /// Circuit breaker tuning
    pub breaker: CircuitBreakerConfig,
    /// Retry schedule
    pub retry: RetryPolicy,
    /// Offline cache
    pub cache: CacheConfig,
    /// Fallback polling
    pub polling: PollingConfig,
    /// Reconciliation rules
    pub reconcile: ReconcileSettings,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000/api".to_string(),
            auth_token: None,
            user_id: "anonymous".to_string(),
            request_timeout: Duration::from_secs(10),
            breaker: CircuitBreakerConfig::default(),
            retry: RetryPolicy::default(),
            cache: CacheConfig::default(),
            polling: PollingConfig::default(),
            reconcile: ReconcileSettings::default(),
        }
    }
}

impl SyncConfig {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let parse = |key: &str| lookup(key).and_then(|s| s.trim().parse::<u64>().ok());
        let secs = |key: &str, default: Duration| parse(key).map_or(default, Duration::from_secs);
        let millis = |key: &str, default: Duration| parse(key).map_or(default, Duration::from_millis);

        Self {
            base_url: lookup("TICKET_SYNC_BASE_URL").unwrap_or(defaults.base_url),
            auth_token: lookup("TICKET_SYNC_TOKEN").filter(|t| !t.is_empty()),
            user_id: lookup("TICKET_SYNC_USER_ID").unwrap_or(defaults.user_id),
            request_timeout: millis("TICKET_SYNC_REQUEST_TIMEOUT_MS", defaults.request_timeout),
            breaker: CircuitBreakerConfig {
                failure_threshold: lookup("TICKET_SYNC_BREAKER_THRESHOLD")
                    .and_then(|s| s.trim().parse().ok())
                    .unwrap_or(defaults.breaker.failure_threshold),
                monitoring_window: secs(
                    "TICKET_SYNC_BREAKER_WINDOW_SECS",
                    defaults.breaker.monitoring_window,
                ),
                reset_timeout: secs(
                    "TICKET_SYNC_BREAKER_RESET_SECS",
                    defaults.breaker.reset_timeout,
                ),
            },
            retry: RetryPolicy {
                max_retries: lookup("TICKET_SYNC_MAX_RETRIES")
                    .and_then(|s| s.trim().parse().ok())
                    .unwrap_or(defaults.retry.max_retries),
                base_delay: millis("TICKET_SYNC_RETRY_BASE_MS", defaults.retry.base_delay),
                max_delay: millis("TICKET_SYNC_RETRY_MAX_MS", defaults.retry.max_delay),
                max_jitter: millis("TICKET_SYNC_RETRY_JITTER_MS", defaults.retry.max_jitter),
            },
            cache: CacheConfig {
                max_age: secs("TICKET_SYNC_CACHE_MAX_AGE_SECS", defaults.cache.max_age),
                schema_version: lookup("TICKET_SYNC_CACHE_SCHEMA_VERSION")
                    .and_then(|s| s.trim().parse().ok())
                    .unwrap_or(defaults.cache.schema_version),
                key_prefix: lookup("TICKET_SYNC_CACHE_PREFIX").unwrap_or(defaults.cache.key_prefix),
            },
            polling: PollingConfig {
                base_interval: secs("TICKET_SYNC_POLL_INTERVAL_SECS", defaults.polling.base_interval),
                background_multiplier: lookup("TICKET_SYNC_POLL_BACKGROUND_MULTIPLIER")
                    .and_then(|s| s.trim().parse().ok())
                    .unwrap_or(defaults.polling.background_multiplier),
                min_spacing: secs("TICKET_SYNC_POLL_MIN_SPACING_SECS", defaults.polling.min_spacing),
            },
            reconcile: ReconcileSettings {
                local_role: lookup("TICKET_SYNC_LOCAL_ROLE")
                    .and_then(|s| parse_role(&s))
                    .unwrap_or(defaults.reconcile.local_role),
                dedup_window: millis("TICKET_SYNC_DEDUP_WINDOW_MS", defaults.reconcile.dedup_window),
                typing_ttl: millis("TICKET_SYNC_TYPING_TTL_MS", defaults.reconcile.typing_ttl),
            },
        }
    }
}

fn parse_role(value: &str) -> Option<SenderRole> {
    serde_json::from_value(serde_json::Value::String(value.trim().to_lowercase())).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = SyncConfig::from_lookup(|_| None);
        assert_eq!(config, SyncConfig::default());
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.cache.max_age, Duration::from_secs(86_400));
        assert_eq!(config.polling.interval_for(true), Duration::from_secs(30));
        assert_eq!(config.polling.interval_for(false), Duration::from_secs(90));
    }

    #[test]
    fn test_overrides_and_fallbacks() {
        let config = SyncConfig::from_lookup(lookup(&[
            ("TICKET_SYNC_BASE_URL", "https://support.example.com/api"),
            ("TICKET_SYNC_BREAKER_THRESHOLD", "3"),
            ("TICKET_SYNC_MAX_RETRIES", "not-a-number"),
            ("TICKET_SYNC_LOCAL_ROLE", "Admin"),
            ("TICKET_SYNC_TOKEN", ""),
        ]));

        assert_eq!(config.base_url, "https://support.example.com/api");
        assert_eq!(config.breaker.failure_threshold, 3);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.reconcile.local_role, SenderRole::Admin);
        assert_eq!(config.auth_token, None);
    }

    #[test]
    fn test_min_spacing_floors_interval() {
        let polling = PollingConfig {
            base_interval: Duration::from_secs(1),
            ..PollingConfig::default()
        };
        assert_eq!(polling.interval_for(true), Duration::from_secs(5));
    }
}

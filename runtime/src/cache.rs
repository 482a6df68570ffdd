//! Offline cache of last-known-good read results.
//!
//! Entries are JSON documents in a [`Storage`] backend, stamped with the time
//! they were stored and the schema version that wrote them. A read treats an
//! entry as absent (and deletes it) when it is older than `max_age`, was written
//! by another schema version, or claims to come from the future.
//!
//! Every storage failure is logged and swallowed: a broken cache degrades to
//! "nothing cached", never to an error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use ticket_sync_core::environment::{Clock, Storage};
use ticket_sync_core::error::CacheError;

/// Offline cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Entries older than this are discarded
    pub max_age: Duration,
    /// Entries written by another version are discarded
    pub schema_version: u32,
    /// Namespace for storage keys
    pub key_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(24 * 60 * 60),
            schema_version: 1,
            key_prefix: "ticket-sync:".to_string(),
        }
    }
}

impl CacheConfig {
    /// Set the maximum entry age.
    #[must_use]
    pub const fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Set the schema version.
    #[must_use]
    pub const fn with_schema_version(mut self, version: u32) -> Self {
        self.schema_version = version;
        self
    }

    /// Set the storage key namespace.
    #[must_use]
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }
}

/// Stored form of a cached read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    /// Logical key
    pub key: String,
    /// Cached response data
    pub payload: Value,
    /// When it was stored
    pub stored_at: DateTime<Utc>,
    /// Schema version of the writer
    pub schema_version: u32,
}

/// Deterministic key of a logical read.
///
/// Parameters are emitted in key order, so the same read always maps to the
/// same entry. Keys and values are percent-encoded.
///
/// ```
/// use std::collections::BTreeMap;
/// use ticket_sync_runtime::cache::cache_key;
///
/// let mut params = BTreeMap::new();
/// params.insert("status".to_string(), "open".to_string());
/// params.insert("page".to_string(), "2".to_string());
/// assert_eq!(cache_key("/tickets", &params), "/tickets?page=2&status=open");
/// assert_eq!(cache_key("/tickets", &BTreeMap::new()), "/tickets");
/// ```
#[must_use]
pub fn cache_key(path: &str, params: &BTreeMap<String, String>) -> String {
    if params.is_empty() {
        return path.to_string();
    }
    let query: Vec<String> = params
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect();
    format!("{path}?{}", query.join("&"))
}

/// Why an entry was discarded on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rejection {
    Stale,
    VersionMismatch,
    FromTheFuture,
}

/// Persisted, versioned, TTL-bound cache.
#[derive(Clone)]
pub struct OfflineCache {
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
}

impl fmt::Debug for OfflineCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OfflineCache")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl OfflineCache {
    /// Create a cache over `storage`.
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>, clock: Arc<dyn Clock>, config: CacheConfig) -> Self {
        Self {
            storage,
            clock,
            config,
        }
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}{key}", self.config.key_prefix)
    }

    /// Store `data` under `key`, replacing any previous entry.
    pub fn set(&self, key: &str, data: &Value) {
        let entry = CacheEntry {
            key: key.to_string(),
            payload: data.clone(),
            stored_at: self.clock.now(),
            schema_version: self.config.schema_version,
        };
        let result = serde_json::to_string(&entry)
            .map_err(|e| CacheError::Serialization(e.to_string()))
            .and_then(|text| self.storage.set(&self.storage_key(key), &text));
        swallow("set", key, result);
    }

    /// Cached data for `key`, if present and still valid.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        let storage_key = self.storage_key(key);
        let text = match self.storage.get(&storage_key) {
            Ok(Some(text)) => text,
            Ok(None) => {
                metrics::counter!("cache_misses_total").increment(1);
                return None;
            },
            Err(error) => {
                swallow::<()>("get", key, Err(error));
                return None;
            },
        };

        let entry = match serde_json::from_str::<CacheEntry>(&text) {
            Ok(entry) => entry,
            Err(error) => {
                swallow::<()>("get", key, Err(CacheError::Serialization(error.to_string())));
                self.remove(key);
                return None;
            },
        };

        if let Some(rejection) = self.validate(&entry) {
            tracing::debug!(key, ?rejection, "Discarding cache entry");
            metrics::counter!("cache_misses_total").increment(1);
            self.remove(key);
            return None;
        }

        metrics::counter!("cache_hits_total").increment(1);
        Some(entry.payload)
    }

    fn validate(&self, entry: &CacheEntry) -> Option<Rejection> {
        if entry.schema_version != self.config.schema_version {
            return Some(Rejection::VersionMismatch);
        }
        match (self.clock.now() - entry.stored_at).to_std() {
            Err(_) => Some(Rejection::FromTheFuture),
            Ok(age) if age > self.config.max_age => Some(Rejection::Stale),
            Ok(_) => None,
        }
    }

    /// Delete the entry under `key`.
    pub fn remove(&self, key: &str) {
        swallow("remove", key, self.storage.remove(&self.storage_key(key)));
    }

    /// Delete the entry for `prefix` and every entry below it.
    ///
    /// `prefix` matches whole path segments: `/tickets/TK-1` covers
    /// `/tickets/TK-1/messages` and `/tickets/TK-1?page=2` but not
    /// `/tickets/TK-10`. An empty prefix matches everything. Returns how many
    /// entries were removed.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let full_prefix = self.storage_key(prefix);
        let covers = |key: &str| {
            key.strip_prefix(full_prefix.as_str()).is_some_and(|rest| {
                prefix.is_empty()
                    || prefix.ends_with('/')
                    || rest.is_empty()
                    || rest.starts_with('/')
                    || rest.starts_with('?')
            })
        };
        let keys = match self.storage.keys() {
            Ok(keys) => keys,
            Err(error) => {
                swallow::<()>("invalidate", prefix, Err(error));
                return 0;
            },
        };

        let mut removed = 0;
        for key in keys.iter().filter(|k| covers(k)) {
            if swallow("invalidate", key, self.storage.remove(key)).is_some() {
                removed += 1;
            }
        }
        removed
    }

    /// Delete every entry this cache owns.
    pub fn clear(&self) {
        self.invalidate_prefix("");
    }
}

fn swallow<T>(operation: &str, key: &str, result: Result<T, CacheError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(error) => {
            tracing::debug!(operation, key, %error, "Cache operation failed, ignoring");
            metrics::counter!("cache_errors_total").increment(1);
            None
        },
    }
}

//! In-memory [`Storage`] with failure injection.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use ticket_sync_core::environment::Storage;
use ticket_sync_core::error::CacheError;

/// In-memory key/value storage.
///
/// Can be switched to "unavailable" (every call fails) and given an entry quota
/// (writes of new keys beyond it fail with [`CacheError::QuotaExceeded`]).
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    values: Mutex<BTreeMap<String, String>>,
    unavailable: AtomicBool,
    quota: Option<usize>,
}

impl InMemoryStorage {
    /// Empty, available storage without a quota.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage that accepts at most `entries` keys.
    #[must_use]
    pub fn with_quota(entries: usize) -> Self {
        Self {
            quota: Some(entries),
            ..Self::default()
        }
    }

    /// Make every subsequent call fail (or succeed again).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Raw stored value, bypassing availability.
    #[must_use]
    pub fn raw(&self, key: &str) -> Option<String> {
        self.lock().get(key).cloned()
    }

    /// Write a raw value, bypassing availability and quota.
    pub fn insert_raw(&self, key: &str, value: &str) {
        self.lock().insert(key.to_string(), value.to_string());
    }

    /// Number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(&self) -> Result<(), CacheError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("storage disabled".to_string()));
        }
        Ok(())
    }
}

impl Storage for InMemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.check()?;
        Ok(self.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        self.check()?;
        let mut values = self.lock();
        if let Some(quota) = self.quota {
            if !values.contains_key(key) && values.len() >= quota {
                return Err(CacheError::QuotaExceeded);
            }
        }
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.check()?;
        self.lock().remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, CacheError> {
        self.check()?;
        Ok(self.lock().keys().cloned().collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_and_availability() {
        let storage = InMemoryStorage::with_quota(1);
        storage.set("a", "1").unwrap();
        storage.set("a", "2").unwrap();
        assert_eq!(storage.set("b", "1"), Err(CacheError::QuotaExceeded));

        storage.set_unavailable(true);
        assert!(storage.get("a").is_err());
        assert_eq!(storage.raw("a").as_deref(), Some("2"));

        storage.set_unavailable(false);
        assert_eq!(storage.get("a").unwrap().as_deref(), Some("2"));
    }
}

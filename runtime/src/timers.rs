//! Keyed, cancellable timers.
//!
//! Scheduling under a key that already has a pending timer aborts the old one;
//! only the most recently scheduled callback for a key can ever run.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

struct Pending {
    generation: u64,
    handle: JoinHandle<()>,
}

struct Timers<K> {
    next_generation: u64,
    pending: HashMap<K, Pending>,
}

/// A set of timers keyed by `K`.
pub struct TimerSet<K> {
    inner: Arc<Mutex<Timers<K>>>,
}

impl<K> Clone for TimerSet<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K> Default for TimerSet<K> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Timers {
                next_generation: 0,
                pending: HashMap::new(),
            })),
        }
    }
}

impl<K> fmt::Debug for TimerSet<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerSet").finish_non_exhaustive()
    }
}

fn lock<K>(timers: &Mutex<Timers<K>>) -> MutexGuard<'_, Timers<K>> {
    timers.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<K> TimerSet<K>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + 'static,
{
    /// Empty timer set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `callback` after `delay`, replacing any timer pending under `key`.
    ///
    /// Outside a tokio runtime the timer is not scheduled and a warning is logged.
    pub fn schedule<F>(&self, key: K, delay: Duration, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(?key, "No tokio runtime, timer not scheduled");
            return;
        };

        let mut timers = lock(&self.inner);
        let generation = timers.next_generation;
        timers.next_generation += 1;

        let inner = Arc::clone(&self.inner);
        let task_key = key.clone();
        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let current = {
                let mut timers = lock(&inner);
                let is_current = timers
                    .pending
                    .get(&task_key)
                    .is_some_and(|p| p.generation == generation);
                if is_current {
                    timers.pending.remove(&task_key);
                }
                is_current
            };
            if current {
                callback();
            }
        });

        if let Some(previous) = timers.pending.insert(key, Pending { generation, handle }) {
            previous.handle.abort();
        }
    }

    /// Cancel the timer under `key`. Returns whether one was pending.
    pub fn cancel(&self, key: &K) -> bool {
        match lock(&self.inner).pending.remove(key) {
            Some(pending) => {
                pending.handle.abort();
                true
            },
            None => false,
        }
    }

    /// Whether a timer is pending under `key`.
    #[must_use]
    pub fn is_pending(&self, key: &K) -> bool {
        lock(&self.inner).pending.contains_key(key)
    }

    /// Number of pending timers.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.inner).pending.len()
    }

    /// Whether no timer is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancel everything.
    pub fn cancel_all(&self) {
        for (_, pending) in lock(&self.inner).pending.drain() {
            pending.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_delay() {
        let timers = TimerSet::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);

        timers.schedule("a", Duration::from_secs(3), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(timers.is_pending(&"a"));

        tokio::time::sleep(Duration::from_millis(2_999)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(timers.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_replaces() {
        let timers = TimerSet::new();
        let fired = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let counter = Arc::clone(&fired);
            timers.schedule("a", Duration::from_secs(3), move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel() {
        let timers = TimerSet::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);

        timers.schedule("a", Duration::from_secs(3), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(timers.cancel(&"a"));
        assert!(!timers.cancel(&"a"));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_outside_runtime_is_noop() {
        let timers: TimerSet<&str> = TimerSet::new();
        timers.schedule("a", Duration::from_secs(1), || {});
        assert!(timers.is_empty());
    }
}

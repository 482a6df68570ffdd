//! Ticket store: the reducer runtime owning the shared projection.
//!
//! Every writer (push frames, poll results, optimistic mutations, their
//! confirmations and rollbacks) calls [`TicketStore::send`]. Each call is one
//! read-modify-write of the current state under the lock, so no writer can
//! observe a half-applied change of another. The lock is never held across an
//! await; effects run after it is released.

use crate::listeners::{ListenerGuard, ListenerRegistry};
use crate::timers::TimerSet;
use std::sync::{Arc, PoisonError, RwLock, Weak};
use ticket_sync_core::effect::{Effect, TimerKey};
use ticket_sync_core::notification::Notification;
use ticket_sync_core::reducer::{ReconcileSettings, Reducer, TicketAction, TicketReducer, TicketState};
use ticket_sync_core::ticket::{Ticket, TicketId};

struct StoreInner {
    state: RwLock<TicketState>,
    reducer: TicketReducer,
    settings: ReconcileSettings,
    listeners: ListenerRegistry,
    timers: TimerSet<TimerKey>,
}

/// Handle to the shared ticket projection.
///
/// Cloning is cheap; every clone refers to the same state.
#[derive(Clone)]
pub struct TicketStore {
    inner: Arc<StoreInner>,
}

impl std::fmt::Debug for TicketStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TicketStore")
            .field("settings", &self.inner.settings)
            .field("listeners", &self.inner.listeners)
            .finish_non_exhaustive()
    }
}

impl TicketStore {
    /// Create an empty store.
    #[must_use]
    pub fn new(settings: ReconcileSettings) -> Self {
        Self::with_state(TicketState::default(), settings)
    }

    /// Create a store seeded with `state`.
    #[must_use]
    pub fn with_state(state: TicketState, settings: ReconcileSettings) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                state: RwLock::new(state),
                reducer: TicketReducer,
                settings,
                listeners: ListenerRegistry::new(),
                timers: TimerSet::new(),
            }),
        }
    }

    /// Reconciliation settings in use.
    #[must_use]
    pub fn settings(&self) -> &ReconcileSettings {
        &self.inner.settings
    }

    /// Apply `action` and execute the resulting effects.
    pub fn send(&self, action: TicketAction) {
        let effects = {
            let mut state = self
                .inner
                .state
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            self.inner
                .reducer
                .reduce(&mut state, action, &self.inner.settings)
        };
        metrics::counter!("store_actions_total").increment(1);
        self.execute(effects);
    }

    fn execute(&self, effects: Vec<Effect<TicketAction>>) {
        for effect in effects {
            match effect {
                Effect::None => {},
                Effect::Notify(notification) => self.inner.listeners.notify(&notification),
                Effect::Delay { key, duration, action } => {
                    let store: Weak<StoreInner> = Arc::downgrade(&self.inner);
                    self.inner.timers.schedule(key, duration, move || {
                        if let Some(inner) = store.upgrade() {
                            Self { inner }.send(*action);
                        }
                    });
                },
                Effect::Cancel(key) => {
                    self.inner.timers.cancel(&key);
                },
            }
        }
    }

    /// Deliver a notification that does not come from the reducer.
    pub fn notify(&self, notification: &Notification) {
        self.inner.listeners.notify(notification);
    }

    /// Register a listener; it stays registered while the guard lives.
    #[must_use = "dropping the guard unregisters the listener"]
    pub fn subscribe<F>(&self, listener: F) -> ListenerGuard
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.inner.listeners.subscribe(listener)
    }

    /// Read from the current state.
    pub fn state<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&TicketState) -> T,
    {
        let state = self
            .inner
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        f(&state)
    }

    /// Copy of one ticket.
    #[must_use]
    pub fn ticket(&self, id: &TicketId) -> Option<Ticket> {
        self.state(|s| s.ticket(id).cloned())
    }

    /// Copy of every ticket, most recently updated first.
    #[must_use]
    pub fn tickets(&self) -> Vec<Ticket> {
        self.state(|s| s.recent_first().into_iter().cloned().collect())
    }

    /// Whether someone is typing into `id`.
    #[must_use]
    pub fn is_typing(&self, id: &TicketId) -> bool {
        self.state(|s| s.is_typing(id))
    }

    /// Number of optimistic mutations awaiting the server.
    #[must_use]
    pub fn pending_mutations(&self) -> usize {
        self.state(|s| s.pending.len())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;
    use ticket_sync_core::event::InboundFrame;

    fn typing(ticket_id: &str, is_typing: bool) -> TicketAction {
        let frame = InboundFrame::parse(&format!(
            r#"{{"type":"ticket:typing","data":{{"ticketId":"{ticket_id}","isTyping":{is_typing}}}}}"#
        ))
        .unwrap();
        TicketAction::from(frame)
    }

    #[tokio::test(start_paused = true)]
    async fn test_typing_expires_after_ttl() {
        let store = TicketStore::new(ReconcileSettings::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _guard = store.subscribe(move |n| sink.lock().unwrap().push(n.clone()));
        let id = TicketId::from("TK-1");

        store.send(typing("TK-1", true));
        assert!(store.is_typing(&id));

        tokio::time::sleep(Duration::from_secs(2)).await;
        store.send(typing("TK-1", true));
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(store.is_typing(&id), "repeat event re-arms the timer");

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert!(!store.is_typing(&id));
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_immediately() {
        let store = TicketStore::new(ReconcileSettings::default());
        let id = TicketId::from("TK-1");

        store.send(typing("TK-1", true));
        store.send(typing("TK-1", false));
        assert!(!store.is_typing(&id));

        // A later start is not cut short by the cancelled timer.
        tokio::time::sleep(Duration::from_secs(2)).await;
        store.send(typing("TK-1", true));
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(store.is_typing(&id));
    }

    #[test]
    fn test_reads_are_copies() {
        let store = TicketStore::new(ReconcileSettings::default());
        assert!(store.tickets().is_empty());
        assert!(store.ticket(&TicketId::from("TK-1")).is_none());
        assert_eq!(store.pending_mutations(), 0);
    }
}

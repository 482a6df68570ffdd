//! Side effect descriptions.
//!
//! Effects are NOT executed by the reducer. They are values describing what
//! should happen next, returned from [`Reducer::reduce`](crate::reducer::Reducer::reduce)
//! and executed by the runtime's ticket store.

use crate::notification::Notification;
use crate::ticket::TicketId;
use std::time::Duration;

/// Identity of a cancellable timer.
///
/// Scheduling a timer under a key that already has one cancels and replaces it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerKey {
    /// Auto-expiry of a ticket's typing indicator
    Typing(TicketId),
}

/// Effect type - describes a side effect to be executed
///
/// # Type Parameters
///
/// - `Action`: The action type that delayed effects feed back into the reducer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect<Action> {
    /// No-op effect
    None,

    /// Deliver a notification to registered listeners
    Notify(Notification),

    /// Dispatch `action` after `duration`, replacing any timer under `key`
    Delay {
        /// Timer identity
        key: TimerKey,
        /// How long to wait
        duration: Duration,
        /// Action to dispatch after delay
        action: Box<Action>,
    },

    /// Cancel the timer under `key`, if any
    Cancel(TimerKey),
}

impl<Action> Effect<Action> {
    /// The notification carried by this effect, if any.
    #[must_use]
    pub const fn notification(&self) -> Option<&Notification> {
        match self {
            Self::Notify(notification) => Some(notification),
            _ => None,
        }
    }
}

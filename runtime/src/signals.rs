//! Environment signals: network availability and page visibility.
//!
//! Each signal is a `tokio::sync::watch` channel, so the poll loop can sleep
//! until one of them changes instead of re-checking on a timer.

use std::sync::Arc;
use tokio::sync::watch;

/// Shared handles to the environment signals.
///
/// Cloning is cheap; every clone observes and drives the same channels.
#[derive(Debug, Clone)]
pub struct EnvironmentSignals {
    online: Arc<watch::Sender<bool>>,
    visible: Arc<watch::Sender<bool>>,
}

impl Default for EnvironmentSignals {
    fn default() -> Self {
        Self::new(true, true)
    }
}

impl EnvironmentSignals {
    /// Create signals with the given initial values.
    #[must_use]
    pub fn new(online: bool, visible: bool) -> Self {
        Self {
            online: Arc::new(watch::Sender::new(online)),
            visible: Arc::new(watch::Sender::new(visible)),
        }
    }

    /// Whether the device currently has connectivity.
    #[must_use]
    pub fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    /// Whether the page is in the foreground.
    #[must_use]
    pub fn is_visible(&self) -> bool {
        *self.visible.borrow()
    }

    /// Report a connectivity change.
    pub fn set_online(&self, online: bool) {
        if self.online.send_replace(online) != online {
            tracing::info!(online, "Network availability changed");
        }
    }

    /// Report a visibility change.
    pub fn set_visible(&self, visible: bool) {
        if self.visible.send_replace(visible) != visible {
            tracing::debug!(visible, "Page visibility changed");
        }
    }

    /// Watch connectivity.
    #[must_use]
    pub fn subscribe_online(&self) -> watch::Receiver<bool> {
        self.online.subscribe()
    }

    /// Watch visibility.
    #[must_use]
    pub fn subscribe_visible(&self) -> watch::Receiver<bool> {
        self.visible.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_changes_are_observed_by_clones() {
        let signals = EnvironmentSignals::default();
        let mut visible = signals.subscribe_visible();
        let clone = signals.clone();

        clone.set_visible(false);
        assert!(visible.has_changed().unwrap_or(false));
        assert!(!*visible.borrow_and_update());
        assert!(!signals.is_visible());

        signals.set_online(false);
        assert!(!clone.is_online());
    }
}

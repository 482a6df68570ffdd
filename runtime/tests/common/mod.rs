//! Shared wiring for the integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use ticket_sync_core::notification::Notification;
use ticket_sync_core::reducer::TicketAction;
use ticket_sync_core::ticket::Ticket;
use ticket_sync_runtime::listeners::ListenerGuard;
use ticket_sync_runtime::signals::EnvironmentSignals;
use ticket_sync_runtime::{SyncConfig, TicketSyncClient};
use ticket_sync_testing::{InMemoryStorage, ManualClock, MockTransport, RecordingPushSink};

pub const USER_ID: &str = "user-1";

pub struct Harness {
    pub client: TicketSyncClient,
    pub transport: Arc<MockTransport>,
    pub storage: Arc<InMemoryStorage>,
    pub sink: Arc<RecordingPushSink>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(SyncConfig {
            user_id: USER_ID.to_string(),
            ..SyncConfig::default()
        })
    }

    pub fn with_config(config: SyncConfig) -> Self {
        ticket_sync_testing::init_test_tracing();
        let transport = Arc::new(MockTransport::new());
        let storage = Arc::new(InMemoryStorage::new());
        let sink = Arc::new(RecordingPushSink::new());
        let clock = Arc::new(ManualClock::default());
        let client = TicketSyncClient::new(
            config,
            transport.clone(),
            storage.clone(),
            sink.clone(),
            clock.clone(),
            EnvironmentSignals::default(),
        );
        Self {
            client,
            transport,
            storage,
            sink,
            clock,
        }
    }

    /// Put `ticket` in the store as if it had been read from the API.
    pub fn seed(&self, ticket: Ticket) {
        self.client.store().send(TicketAction::TicketFetched(ticket));
    }

    /// Record every notification from now on.
    pub fn record(&self) -> (ListenerGuard, Arc<Mutex<Vec<Notification>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let guard = self
            .client
            .store()
            .subscribe(move |n| sink.lock().unwrap_or_else(std::sync::PoisonError::into_inner).push(n.clone()));
        (guard, seen)
    }
}

pub fn status_changes(seen: &Mutex<Vec<Notification>>) -> usize {
    seen.lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .iter()
        .filter(|n| matches!(n, Notification::StatusChanged { .. }))
        .count()
}

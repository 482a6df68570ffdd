//! One-stop wiring of the sync stack.

use crate::cache::OfflineCache;
use crate::circuit_breaker::CircuitBreakerRegistry;
use crate::config::SyncConfig;
use crate::coordinator::MutationCoordinator;
use crate::executor::RequestExecutor;
use crate::http::HttpTransport;
use crate::signals::EnvironmentSignals;
use crate::store::TicketStore;
use crate::sync::{Synchronizer, TICKETS_PATH, decode_tickets};
use crate::health::HealthReport;
use std::fmt;
use std::sync::Arc;
use ticket_sync_core::api::ApiRequest;
use ticket_sync_core::environment::{Clock, PushSink, Storage, SystemClock, Transport};
use ticket_sync_core::error::RequestError;
use ticket_sync_core::reducer::TicketAction;
use ticket_sync_core::ticket::{Ticket, TicketId};

/// Store, executor, synchronizer and coordinator sharing one configuration.
#[derive(Clone)]
pub struct TicketSyncClient {
    config: SyncConfig,
    store: TicketStore,
    executor: RequestExecutor,
    synchronizer: Synchronizer,
    coordinator: MutationCoordinator,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for TicketSyncClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TicketSyncClient")
            .field("config", &self.config)
            .field("store", &self.store)
            .field("synchronizer", &self.synchronizer)
            .finish_non_exhaustive()
    }
}

impl TicketSyncClient {
    /// Wire every component from `config` and the injected collaborators.
    #[must_use]
    pub fn new(
        config: SyncConfig,
        transport: Arc<dyn Transport>,
        storage: Arc<dyn Storage>,
        sink: Arc<dyn PushSink>,
        clock: Arc<dyn Clock>,
        signals: EnvironmentSignals,
    ) -> Self {
        let store = TicketStore::new(config.reconcile.clone());
        let breakers = CircuitBreakerRegistry::new(config.breaker.clone(), Arc::clone(&clock));
        let cache = OfflineCache::new(storage, Arc::clone(&clock), config.cache.clone());
        let executor = RequestExecutor::new(transport, breakers, cache, signals)
            .with_retry_policy(config.retry.clone())
            .with_timeout(config.request_timeout);
        let synchronizer = Synchronizer::new(
            store.clone(),
            executor.clone(),
            sink,
            Arc::clone(&clock),
            config.polling.clone(),
            config.user_id.clone(),
        );
        let coordinator =
            MutationCoordinator::new(store.clone(), executor.clone(), Arc::clone(&clock));

        tracing::info!(
            base_url = %config.base_url,
            user_id = %config.user_id,
            "Ticket sync client ready"
        );
        Self {
            config,
            store,
            executor,
            synchronizer,
            coordinator,
            clock,
        }
    }

    /// Wire the stack over HTTP with the system clock.
    #[must_use]
    pub fn over_http(
        config: SyncConfig,
        storage: Arc<dyn Storage>,
        sink: Arc<dyn PushSink>,
        signals: EnvironmentSignals,
    ) -> Self {
        let transport =
            HttpTransport::new(config.base_url.clone()).with_token(config.auth_token.clone());
        Self::new(
            config,
            Arc::new(transport),
            storage,
            sink,
            Arc::new(SystemClock),
            signals,
        )
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The shared ticket projection.
    #[must_use]
    pub const fn store(&self) -> &TicketStore {
        &self.store
    }

    /// The request executor.
    #[must_use]
    pub const fn executor(&self) -> &RequestExecutor {
        &self.executor
    }

    /// The realtime synchronizer.
    #[must_use]
    pub const fn synchronizer(&self) -> &Synchronizer {
        &self.synchronizer
    }

    /// The optimistic mutation coordinator.
    #[must_use]
    pub const fn coordinator(&self) -> &MutationCoordinator {
        &self.coordinator
    }

    /// Environment signals.
    #[must_use]
    pub const fn signals(&self) -> &EnvironmentSignals {
        self.executor.signals()
    }

    /// Load the ticket list into the store.
    ///
    /// A network result replaces the list; a cached one is merged ticket by
    /// ticket so it cannot overwrite anything newer.
    ///
    /// # Errors
    ///
    /// Fails only when neither the network nor the cache can answer.
    pub async fn load_tickets(&self) -> Result<Vec<Ticket>, RequestError> {
        let response = self
            .executor
            .execute(ApiRequest::get(TICKETS_PATH), true)
            .await?;
        let cached = response.is_cached();
        let tickets = decode_tickets(response.data)?;

        if cached {
            tracing::info!(count = tickets.len(), "Loaded tickets from offline cache");
            for ticket in tickets {
                self.store.send(TicketAction::TicketFetched(ticket));
            }
        } else {
            self.store.send(TicketAction::TicketsPolled(tickets));
        }
        Ok(self.store.tickets())
    }

    /// Load one ticket into the store.
    ///
    /// # Errors
    ///
    /// Fails only when neither the network nor the cache can answer.
    pub async fn load_ticket(&self, id: &TicketId) -> Result<Ticket, RequestError> {
        let response = self
            .executor
            .execute(ApiRequest::get(format!("{TICKETS_PATH}/{id}")), true)
            .await?;
        let ticket: Ticket = serde_json::from_value(response.data)
            .map_err(|e| RequestError::Decode(e.to_string()))?;
        self.store.send(TicketAction::TicketFetched(ticket.clone()));
        Ok(self.store.ticket(id).unwrap_or(ticket))
    }

    /// Health of the breakers, the push channel and connectivity.
    pub async fn health(&self) -> HealthReport {
        let endpoints = self
            .executor
            .breakers()
            .snapshots()
            .await
            .into_iter()
            .map(Into::into)
            .collect();
        HealthReport {
            checked_at: self.clock.now(),
            online: self.signals().is_online(),
            connection: self.synchronizer.connection_state(),
            endpoints,
            pending_mutations: self.store.pending_mutations(),
        }
    }
}

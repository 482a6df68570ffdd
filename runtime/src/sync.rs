//! Realtime synchronizer: push subscription with adaptive polling fallback.
//!
//! Connection lifecycle is `Disconnected → Connecting → Connected → Disconnected`.
//! Reconnecting is the transport's job; the synchronizer reacts to the signals
//! it is given. On `Connected` it sends the subscribe request. While not
//! connected, the poll loop started by [`Synchronizer::start_polling`] fetches
//! the ticket list on an interval that depends on page visibility.
//!
//! Inbound frames are validated into [`InboundFrame`] at the boundary. A frame
//! that fails validation is logged and dropped; it never affects other frames.

use crate::config::PollingConfig;
use crate::executor::RequestExecutor;
use crate::store::TicketStore;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use ticket_sync_core::api::ApiRequest;
use ticket_sync_core::environment::{Clock, PushSink};
use ticket_sync_core::error::{PushError, ReconciliationError, RequestError};
use ticket_sync_core::event::{InboundFrame, OutboundFrame, TypingIndicator};
use ticket_sync_core::notification::{ConnectionState, Notification};
use ticket_sync_core::reducer::TicketAction;
use ticket_sync_core::ticket::{Ticket, TicketId};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Path of the ticket list read.
pub const TICKETS_PATH: &str = "/tickets";

/// What the push transport reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushSignal {
    /// The channel is being established
    Connecting,
    /// The channel is up
    Connected,
    /// The channel went down
    Disconnected,
    /// A raw inbound frame
    Frame(String),
}

struct SyncInner {
    store: TicketStore,
    executor: RequestExecutor,
    sink: Arc<dyn PushSink>,
    clock: Arc<dyn Clock>,
    polling: PollingConfig,
    user_id: String,
    connection: watch::Sender<ConnectionState>,
    last_event_time: Mutex<Option<DateTime<Utc>>>,
    shutdown: watch::Sender<bool>,
}

/// Keeps the ticket store in sync with the server.
#[derive(Clone)]
pub struct Synchronizer {
    inner: Arc<SyncInner>,
}

impl fmt::Debug for Synchronizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Synchronizer")
            .field("user_id", &self.inner.user_id)
            .field("connection", &self.connection_state())
            .finish_non_exhaustive()
    }
}

impl Synchronizer {
    /// Create a disconnected synchronizer.
    #[must_use]
    pub fn new(
        store: TicketStore,
        executor: RequestExecutor,
        sink: Arc<dyn PushSink>,
        clock: Arc<dyn Clock>,
        polling: PollingConfig,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(SyncInner {
                store,
                executor,
                sink,
                clock,
                polling,
                user_id: user_id.into(),
                connection: watch::Sender::new(ConnectionState::Disconnected),
                last_event_time: Mutex::new(None),
                shutdown: watch::Sender::new(false),
            }),
        }
    }

    /// Current connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        *self.inner.connection.borrow()
    }

    /// Whether the push channel is live.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    /// Watch the connection state.
    #[must_use]
    pub fn subscribe_connection(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection.subscribe()
    }

    /// When the last valid push frame was applied.
    #[must_use]
    pub fn last_event_time(&self) -> Option<DateTime<Utc>> {
        *self
            .inner
            .last_event_time
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ConnectionState) -> bool {
        let changed = self.inner.connection.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
        if changed {
            tracing::info!(%state, "Push connection state changed");
            self.inner
                .store
                .notify(&Notification::ConnectionChanged { state });
        }
        changed
    }

    /// The transport started connecting.
    pub fn on_connecting(&self) {
        self.set_state(ConnectionState::Connecting);
    }

    /// The channel is up: subscribe to every ticket event class.
    pub fn on_connected(&self) {
        if !self.set_state(ConnectionState::Connected) {
            return;
        }
        let subscribe = OutboundFrame::subscribe_all(self.inner.user_id.clone());
        if let Err(error) = self.inner.sink.send(subscribe) {
            tracing::warn!(%error, "Failed to send subscribe request");
        }
    }

    /// The channel went down; fallback polling takes over.
    pub fn on_disconnected(&self) {
        self.set_state(ConnectionState::Disconnected);
    }

    /// Validate and reconcile one raw frame.
    ///
    /// # Errors
    ///
    /// Returns the [`ReconciliationError`] that caused the frame to be dropped.
    pub fn handle_frame(&self, text: &str) -> Result<(), ReconciliationError> {
        let frame = match InboundFrame::parse(text) {
            Ok(frame) => frame,
            Err(error) => {
                tracing::warn!(%error, "Dropping push frame");
                metrics::counter!("sync_events_dropped_total").increment(1);
                return Err(error);
            },
        };
        self.apply(frame);
        Ok(())
    }

    /// Reconcile an already-validated frame.
    pub fn apply(&self, frame: InboundFrame) {
        if let InboundFrame::Typing(indicator) = &frame {
            if indicator.user_id.as_deref() == Some(self.inner.user_id.as_str()) {
                tracing::trace!("Ignoring echo of own typing indicator");
                return;
            }
        }

        let frame_type = frame.frame_type();
        tracing::debug!(frame_type, ticket_id = %frame.ticket_id(), "Applying push frame");
        *self
            .inner
            .last_event_time
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(self.inner.clock.now());
        self.inner.store.send(TicketAction::from(frame));
        metrics::counter!("sync_events_applied_total", "type" => frame_type).increment(1);
    }

    /// Drive the synchronizer from a stream of transport signals.
    ///
    /// Returns when the stream ends, leaving the state `Disconnected`.
    pub async fn run<S>(&self, signals: S)
    where
        S: Stream<Item = PushSignal>,
    {
        let mut signals = std::pin::pin!(signals);
        while let Some(signal) = signals.next().await {
            match signal {
                PushSignal::Connecting => self.on_connecting(),
                PushSignal::Connected => self.on_connected(),
                PushSignal::Disconnected => self.on_disconnected(),
                PushSignal::Frame(text) => {
                    // Already logged and counted.
                    let _ = self.handle_frame(&text);
                },
            }
        }
        self.on_disconnected();
    }

    /// Tell the other party whether the local user is typing.
    ///
    /// A no-op while disconnected.
    ///
    /// # Errors
    ///
    /// Returns [`PushError::Closed`] if the push channel is gone.
    pub fn send_typing(&self, ticket_id: TicketId, is_typing: bool) -> Result<(), PushError> {
        if !self.is_connected() {
            return Ok(());
        }
        self.inner.sink.send(OutboundFrame::Typing(TypingIndicator {
            ticket_id,
            is_typing,
            user_id: Some(self.inner.user_id.clone()),
        }))
    }

    /// Fetch the ticket list once and replace the projection with it.
    ///
    /// A list served from the offline cache is not applied: it can only be
    /// older than what the store already holds. Returns the number of tickets applied.
    ///
    /// # Errors
    ///
    /// Propagates the executor's [`RequestError`], or [`RequestError::Decode`]
    /// if the payload is not a ticket list.
    pub async fn poll_once(&self) -> Result<usize, RequestError> {
        metrics::counter!("sync_polls_total").increment(1);
        let response = self
            .inner
            .executor
            .execute(ApiRequest::get(TICKETS_PATH), true)
            .await?;
        if response.is_cached() {
            tracing::debug!("Poll served from cache, keeping current projection");
            return Ok(0);
        }

        let tickets = decode_tickets(response.data)?;
        let count = tickets.len();
        self.inner.store.send(TicketAction::TicketsPolled(tickets));
        Ok(count)
    }

    /// Spawn the fallback poll loop.
    ///
    /// The loop polls only while disconnected: once right away (respecting the
    /// minimum spacing since the previous poll), then every
    /// [`PollingConfig::interval_for`] the current visibility. It stops after
    /// [`Synchronizer::shutdown`].
    #[must_use = "dropping the handle detaches the poll loop"]
    pub fn start_polling(&self) -> JoinHandle<()> {
        tokio::spawn(self.clone().poll_loop())
    }

    /// Stop the poll loop.
    pub fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);
    }

    async fn poll_loop(self) {
        let mut connection = self.inner.connection.subscribe();
        let mut visibility = self.inner.executor.signals().subscribe_visible();
        let mut shutdown = self.inner.shutdown.subscribe();
        let polling = self.inner.polling.clone();
        let mut last_poll: Option<Instant> = None;
        let mut just_disconnected = true;

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            if *connection.borrow_and_update() == ConnectionState::Connected {
                just_disconnected = true;
                tokio::select! {
                    changed = connection.changed() => if changed.is_err() { break },
                    _ = shutdown.changed() => {},
                }
                continue;
            }

            let visible = *visibility.borrow_and_update();
            let spacing = if just_disconnected {
                polling.min_spacing
            } else {
                polling.interval_for(visible)
            };
            let due = last_poll.map_or_else(Instant::now, |last| last + spacing);

            tokio::select! {
                () = tokio::time::sleep_until(due) => {
                    last_poll = Some(Instant::now());
                    just_disconnected = false;
                    match self.poll_once().await {
                        Ok(count) => tracing::debug!(count, "Fallback poll applied"),
                        Err(error) => tracing::warn!(%error, "Fallback poll failed"),
                    }
                },
                changed = connection.changed() => if changed.is_err() { break },
                changed = visibility.changed() => if changed.is_err() { break },
                _ = shutdown.changed() => {},
            }
        }
        tracing::debug!("Poll loop stopped");
    }
}

pub(crate) fn decode_tickets(data: Value) -> Result<Vec<Ticket>, RequestError> {
    let list = match data {
        Value::Object(mut object) => object.remove("tickets").unwrap_or(Value::Null),
        other => other,
    };
    serde_json::from_value(list).map_err(|e| RequestError::Decode(e.to_string()))
}

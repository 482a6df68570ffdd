//! Optimistic mutation coordinator.
//!
//! A mutation is applied to the store before the request is sent, so callers
//! can render it right away. The local change is recorded under a
//! [`MutationId`]; once the server answers, the store confirms or rolls back by
//! that id. The temporary ids given to provisional entries are only labels for
//! rendering.
//!
//! ```text
//! mutate ──► store.send(MessageSent / StatusRequested / TicketDrafted)
//!        ──► executor.execute(write)
//!              ├─ Ok  ──► store.send(MessageConfirmed / TicketConfirmed)
//!              └─ Err ──► store.send(MutationFailed) ──► Err(MutationError)
//! ```
//!
//! Dropping a mutation future before the write settles also rolls it back.

use crate::error::MutationError;
use crate::executor::RequestExecutor;
use crate::store::TicketStore;
use crate::sync::TICKETS_PATH;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use ticket_sync_core::api::{ApiRequest, Method};
use ticket_sync_core::environment::Clock;
use ticket_sync_core::reducer::{MutationId, TicketAction};
use ticket_sync_core::ticket::{
    Message, MessageId, Priority, SenderRole, Ticket, TicketId, TicketStatus,
};

/// A write the user asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Post a message to a ticket thread
    SendMessage {
        /// Target ticket
        ticket_id: TicketId,
        /// Message body
        text: String,
    },
    /// Move a ticket to another status
    ChangeStatus {
        /// Target ticket
        ticket_id: TicketId,
        /// Requested status
        status: TicketStatus,
    },
    /// Open a new ticket
    CreateTicket {
        /// Subject line
        subject: String,
        /// Priority
        priority: Priority,
        /// Optional opening message
        first_message: Option<String>,
    },
}

impl Mutation {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::SendMessage { .. } => "send_message",
            Self::ChangeStatus { .. } => "change_status",
            Self::CreateTicket { .. } => "create_ticket",
        }
    }
}

/// The authoritative result of a confirmed mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationResult {
    /// The stored message
    Message(Message),
    /// The stored ticket
    Ticket(Ticket),
}

/// Applies mutations optimistically and settles them against the server.
#[derive(Clone)]
pub struct MutationCoordinator {
    store: TicketStore,
    executor: RequestExecutor,
    clock: Arc<dyn Clock>,
    sequence: Arc<AtomicU64>,
}

impl fmt::Debug for MutationCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationCoordinator")
            .field("issued", &self.sequence.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl MutationCoordinator {
    /// Create a coordinator writing to `store` through `executor`.
    #[must_use]
    pub fn new(store: TicketStore, executor: RequestExecutor, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            executor,
            clock,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn local_role(&self) -> SenderRole {
        self.store.settings().local_role
    }

    /// Apply `mutation` optimistically and wait for the server.
    ///
    /// # Errors
    ///
    /// See [`MutationError`]. The local change has been rolled back when this fails.
    pub async fn mutate(&self, mutation: Mutation) -> Result<MutationResult, MutationError> {
        match mutation {
            Mutation::SendMessage { ticket_id, text } => self
                .send_message(ticket_id, text)
                .await
                .map(MutationResult::Message),
            Mutation::ChangeStatus { ticket_id, status } => self
                .change_status(ticket_id, status)
                .await
                .map(MutationResult::Ticket),
            Mutation::CreateTicket {
                subject,
                priority,
                first_message,
            } => self
                .create_ticket(subject, priority, first_message)
                .await
                .map(MutationResult::Ticket),
        }
    }

    /// Post a message, showing a provisional copy until the server assigns its id.
    ///
    /// # Errors
    ///
    /// [`MutationError::UnknownTicket`] if the ticket is not in the store, otherwise
    /// whatever made the request fail.
    pub async fn send_message(
        &self,
        ticket_id: TicketId,
        text: impl Into<String>,
    ) -> Result<Message, MutationError> {
        if self.store.ticket(&ticket_id).is_none() {
            return Err(MutationError::UnknownTicket(ticket_id));
        }

        let mutation = MutationId(self.next_sequence());
        let text = text.into();
        let provisional = Message {
            id: MessageId::temporary(mutation.0),
            text: text.clone(),
            sender_role: self.local_role(),
            timestamp: self.clock.now(),
        };
        tracing::debug!(%mutation, %ticket_id, temporary_id = %provisional.id, "Optimistic message");
        self.store.send(TicketAction::MessageSent {
            mutation,
            ticket_id: ticket_id.clone(),
            message: provisional,
        });

        let request = ApiRequest::with_body(
            Method::Post,
            format!("{TICKETS_PATH}/{ticket_id}/messages"),
            json!({ "text": text }),
        );
        let message: Message = self
            .settle("send_message", mutation, &ticket_id, request, "message")
            .await?;
        self.store.send(TicketAction::MessageConfirmed {
            mutation,
            message: message.clone(),
        });
        Ok(message)
    }

    /// Change a ticket's status, flipping it locally first.
    ///
    /// # Errors
    ///
    /// [`MutationError::UnknownTicket`] if the ticket is not in the store, otherwise
    /// whatever made the request fail.
    pub async fn change_status(
        &self,
        ticket_id: TicketId,
        status: TicketStatus,
    ) -> Result<Ticket, MutationError> {
        if self.store.ticket(&ticket_id).is_none() {
            return Err(MutationError::UnknownTicket(ticket_id));
        }

        let mutation = MutationId(self.next_sequence());
        tracing::debug!(%mutation, %ticket_id, %status, "Optimistic status change");
        self.store.send(TicketAction::StatusRequested {
            mutation,
            ticket_id: ticket_id.clone(),
            status,
            at: self.clock.now(),
        });

        let request = ApiRequest::with_body(
            Method::Patch,
            format!("{TICKETS_PATH}/{ticket_id}/status"),
            json!({ "status": status }),
        );
        let ticket: Ticket = self
            .settle("change_status", mutation, &ticket_id, request, "ticket")
            .await?;
        self.store.send(TicketAction::TicketConfirmed {
            mutation,
            ticket: ticket.clone(),
        });
        Ok(ticket)
    }

    /// Open a ticket, showing a provisional one under a temporary id meanwhile.
    ///
    /// # Errors
    ///
    /// Whatever made the request fail.
    pub async fn create_ticket(
        &self,
        subject: impl Into<String>,
        priority: Priority,
        first_message: Option<String>,
    ) -> Result<Ticket, MutationError> {
        let mutation = MutationId(self.next_sequence());
        let subject = subject.into();
        let now = self.clock.now();
        let temporary_id = TicketId::temporary(mutation.0);
        let messages = first_message
            .iter()
            .map(|text| Message {
                id: MessageId::temporary(mutation.0),
                text: text.clone(),
                sender_role: self.local_role(),
                timestamp: now,
            })
            .collect();
        tracing::debug!(%mutation, %temporary_id, "Optimistic ticket");
        self.store.send(TicketAction::TicketDrafted {
            mutation,
            ticket: Ticket {
                id: temporary_id.clone(),
                subject: subject.clone(),
                status: TicketStatus::Open,
                priority,
                messages,
                updated_at: now,
                unread_count: 0,
            },
        });

        let mut body = json!({ "subject": subject, "priority": priority });
        if let (Some(text), Value::Object(fields)) = (first_message, &mut body) {
            fields.insert("message".to_string(), Value::String(text));
        }
        let request = ApiRequest::with_body(Method::Post, TICKETS_PATH, body);
        let ticket: Ticket = self
            .settle("create_ticket", mutation, &temporary_id, request, "ticket")
            .await?;
        self.store.send(TicketAction::TicketConfirmed {
            mutation,
            ticket: ticket.clone(),
        });
        Ok(ticket)
    }

    /// Reset a ticket's unread counter. Local only.
    pub fn mark_read(&self, ticket_id: TicketId) {
        self.store.send(TicketAction::MarkedRead { ticket_id });
    }

    /// Send the write and decode its payload, rolling back on any failure.
    async fn settle<T>(
        &self,
        kind: &'static str,
        mutation: MutationId,
        ticket_id: &TicketId,
        request: ApiRequest,
        field: &str,
    ) -> Result<T, MutationError>
    where
        T: DeserializeOwned,
    {
        let mut guard = Unsettled {
            store: self.store.clone(),
            kind,
            mutation,
            armed: true,
        };
        let outcome = match self.executor.execute(request, false).await {
            Ok(response) => decode(response.data, field),
            Err(error) => Err(MutationError::Rejected(error)),
        };

        guard.armed = false;
        match outcome {
            Ok(value) => {
                self.invalidate(ticket_id);
                metrics::counter!("mutations_total", "kind" => kind, "outcome" => "confirmed")
                    .increment(1);
                Ok(value)
            },
            Err(error) => {
                tracing::warn!(%mutation, %ticket_id, %error, "Mutation failed, rolling back");
                self.store.send(TicketAction::MutationFailed { mutation });
                metrics::counter!("mutations_total", "kind" => kind, "outcome" => "rolled_back")
                    .increment(1);
                Err(error)
            },
        }
    }

    /// Drop cached reads the write made stale.
    fn invalidate(&self, ticket_id: &TicketId) {
        let cache = self.executor.cache();
        cache.remove(TICKETS_PATH);
        if !ticket_id.is_temporary() {
            cache.invalidate_prefix(&format!("{TICKETS_PATH}/{ticket_id}"));
        }
    }
}

/// Rolls back a mutation whose request was abandoned before it settled, for
/// example when the caller's future is dropped on a timeout.
struct Unsettled {
    store: TicketStore,
    kind: &'static str,
    mutation: MutationId,
    armed: bool,
}

impl Drop for Unsettled {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        tracing::warn!(mutation = %self.mutation, kind = self.kind, "Mutation abandoned, rolling back");
        self.store.send(TicketAction::MutationFailed {
            mutation: self.mutation,
        });
        metrics::counter!("mutations_total", "kind" => self.kind, "outcome" => "abandoned")
            .increment(1);
    }
}

/// Accept the payload either bare or wrapped as `{ "<field>": ... }`.
fn decode<T: DeserializeOwned>(data: Value, field: &str) -> Result<T, MutationError> {
    let payload = match data {
        Value::Object(mut object) if object.contains_key(field) => {
            object.remove(field).unwrap_or(Value::Null)
        },
        other => other,
    };
    serde_json::from_value(payload).map_err(|e| MutationError::Decode(e.to_string()))
}

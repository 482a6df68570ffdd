//! Push channel frames.
//!
//! Inbound frames are validated at the boundary into [`InboundFrame`], a tagged
//! union discriminated by `type`. Anything that does not fit is rejected with a
//! [`ReconciliationError`] and never reaches the reducer.
//!
//! # Inbound
//!
//! ```json
//! { "type": "ticket:message_added", "data": { "ticketId": "TK-1", "message": { ... } } }
//! { "type": "ticket:updated",       "data": { "id": "TK-1", "status": "done", "updatedAt": "..." } }
//! { "type": "ticket:created",       "data": { "id": "TK-2", "subject": "...", ... } }
//! { "type": "ticket:status_changed","data": { "ticketId": "TK-1", "status": "done" } }
//! { "type": "ticket:typing",        "data": { "ticketId": "TK-1", "isTyping": true, "userId": "u-7" } }
//! ```
//!
//! # Outbound
//!
//! ```json
//! { "type": "subscribe:tickets", "data": { "userId": "u-1", "events": ["message-added", ...] } }
//! { "type": "ticket:typing",     "data": { "ticketId": "TK-1", "isTyping": true, "userId": "u-1" } }
//! ```

use crate::error::ReconciliationError;
use crate::ticket::{Message, Priority, Ticket, TicketId, TicketStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const MESSAGE_ADDED: &str = "ticket:message_added";
const TICKET_UPDATED: &str = "ticket:updated";
const TICKET_CREATED: &str = "ticket:created";
const STATUS_CHANGED: &str = "ticket:status_changed";
const TYPING: &str = "ticket:typing";

const INBOUND_TYPES: [&str; 5] = [
    MESSAGE_ADDED,
    TICKET_UPDATED,
    TICKET_CREATED,
    STATUS_CHANGED,
    TYPING,
];

/// Payload of `ticket:message_added`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageAdded {
    /// Ticket the message belongs to
    pub ticket_id: TicketId,
    /// The authoritative message
    pub message: Message,
}

/// Partial ticket update (`ticket:updated`, and `ticket:status_changed` once normalized).
///
/// Absent fields are left untouched by the merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketPatch {
    /// Ticket being updated
    #[serde(alias = "id")]
    pub ticket_id: TicketId,
    /// New subject
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// New status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TicketStatus>,
    /// New priority
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    /// Server stamp of the update
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl TicketPatch {
    /// Patch that only changes the status.
    #[must_use]
    pub const fn status(ticket_id: TicketId, status: TicketStatus, updated_at: Option<DateTime<Utc>>) -> Self {
        Self {
            ticket_id,
            subject: None,
            status: Some(status),
            priority: None,
            updated_at,
        }
    }
}

/// Payload of `ticket:status_changed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    /// Ticket whose status changed
    #[serde(alias = "id")]
    pub ticket_id: TicketId,
    /// Status after the change
    #[serde(alias = "newStatus")]
    pub status: TicketStatus,
    /// Status before the change, informational only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_status: Option<TicketStatus>,
    /// Server stamp of the change
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Typing indicator, inbound and outbound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingIndicator {
    /// Ticket being typed into
    pub ticket_id: TicketId,
    /// `false` means "stopped typing"
    pub is_typing: bool,
    /// Who is typing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// A validated inbound push frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum InboundFrame {
    /// A message was appended to a ticket
    #[serde(rename = "ticket:message_added")]
    MessageAdded(MessageAdded),
    /// Ticket fields changed
    #[serde(rename = "ticket:updated")]
    TicketUpdated(TicketPatch),
    /// A ticket was created
    #[serde(rename = "ticket:created")]
    TicketCreated(Ticket),
    /// A ticket's status changed
    #[serde(rename = "ticket:status_changed")]
    StatusChanged(StatusChange),
    /// Someone started or stopped typing
    #[serde(rename = "ticket:typing")]
    Typing(TypingIndicator),
}

impl InboundFrame {
    /// Parse and validate a raw text frame.
    ///
    /// # Errors
    ///
    /// Returns [`ReconciliationError`] if the text is not a JSON object, has no
    /// `type`, has a `type` we do not handle, or its `data` has the wrong shape.
    pub fn parse(text: &str) -> Result<Self, ReconciliationError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| ReconciliationError::Malformed(e.to_string()))?;
        Self::from_value(value)
    }

    /// Validate an already-decoded JSON frame.
    ///
    /// # Errors
    ///
    /// See [`InboundFrame::parse`].
    pub fn from_value(value: Value) -> Result<Self, ReconciliationError> {
        let Some(object) = value.as_object() else {
            return Err(ReconciliationError::Malformed(
                "frame is not an object".to_string(),
            ));
        };
        let frame_type = match object.get("type") {
            None | Some(Value::Null) => return Err(ReconciliationError::MissingType),
            Some(Value::String(frame_type)) => frame_type.clone(),
            Some(other) => {
                return Err(ReconciliationError::Malformed(format!(
                    "type is not a string: {other}"
                )));
            }
        };
        if !INBOUND_TYPES.contains(&frame_type.as_str()) {
            return Err(ReconciliationError::UnknownType(frame_type));
        }

        let frame: Self = serde_json::from_value(value).map_err(|e| {
            ReconciliationError::InvalidPayload {
                frame_type: frame_type.clone(),
                reason: e.to_string(),
            }
        })?;
        frame.validate()?;
        Ok(frame)
    }

    /// Wire name of the frame type.
    #[must_use]
    pub const fn frame_type(&self) -> &'static str {
        match self {
            Self::MessageAdded(_) => MESSAGE_ADDED,
            Self::TicketUpdated(_) => TICKET_UPDATED,
            Self::TicketCreated(_) => TICKET_CREATED,
            Self::StatusChanged(_) => STATUS_CHANGED,
            Self::Typing(_) => TYPING,
        }
    }

    /// Ticket the frame refers to.
    #[must_use]
    pub const fn ticket_id(&self) -> &TicketId {
        match self {
            Self::MessageAdded(payload) => &payload.ticket_id,
            Self::TicketUpdated(patch) => &patch.ticket_id,
            Self::TicketCreated(ticket) => &ticket.id,
            Self::StatusChanged(change) => &change.ticket_id,
            Self::Typing(indicator) => &indicator.ticket_id,
        }
    }

    fn validate(&self) -> Result<(), ReconciliationError> {
        let invalid = |reason: &str| ReconciliationError::InvalidPayload {
            frame_type: self.frame_type().to_string(),
            reason: reason.to_string(),
        };

        if self.ticket_id().as_str().is_empty() {
            return Err(invalid("empty ticket id"));
        }
        if let Self::MessageAdded(payload) = self {
            if payload.message.id.as_str().is_empty() {
                return Err(invalid("empty message id"));
            }
            // The server never echoes placeholders; accepting one would let it
            // shadow a real provisional message.
            if payload.message.is_provisional() {
                return Err(invalid("temporary message id"));
            }
        }
        Ok(())
    }
}

/// Event classes named in the subscribe request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventClass {
    /// `message-added`
    MessageAdded,
    /// `ticket-updated`
    TicketUpdated,
    /// `ticket-created`
    TicketCreated,
    /// `status-changed`
    StatusChanged,
    /// `typing`
    Typing,
}

impl EventClass {
    /// Every class the synchronizer reconciles.
    pub const ALL: [Self; 5] = [
        Self::MessageAdded,
        Self::TicketUpdated,
        Self::TicketCreated,
        Self::StatusChanged,
        Self::Typing,
    ];
}

/// Payload of `subscribe:tickets`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    /// Session user
    pub user_id: String,
    /// Event classes of interest
    pub events: Vec<EventClass>,
}

/// A frame sent by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OutboundFrame {
    /// Subscribe to ticket events for a session
    #[serde(rename = "subscribe:tickets")]
    Subscribe(Subscription),
    /// Local typing indicator
    #[serde(rename = "ticket:typing")]
    Typing(TypingIndicator),
}

impl OutboundFrame {
    /// Subscribe to every event class.
    #[must_use]
    pub fn subscribe_all(user_id: impl Into<String>) -> Self {
        Self::Subscribe(Subscription {
            user_id: user_id.into(),
            events: EventClass::ALL.to_vec(),
        })
    }
}

//! Notifications observed by listeners of the ticket store.

use crate::ticket::{MessageId, TicketId, TicketStatus};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Push connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No push channel; fallback polling is active
    #[default]
    Disconnected,
    /// Transport is establishing the channel
    Connecting,
    /// Push channel is live
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

/// Something listeners may want to re-render for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    /// A ticket entered the projection
    TicketCreated {
        /// Ticket id
        ticket_id: TicketId,
    },
    /// Ticket fields changed
    TicketUpdated {
        /// Ticket id
        ticket_id: TicketId,
    },
    /// A ticket left the projection (failed creation, or dropped by a poll)
    TicketRemoved {
        /// Ticket id
        ticket_id: TicketId,
    },
    /// A message became visible (provisional or authoritative)
    MessageAdded {
        /// Ticket id
        ticket_id: TicketId,
        /// Message id
        message_id: MessageId,
    },
    /// A provisional message was superseded by its authoritative copy
    MessageConfirmed {
        /// Ticket id
        ticket_id: TicketId,
        /// Temporary id that disappeared
        temporary_id: MessageId,
        /// Server id that replaced it
        message_id: MessageId,
    },
    /// A provisional message was withdrawn
    MessageRemoved {
        /// Ticket id
        ticket_id: TicketId,
        /// Id of the withdrawn message
        message_id: MessageId,
    },
    /// Fired exactly once per observed status transition
    StatusChanged {
        /// Ticket id
        ticket_id: TicketId,
        /// Status before
        from: TicketStatus,
        /// Status after
        to: TicketStatus,
    },
    /// Remote typing indicator toggled
    TypingChanged {
        /// Ticket id
        ticket_id: TicketId,
        /// Whether someone is typing now
        is_typing: bool,
    },
    /// A poll replaced the ticket list
    TicketsReplaced {
        /// Number of tickets after the replacement
        count: usize,
    },
    /// Push connection changed state
    ConnectionChanged {
        /// New state
        state: ConnectionState,
    },
}

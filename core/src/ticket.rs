//! Ticket projection model.
//!
//! A [`Ticket`] is the client's local view of a support ticket. It is written by
//! two independent paths (local optimistic mutations and remote push/poll
//! updates), so every field that participates in conflict resolution is
//! explicit: `updated_at` is the last-writer-wins tie-breaker and provisional
//! messages are recognisable by their temporary id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Prefix carried by every locally synthesized id.
pub const TEMPORARY_ID_PREFIX: &str = "tmp-";

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a raw identifier.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Synthesize a temporary identifier for a provisional entity.
            #[must_use]
            pub fn temporary(sequence: u64) -> Self {
                Self(format!("{TEMPORARY_ID_PREFIX}{sequence}"))
            }

            /// Whether this id was synthesized locally and awaits replacement.
            #[must_use]
            pub fn is_temporary(&self) -> bool {
                self.0.starts_with(TEMPORARY_ID_PREFIX)
            }

            /// Borrow the raw identifier.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Ticket identifier (`TK-1`, or `tmp-3` while a creation is in flight).
    TicketId
);

string_id!(
    /// Message identifier (`MSG-9`, or `tmp-1` while a send is in flight).
    MessageId
);

/// Ticket lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    /// Newly opened, nobody working on it
    Open,
    /// Being handled by support
    InProgress,
    /// Waiting on the requester
    Waiting,
    /// Resolved
    Done,
    /// Closed without further action
    Closed,
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Waiting => "waiting",
            Self::Done => "done",
            Self::Closed => "closed",
        };
        f.write_str(label)
    }
}

/// Ticket priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Low
    Low,
    /// Normal
    #[default]
    Medium,
    /// High
    High,
    /// Drop everything
    Urgent,
}

/// Who wrote a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderRole {
    /// The person who opened the ticket
    User,
    /// A support agent
    Admin,
    /// Automated messages
    System,
}

/// A single message in a ticket thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Server-assigned id, or a temporary id while provisional
    pub id: MessageId,
    /// Message body
    pub text: String,
    /// Author role
    pub sender_role: SenderRole,
    /// When the message was written
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Whether this message is a local placeholder awaiting its authoritative copy.
    #[must_use]
    pub fn is_provisional(&self) -> bool {
        self.id.is_temporary()
    }

    /// Content-based identity used to match a provisional message with its echo.
    ///
    /// Two messages are "the same" when the sender role and text match and the
    /// timestamps are at most `window` apart. This is a heuristic: two distinct
    /// identical messages sent within the window collapse into one.
    #[must_use]
    pub fn matches_content(&self, other: &Self, window: Duration) -> bool {
        if self.sender_role != other.sender_role || self.text != other.text {
            return false;
        }
        let delta = self.timestamp.signed_duration_since(other.timestamp).abs();
        delta
            .to_std()
            .is_ok_and(|delta| delta <= window)
    }
}

/// Local projection of a support ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    /// Ticket id
    pub id: TicketId,
    /// Subject line
    pub subject: String,
    /// Current status
    pub status: TicketStatus,
    /// Priority
    #[serde(default)]
    pub priority: Priority,
    /// Thread, ordered by timestamp then id
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Last-writer-wins stamp
    pub updated_at: DateTime<Utc>,
    /// Messages from the remote party not yet seen locally
    #[serde(default)]
    pub unread_count: u32,
}

impl Ticket {
    /// Find a message by id.
    #[must_use]
    pub fn message(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| &m.id == id)
    }

    /// Whether a message with this id is already in the thread.
    #[must_use]
    pub fn has_message(&self, id: &MessageId) -> bool {
        self.message(id).is_some()
    }

    /// Advance `updated_at`, never moving it backwards.
    pub fn touch(&mut self, at: DateTime<Utc>) {
        if at > self.updated_at {
            self.updated_at = at;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_735_689_600 + secs, 0).unwrap()
    }

    fn msg(id: &str, text: &str, secs: i64) -> Message {
        Message {
            id: MessageId::from(id),
            text: text.to_string(),
            sender_role: SenderRole::User,
            timestamp: at(secs),
        }
    }

    #[test]
    fn temporary_ids_are_recognised() {
        assert!(MessageId::temporary(1).is_temporary());
        assert_eq!(MessageId::temporary(1).as_str(), "tmp-1");
        assert!(!MessageId::from("MSG-9").is_temporary());
        assert!(TicketId::temporary(4).is_temporary());
    }

    #[test]
    fn content_match_respects_window() {
        let window = Duration::from_secs(5);
        let local = msg("tmp-1", "hello", 0);

        assert!(local.matches_content(&msg("MSG-9", "hello", 5), window));
        assert!(local.matches_content(&msg("MSG-9", "hello", -4), window));
        assert!(!local.matches_content(&msg("MSG-9", "hello", 6), window));
        assert!(!local.matches_content(&msg("MSG-9", "hello!", 1), window));

        let mut admin = msg("MSG-9", "hello", 1);
        admin.sender_role = SenderRole::Admin;
        assert!(!local.matches_content(&admin, window));
    }

    #[test]
    fn touch_never_moves_backwards() {
        let mut ticket = Ticket {
            id: TicketId::from("TK-1"),
            subject: "s".to_string(),
            status: TicketStatus::Open,
            priority: Priority::Medium,
            messages: vec![],
            updated_at: at(10),
            unread_count: 0,
        };
        ticket.touch(at(5));
        assert_eq!(ticket.updated_at, at(10));
        ticket.touch(at(20));
        assert_eq!(ticket.updated_at, at(20));
    }

    #[test]
    fn ticket_wire_format_is_camel_case() {
        let json = r#"{"id":"TK-1","subject":"Login","status":"in_progress",
            "updatedAt":"2025-01-01T00:00:00Z","unreadCount":2,
            "messages":[{"id":"MSG-1","text":"hi","senderRole":"admin","timestamp":"2025-01-01T00:00:00Z"}]}"#;
        let ticket: Ticket = serde_json::from_str(json).unwrap();
        assert_eq!(ticket.status, TicketStatus::InProgress);
        assert_eq!(ticket.priority, Priority::Medium);
        assert_eq!(ticket.unread_count, 2);
        assert_eq!(ticket.messages[0].sender_role, SenderRole::Admin);
    }
}

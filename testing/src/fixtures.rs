//! Builders for tickets, messages, push frames and API payloads.
//!
//! Times are expressed as seconds after [`test_epoch`](crate::test_epoch).

use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use ticket_sync_core::ticket::{Message, MessageId, Priority, SenderRole, Ticket, TicketId, TicketStatus};

/// `test_epoch() + secs`.
#[must_use]
pub fn at(secs: i64) -> DateTime<Utc> {
    crate::test_epoch() + chrono::Duration::seconds(secs)
}

/// A ticket with no messages, stamped at `at(secs)`.
#[must_use]
pub fn ticket(id: &str, status: TicketStatus, secs: i64) -> Ticket {
    Ticket {
        id: TicketId::from(id),
        subject: format!("Subject of {id}"),
        status,
        priority: Priority::Medium,
        messages: Vec::new(),
        updated_at: at(secs),
        unread_count: 0,
    }
}

/// A message stamped at `at(secs)`.
#[must_use]
pub fn message(id: &str, text: &str, role: SenderRole, secs: i64) -> Message {
    Message {
        id: MessageId::from(id),
        text: text.to_string(),
        sender_role: role,
        timestamp: at(secs),
    }
}

/// `ticket:message_added` frame text.
#[must_use]
pub fn message_added_frame(ticket_id: &str, message: &Message) -> String {
    json!({
        "type": "ticket:message_added",
        "data": { "ticketId": ticket_id, "message": message },
    })
    .to_string()
}

/// `ticket:status_changed` frame text.
#[must_use]
pub fn status_changed_frame(ticket_id: &str, status: TicketStatus, secs: Option<i64>) -> String {
    let mut data = json!({ "ticketId": ticket_id, "status": status });
    if let (Some(secs), Some(object)) = (secs, data.as_object_mut()) {
        object.insert("updatedAt".to_string(), json!(at(secs)));
    }
    json!({ "type": "ticket:status_changed", "data": data }).to_string()
}

/// `ticket:created` frame text.
#[must_use]
pub fn ticket_created_frame(ticket: &Ticket) -> String {
    json!({ "type": "ticket:created", "data": ticket }).to_string()
}

/// `ticket:typing` frame text.
#[must_use]
pub fn typing_frame(ticket_id: &str, is_typing: bool, user_id: &str) -> String {
    json!({
        "type": "ticket:typing",
        "data": { "ticketId": ticket_id, "isTyping": is_typing, "userId": user_id },
    })
    .to_string()
}

/// JSON array of tickets, as returned in the `data` of `GET /tickets`.
#[must_use]
pub fn tickets_json(tickets: &[Ticket]) -> Value {
    json!(tickets)
}

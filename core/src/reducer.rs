//! Reconciliation reducer.
//!
//! Every writer of the ticket projection (push events, poll results, single
//! ticket reads, optimistic mutations and their confirmations or rollbacks)
//! is expressed as a [`TicketAction`] and merged by [`TicketReducer`]. The
//! rules are written so that the final state does not depend on the order in
//! which the push path and the request path deliver their results:
//!
//! - an older `updated_at` never overwrites a newer one
//! - a message id already present is never appended twice
//! - a provisional message is superseded by its authoritative echo, matched by
//!   `(ticket, sender role, text, timestamp within the dedup window)`
//! - a status notification fires only when the stored status actually changes
//!
//! Pending optimistic mutations live in [`TicketState::pending`], keyed by
//! [`MutationId`]. That record is the operation context used to confirm or
//! roll back a mutation once the server has answered.

use crate::effect::{Effect, TimerKey};
use crate::event::{InboundFrame, TicketPatch};
use crate::notification::Notification;
use crate::ticket::{Message, MessageId, SenderRole, Ticket, TicketId, TicketStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// The Reducer trait - core abstraction for business logic
///
/// Reducers are pure functions: `(State, Action, Environment) → (State, Effects)`.
/// They update state in place and return descriptions of side effects for the
/// runtime to execute.
pub trait Reducer {
    /// The state type this reducer operates on
    type State;

    /// The action type this reducer processes
    type Action;

    /// The environment type with injected dependencies
    type Environment;

    /// Reduce an action into state changes and effects
    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> Vec<Effect<Self::Action>>;
}

/// Tunables of the reconciliation rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileSettings {
    /// Role of the local participant; messages from any other role are unread
    pub local_role: SenderRole,
    /// Maximum timestamp distance for a provisional message to match its echo
    pub dedup_window: Duration,
    /// How long a remote typing indicator stays up without a repeat
    pub typing_ttl: Duration,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            local_role: SenderRole::User,
            dedup_window: Duration::from_secs(5),
            typing_ttl: Duration::from_secs(3),
        }
    }
}

/// Identifier of an in-flight optimistic mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MutationId(pub u64);

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mutation-{}", self.0)
    }
}

/// What an optimistic mutation changed locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingChange {
    /// A provisional message was appended
    Message {
        /// Its temporary id
        temporary_id: MessageId,
    },
    /// The status was flipped
    Status {
        /// The status the user asked for
        requested: TicketStatus,
    },
    /// A provisional ticket was inserted under a temporary id
    Create,
}

/// Operation context of an in-flight optimistic mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMutation {
    /// Ticket the mutation applies to (the temporary id for creations)
    pub ticket_id: TicketId,
    /// The local change
    pub change: PendingChange,
    /// Shallow copy of the ticket taken right before the change
    pub snapshot: Option<Ticket>,
    /// `updated_at` right after the change; a different value later means
    /// another writer has touched the ticket since
    pub stamped_at: DateTime<Utc>,
    /// An authoritative status write for this ticket arrived after the
    /// optimistic flip; rolling back must not undo it
    pub status_superseded: bool,
}

/// The single shared projection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TicketState {
    /// Tickets by id
    pub tickets: BTreeMap<TicketId, Ticket>,
    /// Tickets with a live remote typing indicator, with the arm that set it
    pub typing: BTreeMap<TicketId, u64>,
    /// Number of typing indicators armed so far
    pub typing_arms: u64,
    /// In-flight optimistic mutations
    pub pending: BTreeMap<MutationId, PendingMutation>,
}

impl TicketState {
    /// Look up a ticket.
    #[must_use]
    pub fn ticket(&self, id: &TicketId) -> Option<&Ticket> {
        self.tickets.get(id)
    }

    /// Tickets, most recently updated first.
    #[must_use]
    pub fn recent_first(&self) -> Vec<&Ticket> {
        let mut tickets: Vec<&Ticket> = self.tickets.values().collect();
        tickets.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        tickets
    }

    /// Whether someone is typing into this ticket.
    #[must_use]
    pub fn is_typing(&self, id: &TicketId) -> bool {
        self.typing.contains_key(id)
    }

    /// Total unread messages across tickets.
    #[must_use]
    pub fn unread_total(&self) -> u64 {
        self.tickets.values().map(|t| u64::from(t.unread_count)).sum()
    }
}

/// Every way the projection can change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TicketAction {
    // ========== Remote ==========
    /// Push `message-added`
    MessageReceived {
        /// Ticket id
        ticket_id: TicketId,
        /// Authoritative message
        message: Message,
    },
    /// Push `ticket-updated` / `status-changed`
    TicketPatched(TicketPatch),
    /// Push `ticket-created` (first write wins)
    TicketReceived(Ticket),
    /// A single ticket read from the API (last writer wins)
    TicketFetched(Ticket),
    /// A poll result replacing the list
    TicketsPolled(Vec<Ticket>),
    /// Push `typing` with `isTyping = true`
    TypingStarted {
        /// Ticket id
        ticket_id: TicketId,
    },
    /// Push `typing` with `isTyping = false`
    TypingStopped {
        /// Ticket id
        ticket_id: TicketId,
    },
    /// The typing timer fired
    TypingExpired {
        /// Ticket id
        ticket_id: TicketId,
        /// Arm the timer belonged to; a later arm makes it stale
        arm: u64,
    },

    // ========== Local ==========
    /// Optimistic send of a provisional message
    MessageSent {
        /// Operation context key
        mutation: MutationId,
        /// Ticket id
        ticket_id: TicketId,
        /// Provisional message carrying a temporary id
        message: Message,
    },
    /// Optimistic status flip
    StatusRequested {
        /// Operation context key
        mutation: MutationId,
        /// Ticket id
        ticket_id: TicketId,
        /// Requested status
        status: TicketStatus,
        /// Local time of the request
        at: DateTime<Utc>,
    },
    /// Optimistic creation of a provisional ticket
    TicketDrafted {
        /// Operation context key
        mutation: MutationId,
        /// Provisional ticket carrying a temporary id
        ticket: Ticket,
    },
    /// Server accepted a message send
    MessageConfirmed {
        /// Operation context key
        mutation: MutationId,
        /// Authoritative message
        message: Message,
    },
    /// Server accepted a status change or creation
    TicketConfirmed {
        /// Operation context key
        mutation: MutationId,
        /// Authoritative ticket
        ticket: Ticket,
    },
    /// Server rejected the mutation; roll it back
    MutationFailed {
        /// Operation context key
        mutation: MutationId,
    },
    /// The local user read the ticket
    MarkedRead {
        /// Ticket id
        ticket_id: TicketId,
    },
}

impl From<InboundFrame> for TicketAction {
    fn from(frame: InboundFrame) -> Self {
        match frame {
            InboundFrame::MessageAdded(payload) => Self::MessageReceived {
                ticket_id: payload.ticket_id,
                message: payload.message,
            },
            InboundFrame::TicketUpdated(patch) => Self::TicketPatched(patch),
            InboundFrame::TicketCreated(ticket) => Self::TicketReceived(ticket),
            InboundFrame::StatusChanged(change) => Self::TicketPatched(TicketPatch::status(
                change.ticket_id,
                change.status,
                change.updated_at,
            )),
            InboundFrame::Typing(indicator) if indicator.is_typing => Self::TypingStarted {
                ticket_id: indicator.ticket_id,
            },
            InboundFrame::Typing(indicator) => Self::TypingStopped {
                ticket_id: indicator.ticket_id,
            },
        }
    }
}

/// Reducer holding every reconciliation rule.
#[derive(Debug, Clone, Copy, Default)]
pub struct TicketReducer;

type Effects = Vec<Effect<TicketAction>>;

impl Reducer for TicketReducer {
    type State = TicketState;
    type Action = TicketAction;
    type Environment = ReconcileSettings;

    fn reduce(
        &self,
        state: &mut TicketState,
        action: TicketAction,
        env: &ReconcileSettings,
    ) -> Effects {
        match action {
            TicketAction::MessageReceived { ticket_id, message } => {
                receive_message(state, &ticket_id, message, env)
            },
            TicketAction::TicketPatched(patch) => apply_patch(state, &patch),
            TicketAction::TicketReceived(ticket) => {
                if state.tickets.contains_key(&ticket.id) {
                    return Vec::new();
                }
                let ticket_id = ticket.id.clone();
                state.tickets.insert(ticket_id.clone(), ticket);
                vec![Effect::Notify(Notification::TicketCreated { ticket_id })]
            },
            TicketAction::TicketFetched(ticket) => merge_fetched(state, ticket),
            TicketAction::TicketsPolled(tickets) => replace_all(state, tickets),
            TicketAction::TypingStarted { ticket_id } => {
                let mut effects = Vec::new();
                state.typing_arms += 1;
                let arm = state.typing_arms;
                if state.typing.insert(ticket_id.clone(), arm).is_none() {
                    effects.push(Effect::Notify(Notification::TypingChanged {
                        ticket_id: ticket_id.clone(),
                        is_typing: true,
                    }));
                }
                effects.push(Effect::Delay {
                    key: TimerKey::Typing(ticket_id.clone()),
                    duration: env.typing_ttl,
                    action: Box::new(TicketAction::TypingExpired { ticket_id, arm }),
                });
                effects
            },
            TicketAction::TypingStopped { ticket_id } => {
                let mut effects = Vec::new();
                if state.typing.remove(&ticket_id).is_some() {
                    effects.push(Effect::Notify(Notification::TypingChanged {
                        ticket_id: ticket_id.clone(),
                        is_typing: false,
                    }));
                }
                effects.push(Effect::Cancel(TimerKey::Typing(ticket_id)));
                effects
            },
            TicketAction::TypingExpired { ticket_id, arm } => {
                if state.typing.get(&ticket_id) == Some(&arm) {
                    state.typing.remove(&ticket_id);
                    vec![Effect::Notify(Notification::TypingChanged {
                        ticket_id,
                        is_typing: false,
                    })]
                } else {
                    Vec::new()
                }
            },
            TicketAction::MessageSent { mutation, ticket_id, message } => {
                send_message(state, mutation, ticket_id, message)
            },
            TicketAction::StatusRequested { mutation, ticket_id, status, at } => {
                request_status(state, mutation, ticket_id, status, at)
            },
            TicketAction::TicketDrafted { mutation, ticket } => {
                let ticket_id = ticket.id.clone();
                state.pending.insert(
                    mutation,
                    PendingMutation {
                        ticket_id: ticket_id.clone(),
                        change: PendingChange::Create,
                        snapshot: None,
                        stamped_at: ticket.updated_at,
                        status_superseded: false,
                    },
                );
                if state.tickets.contains_key(&ticket_id) {
                    return Vec::new();
                }
                state.tickets.insert(ticket_id.clone(), ticket);
                vec![Effect::Notify(Notification::TicketCreated { ticket_id })]
            },
            TicketAction::MessageConfirmed { mutation, message } => {
                confirm_message(state, mutation, message)
            },
            TicketAction::TicketConfirmed { mutation, ticket } => {
                confirm_ticket(state, mutation, ticket)
            },
            TicketAction::MutationFailed { mutation } => roll_back(state, mutation),
            TicketAction::MarkedRead { ticket_id } => match state.tickets.get_mut(&ticket_id) {
                Some(ticket) if ticket.unread_count > 0 => {
                    ticket.unread_count = 0;
                    vec![Effect::Notify(Notification::TicketUpdated { ticket_id })]
                },
                _ => Vec::new(),
            },
        }
    }
}

/// Messages are kept ordered by `(timestamp, id)` so arrival order does not matter.
fn insert_message(ticket: &mut Ticket, message: Message) {
    let position = ticket
        .messages
        .iter()
        .position(|m| (m.timestamp, &m.id) > (message.timestamp, &message.id))
        .unwrap_or(ticket.messages.len());
    ticket.messages.insert(position, message);
}

fn sort_messages(ticket: &mut Ticket) {
    ticket
        .messages
        .sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
}

fn set_status(ticket: &mut Ticket, status: TicketStatus, effects: &mut Effects) -> bool {
    if ticket.status == status {
        return false;
    }
    effects.push(Effect::Notify(Notification::StatusChanged {
        ticket_id: ticket.id.clone(),
        from: ticket.status,
        to: status,
    }));
    ticket.status = status;
    true
}

fn receive_message(
    state: &mut TicketState,
    ticket_id: &TicketId,
    message: Message,
    env: &ReconcileSettings,
) -> Effects {
    let Some(ticket) = state.tickets.get_mut(ticket_id) else {
        return Vec::new();
    };
    if ticket.has_message(&message.id) {
        return Vec::new();
    }

    let echo_of = ticket
        .messages
        .iter()
        .position(|m| m.is_provisional() && m.matches_content(&message, env.dedup_window));
    ticket.touch(message.timestamp);

    if let Some(position) = echo_of {
        let message_id = message.id.clone();
        let provisional = std::mem::replace(&mut ticket.messages[position], message);
        sort_messages(ticket);
        return vec![Effect::Notify(Notification::MessageConfirmed {
            ticket_id: ticket_id.clone(),
            temporary_id: provisional.id,
            message_id,
        })];
    }

    if message.sender_role != env.local_role {
        ticket.unread_count = ticket.unread_count.saturating_add(1);
    }
    let message_id = message.id.clone();
    insert_message(ticket, message);
    vec![Effect::Notify(Notification::MessageAdded {
        ticket_id: ticket_id.clone(),
        message_id,
    })]
}

fn apply_patch(state: &mut TicketState, patch: &TicketPatch) -> Effects {
    let Some(ticket) = state.tickets.get_mut(&patch.ticket_id) else {
        return Vec::new();
    };
    if patch.updated_at.is_some_and(|at| at < ticket.updated_at) {
        return Vec::new();
    }
    if patch.status.is_some() {
        supersede_status(&mut state.pending, &patch.ticket_id);
    }

    let mut effects = Vec::new();
    let mut changed = false;
    if let Some(subject) = &patch.subject {
        if *subject != ticket.subject {
            ticket.subject.clone_from(subject);
            changed = true;
        }
    }
    if let Some(priority) = patch.priority {
        if priority != ticket.priority {
            ticket.priority = priority;
            changed = true;
        }
    }
    if let Some(status) = patch.status {
        changed |= set_status(ticket, status, &mut effects);
    }
    if let Some(at) = patch.updated_at {
        ticket.touch(at);
    }

    if changed {
        effects.insert(
            0,
            Effect::Notify(Notification::TicketUpdated {
                ticket_id: patch.ticket_id.clone(),
            }),
        );
    }
    effects
}

fn merge_fetched(state: &mut TicketState, incoming: Ticket) -> Effects {
    let ticket_id = incoming.id.clone();
    let Some(existing) = state.tickets.get_mut(&ticket_id) else {
        state.tickets.insert(ticket_id.clone(), incoming);
        return vec![Effect::Notify(Notification::TicketCreated { ticket_id })];
    };
    if incoming.updated_at < existing.updated_at {
        return Vec::new();
    }
    supersede_status(&mut state.pending, &ticket_id);
    if *existing == incoming {
        return Vec::new();
    }

    let mut effects = vec![Effect::Notify(Notification::TicketUpdated {
        ticket_id: ticket_id.clone(),
    })];
    set_status(existing, incoming.status, &mut effects);
    *existing = incoming;
    effects
}

fn replace_all(state: &mut TicketState, incoming: Vec<Ticket>) -> Effects {
    let mut previous = std::mem::take(&mut state.tickets);
    let mut effects = Vec::new();

    for ticket in incoming {
        let ticket_id = ticket.id.clone();
        match previous.remove(&ticket_id) {
            Some(existing) if existing.updated_at > ticket.updated_at => {
                state.tickets.insert(ticket_id, existing);
            },
            Some(mut existing) => {
                supersede_status(&mut state.pending, &ticket_id);
                set_status(&mut existing, ticket.status, &mut effects);
                state.tickets.insert(ticket_id, ticket);
            },
            None => {
                state.tickets.insert(ticket_id, ticket);
            },
        }
    }

    for ticket_id in previous.into_keys() {
        if !state.tickets.contains_key(&ticket_id) {
            state.typing.remove(&ticket_id);
            effects.push(Effect::Notify(Notification::TicketRemoved { ticket_id }));
        }
    }
    effects.push(Effect::Notify(Notification::TicketsReplaced {
        count: state.tickets.len(),
    }));
    effects
}

fn send_message(
    state: &mut TicketState,
    mutation: MutationId,
    ticket_id: TicketId,
    message: Message,
) -> Effects {
    let Some(ticket) = state.tickets.get_mut(&ticket_id) else {
        return Vec::new();
    };
    let snapshot = ticket.clone();
    let temporary_id = message.id.clone();

    ticket.touch(message.timestamp);
    insert_message(ticket, message);
    state.pending.insert(
        mutation,
        PendingMutation {
            ticket_id: ticket_id.clone(),
            change: PendingChange::Message {
                temporary_id: temporary_id.clone(),
            },
            snapshot: Some(snapshot),
            stamped_at: ticket.updated_at,
            status_superseded: false,
        },
    );
    vec![Effect::Notify(Notification::MessageAdded {
        ticket_id,
        message_id: temporary_id,
    })]
}

fn request_status(
    state: &mut TicketState,
    mutation: MutationId,
    ticket_id: TicketId,
    status: TicketStatus,
    at: DateTime<Utc>,
) -> Effects {
    let Some(ticket) = state.tickets.get_mut(&ticket_id) else {
        return Vec::new();
    };
    let snapshot = ticket.clone();
    let mut effects = Vec::new();

    let changed = set_status(ticket, status, &mut effects);
    ticket.touch(at);
    state.pending.insert(
        mutation,
        PendingMutation {
            ticket_id: ticket_id.clone(),
            change: PendingChange::Status { requested: status },
            snapshot: Some(snapshot),
            stamped_at: ticket.updated_at,
            status_superseded: false,
        },
    );
    if changed {
        effects.insert(0, Effect::Notify(Notification::TicketUpdated { ticket_id }));
    }
    effects
}

fn confirm_message(state: &mut TicketState, mutation: MutationId, message: Message) -> Effects {
    let Some(pending) = state.pending.remove(&mutation) else {
        return Vec::new();
    };
    let PendingChange::Message { temporary_id } = pending.change else {
        return Vec::new();
    };
    let Some(ticket) = state.tickets.get_mut(&pending.ticket_id) else {
        return Vec::new();
    };

    ticket.touch(message.timestamp);
    let provisional = ticket.messages.iter().position(|m| m.id == temporary_id);
    let message_id = message.id.clone();

    let effects = match provisional {
        // The push echo already delivered the authoritative copy.
        Some(position) if ticket.has_message(&message_id) => {
            ticket.messages.remove(position);
            vec![Effect::Notify(Notification::MessageConfirmed {
                ticket_id: pending.ticket_id,
                temporary_id,
                message_id,
            })]
        },
        Some(position) => {
            ticket.messages[position] = message;
            sort_messages(ticket);
            vec![Effect::Notify(Notification::MessageConfirmed {
                ticket_id: pending.ticket_id,
                temporary_id,
                message_id,
            })]
        },
        None if ticket.has_message(&message_id) => Vec::new(),
        // A poll dropped the provisional copy before the server answered.
        None => {
            insert_message(ticket, message);
            vec![Effect::Notify(Notification::MessageAdded {
                ticket_id: pending.ticket_id,
                message_id,
            })]
        },
    };
    effects
}

fn confirm_ticket(state: &mut TicketState, mutation: MutationId, incoming: Ticket) -> Effects {
    let Some(pending) = state.pending.remove(&mutation) else {
        return Vec::new();
    };

    match pending.change {
        PendingChange::Status { .. } => {
            let Some(ticket) = state.tickets.get_mut(&pending.ticket_id) else {
                return Vec::new();
            };
            let untouched = ticket.updated_at == pending.stamped_at;
            if !untouched && incoming.updated_at < ticket.updated_at {
                return Vec::new();
            }

            supersede_status(&mut state.pending, &pending.ticket_id);
            let mut effects = Vec::new();
            let changed = set_status(ticket, incoming.status, &mut effects);
            ticket.subject = incoming.subject;
            ticket.priority = incoming.priority;
            // The optimistic stamp was local; the server's stamp is authoritative.
            ticket.updated_at = if untouched {
                incoming.updated_at
            } else {
                ticket.updated_at.max(incoming.updated_at)
            };
            if changed {
                effects.insert(
                    0,
                    Effect::Notify(Notification::TicketUpdated {
                        ticket_id: pending.ticket_id,
                    }),
                );
            }
            effects
        },
        PendingChange::Create => {
            let mut effects = Vec::new();
            if state.tickets.remove(&pending.ticket_id).is_some() {
                effects.push(Effect::Notify(Notification::TicketRemoved {
                    ticket_id: pending.ticket_id,
                }));
            }
            let ticket_id = incoming.id.clone();
            if !state.tickets.contains_key(&ticket_id) {
                state.tickets.insert(ticket_id.clone(), incoming);
                effects.push(Effect::Notify(Notification::TicketCreated { ticket_id }));
            }
            effects
        },
        PendingChange::Message { .. } => Vec::new(),
    }
}

/// Mark optimistic status flips on `ticket_id` as overtaken by the server.
fn supersede_status(pending: &mut BTreeMap<MutationId, PendingMutation>, ticket_id: &TicketId) {
    for entry in pending.values_mut() {
        if entry.ticket_id == *ticket_id && matches!(entry.change, PendingChange::Status { .. }) {
            entry.status_superseded = true;
        }
    }
}

fn roll_back(state: &mut TicketState, mutation: MutationId) -> Effects {
    let Some(pending) = state.pending.remove(&mutation) else {
        return Vec::new();
    };

    if pending.change == PendingChange::Create {
        return if state.tickets.remove(&pending.ticket_id).is_some() {
            vec![Effect::Notify(Notification::TicketRemoved {
                ticket_id: pending.ticket_id,
            })]
        } else {
            Vec::new()
        };
    }

    let Some(ticket) = state.tickets.get_mut(&pending.ticket_id) else {
        return Vec::new();
    };
    let untouched = ticket.updated_at == pending.stamped_at;
    let mut effects = Vec::new();

    match pending.change {
        PendingChange::Message { temporary_id } => {
            if let Some(position) = ticket.messages.iter().position(|m| m.id == temporary_id) {
                ticket.messages.remove(position);
                effects.push(Effect::Notify(Notification::MessageRemoved {
                    ticket_id: pending.ticket_id.clone(),
                    message_id: temporary_id,
                }));
            }
        },
        PendingChange::Status { requested } => {
            if !pending.status_superseded && ticket.status == requested {
                if let Some(snapshot) = &pending.snapshot {
                    if set_status(ticket, snapshot.status, &mut effects) {
                        effects.insert(
                            0,
                            Effect::Notify(Notification::TicketUpdated {
                                ticket_id: pending.ticket_id.clone(),
                            }),
                        );
                    }
                }
            }
        },
        PendingChange::Create => {},
    }

    // Restore the stamp only if no other writer has moved it since.
    if untouched {
        if let Some(snapshot) = pending.snapshot {
            ticket.updated_at = snapshot.updated_at;
        }
    }
    effects
}

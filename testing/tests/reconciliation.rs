//! Order-independence properties of the reconciliation reducer.

#![allow(clippy::unwrap_used)] // Tests can unwrap

use proptest::prelude::*;
use ticket_sync_core::event::TicketPatch;
use ticket_sync_core::notification::Notification;
use ticket_sync_core::reducer::{
    MutationId, ReconcileSettings, Reducer, TicketAction, TicketReducer, TicketState,
};
use ticket_sync_core::ticket::{MessageId, SenderRole, Ticket, TicketId, TicketStatus};
use ticket_sync_testing::fixtures;
use ticket_sync_testing::properties::{arb_role, arb_status, arb_text};

fn seeded(status: TicketStatus, secs: i64) -> TicketState {
    let mut state = TicketState::default();
    state
        .tickets
        .insert(TicketId::from("TK-1"), fixtures::ticket("TK-1", status, secs));
    state
}

fn apply(state: &mut TicketState, action: TicketAction) -> Vec<Notification> {
    TicketReducer
        .reduce(state, action, &ReconcileSettings::default())
        .iter()
        .filter_map(|effect| effect.notification().cloned())
        .collect()
}

/// A push-delivered change to `TK-1`.
fn arb_push() -> impl Strategy<Value = TicketAction> {
    prop_oneof![
        (0u32..6, arb_text(), arb_role(), 0i64..120).prop_map(|(n, text, role, secs)| {
            TicketAction::MessageReceived {
                ticket_id: TicketId::from("TK-1"),
                message: fixtures::message(&format!("MSG-{n}"), &text, role, secs),
            }
        }),
        (arb_status(), 0i64..120).prop_map(|(status, secs)| {
            TicketAction::TicketPatched(TicketPatch::status(
                TicketId::from("TK-1"),
                status,
                Some(fixtures::at(secs)),
            ))
        }),
    ]
}

fn tk1(state: &TicketState) -> &Ticket {
    state.ticket(&TicketId::from("TK-1")).unwrap()
}

proptest! {
    #[test]
    fn redelivered_frames_change_nothing(pushes in prop::collection::vec(arb_push(), 1..20)) {
        let mut once = seeded(TicketStatus::Open, 0);
        let mut twice = seeded(TicketStatus::Open, 0);

        for action in pushes {
            apply(&mut once, action.clone());
            apply(&mut twice, action.clone());
            apply(&mut twice, action);
        }

        prop_assert_eq!(once, twice);
    }

    #[test]
    fn replaying_a_stream_changes_nothing(pushes in prop::collection::vec(arb_push(), 1..20)) {
        let mut state = seeded(TicketStatus::Open, 0);
        for action in pushes.clone() {
            apply(&mut state, action);
        }
        let settled = state.clone();

        for action in pushes {
            apply(&mut state, action);
        }

        prop_assert_eq!(state, settled);
    }

    #[test]
    fn message_ids_stay_unique_and_ordered(pushes in prop::collection::vec(arb_push(), 1..30)) {
        let mut state = seeded(TicketStatus::Open, 0);
        for action in pushes {
            apply(&mut state, action);
        }

        let messages = &tk1(&state).messages;
        let mut ids: Vec<&MessageId> = messages.iter().map(|m| &m.id).collect();
        ids.sort();
        ids.dedup();
        prop_assert_eq!(ids.len(), messages.len());
        prop_assert!(messages
            .windows(2)
            .all(|w| (w[0].timestamp, &w[0].id) <= (w[1].timestamp, &w[1].id)));
    }

    #[test]
    fn echo_and_confirmation_commute(
        text in arb_text(),
        sent_at in 1i64..60,
        skew in 0i64..=5,
    ) {
        let mut state = seeded(TicketStatus::Open, 0);
        let mutation = MutationId(1);
        apply(&mut state, TicketAction::MessageSent {
            mutation,
            ticket_id: TicketId::from("TK-1"),
            message: fixtures::message("tmp-1", &text, SenderRole::User, sent_at),
        });

        let authoritative = fixtures::message("MSG-9", &text, SenderRole::User, sent_at + skew);
        let echo = TicketAction::MessageReceived {
            ticket_id: TicketId::from("TK-1"),
            message: authoritative.clone(),
        };
        let confirmation = TicketAction::MessageConfirmed { mutation, message: authoritative.clone() };

        let mut reversed = state.clone();
        apply(&mut state, echo.clone());
        apply(&mut state, confirmation.clone());
        apply(&mut reversed, confirmation);
        apply(&mut reversed, echo);

        prop_assert_eq!(&state, &reversed);
        let ticket = tk1(&state);
        prop_assert_eq!(&ticket.messages, &vec![authoritative]);
        prop_assert_eq!(ticket.unread_count, 0);
        prop_assert!(state.pending.is_empty());
    }

    #[test]
    fn rejected_status_change_restores_ticket(
        original in arb_status(),
        requested in arb_status(),
        delay in 1i64..600,
    ) {
        let mut state = seeded(original, 10);
        let before = tk1(&state).clone();

        apply(&mut state, TicketAction::StatusRequested {
            mutation: MutationId(1),
            ticket_id: TicketId::from("TK-1"),
            status: requested,
            at: fixtures::at(10 + delay),
        });
        let notified = apply(&mut state, TicketAction::MutationFailed { mutation: MutationId(1) });

        prop_assert_eq!(tk1(&state), &before);
        prop_assert!(state.pending.is_empty());
        let reverted = notified
            .iter()
            .any(|n| matches!(n, Notification::StatusChanged { .. }));
        prop_assert_eq!(reverted, original != requested);
    }

    #[test]
    fn older_patches_never_win(
        current in arb_status(),
        stale in arb_status(),
        age in 1i64..3_600,
    ) {
        let mut state = seeded(current, 3_600);
        let before = tk1(&state).clone();

        let notified = apply(&mut state, TicketAction::TicketPatched(TicketPatch::status(
            TicketId::from("TK-1"),
            stale,
            Some(fixtures::at(3_600 - age)),
        )));

        prop_assert!(notified.is_empty());
        prop_assert_eq!(tk1(&state), &before);
    }

    #[test]
    fn status_notifications_match_transitions(
        statuses in prop::collection::vec(arb_status(), 1..12),
    ) {
        let mut state = seeded(TicketStatus::Open, 0);
        let mut previous = TicketStatus::Open;
        let mut transitions = 0;
        let mut notified = 0;

        for (secs, status) in (1i64..).zip(statuses) {
            if status != previous {
                transitions += 1;
                previous = status;
            }
            notified += apply(&mut state, TicketAction::TicketPatched(TicketPatch::status(
                TicketId::from("TK-1"),
                status,
                Some(fixtures::at(secs)),
            )))
            .iter()
            .filter(|n| matches!(n, Notification::StatusChanged { .. }))
            .count();
        }

        prop_assert_eq!(notified, transitions);
        prop_assert_eq!(tk1(&state).status, previous);
    }
}

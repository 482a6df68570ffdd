//! Reconciliation hot-path benchmarks
//!
//! Every push frame and every poll goes through frame parsing, the reducer and
//! the store. The request path adds a breaker check and a cache lookup.
//!
//! Run with: `cargo bench`

#![allow(missing_docs)] // Benchmarks don't need extensive docs
#![allow(clippy::expect_used)] // Benchmarks can use expect for setup

use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use serde_json::json;
use std::sync::Arc;
use ticket_sync_core::event::InboundFrame;
use ticket_sync_core::reducer::{
    ReconcileSettings, Reducer, TicketAction, TicketReducer, TicketState,
};
use ticket_sync_core::ticket::{SenderRole, Ticket, TicketId, TicketStatus};
use ticket_sync_runtime::TicketStore;
use ticket_sync_runtime::cache::{CacheConfig, OfflineCache};
use ticket_sync_runtime::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerRegistry};
use ticket_sync_testing::{InMemoryStorage, fixtures, test_clock};

/// A ticket with `messages` messages already in its thread.
fn busy_ticket(messages: usize) -> Ticket {
    let mut ticket = fixtures::ticket("TK-1", TicketStatus::Open, 0);
    for n in 0..messages {
        let secs = i64::try_from(n).unwrap_or(i64::MAX);
        ticket
            .messages
            .push(fixtures::message(&format!("MSG-{n}"), "hello", SenderRole::Admin, secs));
    }
    ticket
}

fn state_with(ticket: Ticket) -> TicketState {
    let mut state = TicketState::default();
    state.tickets.insert(ticket.id.clone(), ticket);
    state
}

fn benchmark_frame_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_parse");
    group.throughput(Throughput::Elements(1));

    let message = fixtures::message("MSG-9", "any update on this?", SenderRole::Admin, 5);
    let message_added = fixtures::message_added_frame("TK-1", &message);
    let status_changed = fixtures::status_changed_frame("TK-1", TicketStatus::Done, Some(6));

    group.bench_function("message_added", |b| {
        b.iter(|| InboundFrame::parse(black_box(&message_added)));
    });
    group.bench_function("status_changed", |b| {
        b.iter(|| InboundFrame::parse(black_box(&status_changed)));
    });

    group.finish();
}

/// Duplicate detection scans the thread, so cost grows with its length.
fn benchmark_reducer(c: &mut Criterion) {
    let mut group = c.benchmark_group("reducer");
    group.throughput(Throughput::Elements(1));

    let reducer = TicketReducer;
    let env = ReconcileSettings::default();

    for size in [10, 100, 1_000] {
        let ticket = busy_ticket(size);

        group.bench_function(format!("duplicate_message/{size}"), |b| {
            let mut state = state_with(ticket.clone());
            let echo = TicketAction::MessageReceived {
                ticket_id: TicketId::from("TK-1"),
                message: ticket.messages[size / 2].clone(),
            };
            b.iter(|| reducer.reduce(&mut state, black_box(echo.clone()), &env));
        });

        group.bench_function(format!("new_message/{size}"), |b| {
            b.iter_batched(
                || state_with(ticket.clone()),
                |mut state| {
                    reducer.reduce(
                        &mut state,
                        TicketAction::MessageReceived {
                            ticket_id: TicketId::from("TK-1"),
                            message: fixtures::message("MSG-new", "ping", SenderRole::Admin, 1),
                        },
                        &env,
                    )
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }

    group.bench_function("poll_replace/100", |b| {
        let tickets: Vec<Ticket> = (0..100)
            .map(|n| fixtures::ticket(&format!("TK-{n}"), TicketStatus::Open, n))
            .collect();
        b.iter_batched(
            TicketState::default,
            |mut state| reducer.reduce(&mut state, TicketAction::TicketsPolled(tickets.clone()), &env),
            criterion::BatchSize::SmallInput,
        );
    });

    group.finish();
}

fn benchmark_store(c: &mut Criterion) {
    let mut group = c.benchmark_group("store");
    group.throughput(Throughput::Elements(1));

    let store = TicketStore::with_state(state_with(busy_ticket(50)), ReconcileSettings::default());
    let _guard = store.subscribe(|notification| {
        black_box(notification);
    });
    let frame = fixtures::message_added_frame(
        "TK-1",
        &fixtures::message("MSG-10", "hello", SenderRole::Admin, 10),
    );

    group.bench_function("parse_and_send_duplicate", |b| {
        b.iter(|| {
            let frame = InboundFrame::parse(black_box(&frame)).expect("valid frame");
            store.send(TicketAction::from(frame));
        });
    });

    group.finish();
}

fn benchmark_request_path(c: &mut Criterion) {
    let mut group = c.benchmark_group("request_path");
    group.throughput(Throughput::Elements(1));

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to build runtime");

    let clock = Arc::new(test_clock());
    let breakers = CircuitBreakerRegistry::new(CircuitBreakerConfig::default(), clock.clone());
    group.bench_function("breaker_can_attempt", |b| {
        b.to_async(&runtime)
            .iter(|| async { breakers.can_attempt(black_box("/tickets")).await });
    });

    let cache = OfflineCache::new(Arc::new(InMemoryStorage::new()), clock, CacheConfig::default());
    let tickets = json!((0..50)
        .map(|n| fixtures::ticket(&format!("TK-{n}"), TicketStatus::Open, n))
        .collect::<Vec<_>>());
    cache.set("/tickets", &tickets);
    group.bench_function("cache_hit/50_tickets", |b| {
        b.iter(|| cache.get(black_box("/tickets")));
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_frame_parsing,
    benchmark_reducer,
    benchmark_store,
    benchmark_request_path,
);
criterion_main!(benches);

//! Request executor behavior against a scripted transport.

#![allow(clippy::unwrap_used)]

mod common;

use common::Harness;
use serde_json::json;
use std::time::Duration;
use ticket_sync_core::api::{ApiRequest, Method};
use ticket_sync_core::error::RequestError;
use ticket_sync_runtime::SyncConfig;
use ticket_sync_runtime::circuit_breaker::State;
use ticket_sync_runtime::executor::ResponseSource;
use ticket_sync_runtime::retry::RetryPolicy;
use ticket_sync_testing::Reply;

fn no_retries() -> Harness {
    Harness::with_config(SyncConfig {
        retry: RetryPolicy::none(),
        ..SyncConfig::default()
    })
}

#[tokio::test(start_paused = true)]
async fn read_recovers_after_three_503s() {
    let h = Harness::new();
    for _ in 0..3 {
        h.transport.respond(Method::Get, "/tickets", Reply::status(503));
    }
    h.transport
        .respond(Method::Get, "/tickets", Reply::ok(json!([{ "id": "TK-1" }])));

    let started = tokio::time::Instant::now();
    let response = h
        .client
        .executor()
        .execute(ApiRequest::get("/tickets"), true)
        .await
        .unwrap();

    assert_eq!(response.data, json!([{ "id": "TK-1" }]));
    assert_eq!(response.source, ResponseSource::Network);
    assert_eq!(h.transport.request_count(Method::Get, "/tickets"), 4);
    // 2s + 4s + 8s of backoff, plus up to 1s of jitter each.
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(14));
    assert!(elapsed <= Duration::from_secs(17));
    assert_eq!(
        h.client.executor().breakers().state("/tickets").await,
        State::Closed
    );
}

#[tokio::test(start_paused = true)]
async fn breaker_opens_after_threshold_and_recovers() {
    let h = no_retries();
    let executor = h.client.executor();
    h.transport
        .respond_always(Method::Get, "/tickets", Reply::status(500));

    for _ in 0..5 {
        let result = executor.execute(ApiRequest::get("/tickets"), false).await;
        assert!(matches!(result, Err(RequestError::HttpServer { status: 500, .. })));
    }
    assert_eq!(executor.breakers().state("/tickets").await, State::Open);

    let rejected = executor.execute(ApiRequest::get("/tickets"), false).await;
    assert_eq!(
        rejected,
        Err(RequestError::ServiceUnavailable {
            endpoint: "/tickets".to_string()
        })
    );
    assert_eq!(h.transport.request_count(Method::Get, "/tickets"), 5);

    h.clock.advance(Duration::from_secs(60));
    h.transport
        .respond(Method::Get, "/tickets", Reply::ok(json!([])));
    tokio_test::assert_ok!(executor.execute(ApiRequest::get("/tickets"), false).await);

    assert_eq!(executor.breakers().state("/tickets").await, State::Closed);
    let snapshot = executor.breakers().snapshots().await;
    assert!(snapshot[0].failure_log.is_empty());
}

#[tokio::test(start_paused = true)]
async fn open_breaker_serves_cached_read() {
    let h = no_retries();
    let executor = h.client.executor();
    h.transport
        .respond(Method::Get, "/tickets", Reply::ok(json!(["cached"])));
    executor.execute(ApiRequest::get("/tickets"), true).await.unwrap();

    h.transport
        .respond_always(Method::Get, "/tickets", Reply::status(503));
    for _ in 0..5 {
        let response = executor.execute(ApiRequest::get("/tickets"), true).await.unwrap();
        assert!(response.is_cached());
    }
    assert_eq!(executor.breakers().state("/tickets").await, State::Open);

    let sent = h.transport.request_count(Method::Get, "/tickets");
    let response = executor.execute(ApiRequest::get("/tickets"), true).await.unwrap();
    assert_eq!(response.data, json!(["cached"]));
    assert_eq!(h.transport.request_count(Method::Get, "/tickets"), sent);
}

#[tokio::test(start_paused = true)]
async fn client_errors_fail_fast() {
    let h = Harness::new();
    let executor = h.client.executor();
    h.transport
        .respond_always(Method::Get, "/tickets/TK-404", Reply::status(404));

    let result = executor.execute(ApiRequest::get("/tickets/TK-404"), true).await;

    assert!(matches!(result, Err(RequestError::HttpClient { status: 404, .. })));
    assert_eq!(h.transport.request_count(Method::Get, "/tickets/TK-404"), 1);
    assert!(executor.breakers().get("/tickets/TK-404").await.is_none());
}

#[tokio::test(start_paused = true)]
async fn rate_limits_are_retried() {
    let h = Harness::new();
    h.transport.respond(Method::Get, "/tickets", Reply::status(429));
    h.transport.respond(Method::Get, "/tickets", Reply::status(408));
    h.transport.respond(Method::Get, "/tickets", Reply::ok(json!([])));

    h.client
        .executor()
        .execute(ApiRequest::get("/tickets"), false)
        .await
        .unwrap();
    assert_eq!(h.transport.request_count(Method::Get, "/tickets"), 3);
}

#[tokio::test(start_paused = true)]
async fn deadline_turns_hang_into_timeout() {
    let h = no_retries();
    h.transport.respond(Method::Get, "/tickets", Reply::Hang);

    let started = tokio::time::Instant::now();
    let result = h
        .client
        .executor()
        .execute(ApiRequest::get("/tickets"), false)
        .await;

    assert_eq!(result, Err(RequestError::Timeout(Duration::from_secs(10))));
    assert!(started.elapsed() >= Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn network_errors_do_not_trip_breaker() {
    let h = no_retries();
    let executor = h.client.executor();
    for _ in 0..6 {
        h.transport.respond(Method::Get, "/tickets", Reply::network());
        let result = executor.execute(ApiRequest::get("/tickets"), false).await;
        assert!(matches!(result, Err(RequestError::Network(_))));
    }
    assert_eq!(executor.breakers().state("/tickets").await, State::Closed);
}

#[tokio::test(start_paused = true)]
async fn offline_reads_never_touch_the_network() {
    let h = Harness::new();
    let executor = h.client.executor();
    h.transport
        .respond(Method::Get, "/tickets", Reply::ok(json!(["kept"])));
    executor.execute(ApiRequest::get("/tickets"), true).await.unwrap();

    h.client.signals().set_online(false);
    let cached = executor.execute(ApiRequest::get("/tickets"), true).await.unwrap();
    assert_eq!(cached.data, json!(["kept"]));
    assert!(cached.is_cached());

    let missing = executor
        .execute(ApiRequest::get("/tickets").query("page", "2"), true)
        .await;
    assert!(matches!(missing, Err(RequestError::Network(_))));
    assert_eq!(h.transport.requests().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn exhausted_read_falls_back_to_cache() {
    let h = Harness::new();
    let executor = h.client.executor();
    h.transport
        .respond(Method::Get, "/tickets", Reply::ok(json!(["last good"])));
    executor.execute(ApiRequest::get("/tickets"), true).await.unwrap();

    h.transport
        .respond_always(Method::Get, "/tickets", Reply::network());
    let response = executor.execute(ApiRequest::get("/tickets"), true).await.unwrap();

    assert_eq!(response.data, json!(["last good"]));
    assert_eq!(response.source, ResponseSource::Cache);
    assert_eq!(h.transport.request_count(Method::Get, "/tickets"), 5);
}

#[tokio::test(start_paused = true)]
async fn stale_cache_is_not_served() {
    let h = no_retries();
    let executor = h.client.executor();
    h.transport
        .respond(Method::Get, "/tickets", Reply::ok(json!(["old"])));
    executor.execute(ApiRequest::get("/tickets"), true).await.unwrap();

    h.clock.advance(Duration::from_secs(24 * 60 * 60 + 60));
    h.transport.respond(Method::Get, "/tickets", Reply::status(500));
    let error = tokio_test::assert_err!(executor.execute(ApiRequest::get("/tickets"), true).await);
    assert!(matches!(error, RequestError::HttpServer { .. }));
}

#[tokio::test(start_paused = true)]
async fn broken_storage_is_invisible() {
    let h = no_retries();
    h.storage.set_unavailable(true);
    h.transport
        .respond(Method::Get, "/tickets", Reply::ok(json!([])));

    let response = h
        .client
        .executor()
        .execute(ApiRequest::get("/tickets"), true)
        .await
        .unwrap();
    assert_eq!(response.source, ResponseSource::Network);
}

#[tokio::test(start_paused = true)]
async fn success_false_is_a_decode_error() {
    let h = no_retries();
    h.transport.respond(
        Method::Post,
        "/tickets",
        Reply::Respond(ticket_sync_core::api::ApiResponse {
            status: 200,
            body: ticket_sync_core::api::ResponseBody::failure("validation failed"),
        }),
    );

    let result = h
        .client
        .executor()
        .execute(
            ApiRequest::with_body(Method::Post, "/tickets", json!({ "subject": "" })),
            false,
        )
        .await;
    assert!(matches!(result, Err(RequestError::Decode(_))));
}

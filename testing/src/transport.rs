//! Scripted [`Transport`] and recording [`PushSink`].

use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use ticket_sync_core::api::{ApiRequest, ApiResponse, Method};
use ticket_sync_core::environment::{PushSink, Transport};
use ticket_sync_core::error::{PushError, RequestError};
use ticket_sync_core::event::OutboundFrame;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One scripted outcome.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Return this response
    Respond(ApiResponse),
    /// Fail at the transport level
    Fail(RequestError),
    /// Never complete (exercises the executor deadline)
    Hang,
    /// Wait, then produce the inner reply
    After(Duration, Box<Reply>),
}

impl Reply {
    /// `200` with `{success: true, data}`.
    #[must_use]
    pub const fn ok(data: Value) -> Self {
        Self::Respond(ApiResponse::ok(data))
    }

    /// An error status with a generic error body.
    #[must_use]
    pub fn status(status: u16) -> Self {
        Self::Respond(ApiResponse::error(status, format!("status {status}")))
    }

    /// A connectivity failure.
    #[must_use]
    pub fn network() -> Self {
        Self::Fail(RequestError::Network("connection refused".to_string()))
    }

    /// Delay this reply by `delay`.
    #[must_use]
    pub fn after(self, delay: Duration) -> Self {
        Self::After(delay, Box::new(self))
    }
}

type Route = (Method, String);

/// Transport answering from per-route scripts.
///
/// Each route has a queue of one-shot replies, consumed in order, and an
/// optional sticky reply used once the queue is empty. Unscripted requests fail
/// with a network error. Every request is recorded.
#[derive(Debug, Default)]
pub struct MockTransport {
    queued: Mutex<HashMap<Route, VecDeque<Reply>>>,
    sticky: Mutex<HashMap<Route, Reply>>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl MockTransport {
    /// Transport with no scripts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a one-shot reply for `method path`.
    pub fn respond(&self, method: Method, path: &str, reply: Reply) {
        lock(&self.queued)
            .entry((method, path.to_string()))
            .or_default()
            .push_back(reply);
    }

    /// Reply to every unqueued `method path` request with `reply`.
    pub fn respond_always(&self, method: Method, path: &str, reply: Reply) {
        lock(&self.sticky).insert((method, path.to_string()), reply);
    }

    /// Every request received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<ApiRequest> {
        lock(&self.requests).clone()
    }

    /// Number of requests received for `method path`.
    #[must_use]
    pub fn request_count(&self, method: Method, path: &str) -> usize {
        lock(&self.requests)
            .iter()
            .filter(|r| r.method == method && r.path == path)
            .count()
    }

    fn next_reply(&self, route: &Route) -> Reply {
        if let Some(reply) = lock(&self.queued).get_mut(route).and_then(VecDeque::pop_front) {
            return reply;
        }
        lock(&self.sticky).get(route).cloned().unwrap_or_else(|| {
            Reply::Fail(RequestError::Network(format!(
                "no scripted reply for {} {}",
                route.0, route.1
            )))
        })
    }
}

impl Transport for MockTransport {
    fn send(
        &self,
        request: ApiRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ApiResponse, RequestError>> + Send + '_>> {
        let reply = self.next_reply(&(request.method, request.path.clone()));
        lock(&self.requests).push(request);

        Box::pin(async move {
            let mut reply = reply;
            loop {
                match reply {
                    Reply::Respond(response) => return Ok(response),
                    Reply::Fail(error) => return Err(error),
                    Reply::Hang => return std::future::pending().await,
                    Reply::After(delay, next) => {
                        tokio::time::sleep(delay).await;
                        reply = *next;
                    },
                }
            }
        })
    }
}

/// Push sink that records every outbound frame.
#[derive(Debug, Default)]
pub struct RecordingPushSink {
    frames: Mutex<Vec<OutboundFrame>>,
    closed: AtomicBool,
}

impl RecordingPushSink {
    /// Open sink with no frames.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames sent so far.
    #[must_use]
    pub fn frames(&self) -> Vec<OutboundFrame> {
        lock(&self.frames).clone()
    }

    /// Make subsequent sends fail with [`PushError::Closed`].
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl PushSink for RecordingPushSink {
    fn send(&self, frame: OutboundFrame) -> Result<(), PushError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PushError::Closed);
        }
        lock(&self.frames).push(frame);
        Ok(())
    }
}

//! In-memory transport that replays a queue of canned outcomes and records
//! every request it receives. Used by tests and offline tooling.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use http::StatusCode;
use parking_lot::Mutex;
use tower::Service;

use super::TransportError;
use crate::http::{HttpRequest, HttpResponse};

#[derive(Debug, Default)]
struct Script {
    outcomes: VecDeque<Result<HttpResponse, TransportError>>,
    requests: Vec<HttpRequest>,
}

/// Transport answering from a scripted queue. Clones share the queue.
///
/// Once the queue is exhausted every call fails with
/// `TransportError::Other("no scripted response")`.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response with the given status and body.
    #[must_use]
    pub fn respond(self, status: StatusCode, body: impl Into<Bytes>) -> Self {
        self.push(Ok(HttpResponse::new(status, body)));
        self
    }

    /// Queues a transport failure.
    #[must_use]
    pub fn fail(self, error: TransportError) -> Self {
        self.push(Err(error));
        self
    }

    pub fn push(&self, outcome: Result<HttpResponse, TransportError>) {
        self.script.lock().outcomes.push_back(outcome);
    }

    /// Requests received so far, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.script.lock().requests.clone()
    }

    #[must_use]
    pub fn request_count(&self) -> usize {
        self.script.lock().requests.len()
    }
}

impl Service<HttpRequest> for ScriptedTransport {
    type Response = HttpResponse;
    type Error = TransportError;
    type Future = Pin<Box<dyn Future<Output = Result<HttpResponse, TransportError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: HttpRequest) -> Self::Future {
        let outcome = {
            let mut script = self.script.lock();
            script.requests.push(request);
            script
                .outcomes
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Other("no scripted response".into())))
        };
        Box::pin(async move { outcome })
    }
}

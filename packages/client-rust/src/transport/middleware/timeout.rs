//! Timeout middleware for HTTP round trips.
//!
//! Fails a round trip that exceeds the configured duration with
//! `TransportError::Timeout`, which the engine treats as a networking error.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tower::{Layer, Service};

use crate::http::{HttpRequest, HttpResponse};
use crate::transport::TransportError;

// ---------------------------------------------------------------------------
// TimeoutLayer
// ---------------------------------------------------------------------------

/// Tower layer that bounds every round trip by a fixed duration.
#[derive(Debug, Clone)]
pub struct TimeoutLayer {
    timeout: Duration,
}

impl TimeoutLayer {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl<S> Layer<S> for TimeoutLayer {
    type Service = TimeoutService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TimeoutService {
            inner,
            timeout: self.timeout,
        }
    }
}

// ---------------------------------------------------------------------------
// TimeoutService
// ---------------------------------------------------------------------------

/// Service wrapper that enforces the round-trip timeout.
#[derive(Debug, Clone)]
pub struct TimeoutService<S> {
    inner: S,
    timeout: Duration,
}

impl<S> Service<HttpRequest> for TimeoutService<S>
where
    S: Service<HttpRequest, Response = HttpResponse, Error = TransportError> + Send,
    S::Future: Send + 'static,
{
    type Response = HttpResponse;
    type Error = TransportError;
    type Future = Pin<Box<dyn Future<Output = Result<HttpResponse, TransportError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: HttpRequest) -> Self::Future {
        let timeout = self.timeout;
        let fut = self.inner.call(request);
        Box::pin(async move {
            match tokio::time::timeout(timeout, fut).await {
                Ok(result) => result,
                Err(_elapsed) => Err(TransportError::Timeout {
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                }),
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use cumulus_core::Endpoint;
    use http::StatusCode;
    use tower::ServiceExt;

    use super::*;

    /// Service that takes a configurable delay before responding.
    #[derive(Clone)]
    struct SlowService {
        delay_ms: u64,
    }

    impl Service<HttpRequest> for SlowService {
        type Response = HttpResponse;
        type Error = TransportError;
        type Future =
            Pin<Box<dyn Future<Output = Result<HttpResponse, TransportError>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _request: HttpRequest) -> Self::Future {
            let delay = self.delay_ms;
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                Ok(HttpResponse::new(StatusCode::OK, ""))
            })
        }
    }

    fn request() -> HttpRequest {
        HttpRequest::new(Endpoint::new("https", "mock.test"))
    }

    #[tokio::test(start_paused = true)]
    async fn completes_within_timeout() {
        let svc =
            TimeoutLayer::new(Duration::from_millis(1000)).layer(SlowService { delay_ms: 10 });
        let resp = svc.oneshot(request()).await.unwrap();
        assert_eq!(resp.status, StatusCode::OK);
    }

    #[tokio::test(start_paused = true)]
    async fn exceeds_timeout_returns_error() {
        let svc = TimeoutLayer::new(Duration::from_millis(50)).layer(SlowService { delay_ms: 200 });
        let err = svc.oneshot(request()).await.unwrap_err();
        assert_eq!(err, TransportError::Timeout { timeout_ms: 50 });
    }
}

//! Metrics middleware for HTTP round trips.
//!
//! Records duration and outcome of each round trip in a `tracing` span.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use tower::{Layer, Service};
use tracing::{debug_span, Instrument};

use crate::http::{HttpRequest, HttpResponse};
use crate::transport::TransportError;

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

/// Tower layer that instruments round trips with timing via `tracing` spans.
#[derive(Debug, Clone)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

/// Service wrapper that records round-trip duration and status.
#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

impl<S> Service<HttpRequest> for MetricsService<S>
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
        let span = debug_span!(
            "http",
            method = %request.method,
            host = %request.endpoint.host,
            path = %request.path,
            duration_ms = tracing::field::Empty,
            status = tracing::field::Empty,
        );

        let fut = self.inner.call(request);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;
                let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

                let span = tracing::Span::current();
                span.record("duration_ms", duration_ms);
                match &result {
                    Ok(response) => {
                        span.record("status", response.status.as_u16());
                        tracing::debug!(
                            status = response.status.as_u16(),
                            duration_ms,
                            "http round trip"
                        );
                    }
                    Err(err) => {
                        tracing::debug!(error = %err, duration_ms, "http round trip failed");
                    }
                }

                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

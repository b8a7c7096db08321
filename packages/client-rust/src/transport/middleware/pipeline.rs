//! Pipeline composition: wraps a client's transport with all middleware layers.

use cumulus_core::ClientConfig;
use tower::ServiceBuilder;

use super::metrics::MetricsLayer;
use super::timeout::TimeoutLayer;
use crate::transport::{boxed, BoxTransport, SharedTransport};

/// Build the transport for one client.
///
/// Layer order (outermost to innermost):
/// 1. `MetricsLayer` -- record timing and outcome, including timeouts
/// 2. `TimeoutLayer` -- enforce `config.http_timeout`
#[must_use]
pub fn build_transport(inner: BoxTransport, config: &ClientConfig) -> SharedTransport {
    let service = ServiceBuilder::new()
        .layer(MetricsLayer)
        .layer(TimeoutLayer::new(config.http_timeout))
        .service(inner);
    SharedTransport::new(boxed(service))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

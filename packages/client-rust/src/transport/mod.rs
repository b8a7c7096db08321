//! Transport seam: the tower service that performs one HTTP round trip.
//!
//! - [`http_client`]: `reqwest`-backed default transport
//! - [`scripted`]: in-memory transport replaying canned responses
//! - [`middleware`]: timeout and metrics layers, composed per client

pub mod http_client;
pub mod middleware;
pub mod scripted;

use std::sync::Arc;

use cumulus_core::{ErrorKind, RequestError};
use parking_lot::Mutex;
use tower::util::BoxCloneService;
use tower::{Service, ServiceExt};

use crate::http::{HttpRequest, HttpResponse};

pub use http_client::HttpClient;
pub use middleware::build_transport;
pub use scripted::ScriptedTransport;

/// Failure to obtain an HTTP response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("transport error: {0}")]
    Other(String),
}

impl From<TransportError> for RequestError {
    fn from(err: TransportError) -> Self {
        let code = match err {
            TransportError::Timeout { .. } => "TimeoutError",
            TransportError::Connect(_) | TransportError::Other(_) => "NetworkingError",
        };
        RequestError::new(ErrorKind::Networking, code, err.to_string())
    }
}

/// Type-erased transport service.
pub type BoxTransport = BoxCloneService<HttpRequest, HttpResponse, TransportError>;

/// Boxes a concrete transport service.
pub fn boxed<S>(service: S) -> BoxTransport
where
    S: Service<HttpRequest, Response = HttpResponse, Error = TransportError>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    BoxCloneService::new(service)
}

/// Transport handle shareable across tasks.
///
/// Each send clones the boxed service out from under the lock, so the lock
/// is never held across an await point.
#[derive(Clone)]
pub struct SharedTransport {
    inner: Arc<Mutex<BoxTransport>>,
}

impl std::fmt::Debug for SharedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedTransport").finish_non_exhaustive()
    }
}

impl SharedTransport {
    #[must_use]
    pub fn new(service: BoxTransport) -> Self {
        Self {
            inner: Arc::new(Mutex::new(service)),
        }
    }

    /// Performs one round trip.
    ///
    /// # Errors
    ///
    /// Returns the transport's error when no response was obtained.
    pub async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.service().oneshot(request).await
    }

    /// A clone of the underlying service, for layering into a new pipeline.
    #[must_use]
    pub fn service(&self) -> BoxTransport {
        self.inner.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_map_to_networking_errors() {
        let err = RequestError::from(TransportError::Timeout { timeout_ms: 50 });
        assert_eq!(err.kind, ErrorKind::Networking);
        assert_eq!(err.code, "TimeoutError");
        assert_eq!(err.message, "request timed out after 50ms");

        let err = RequestError::from(TransportError::Connect("refused".into()));
        assert_eq!(err.code, "NetworkingError");
        assert!(err.status_code.is_none());
    }
}

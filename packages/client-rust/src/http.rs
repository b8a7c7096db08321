//! HTTP request/response values passed between listeners and the transport.

use bytes::Bytes;
use cumulus_core::Endpoint;
use http::{HeaderMap, Method, StatusCode};

/// Request being assembled by the build and sign phases.
///
/// Rebuilt from scratch at the start of every attempt.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub endpoint: Endpoint,
    /// Path plus optional query string, always starting with `/`.
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpRequest {
    /// `POST /` against `endpoint` with no headers and an empty body.
    #[must_use]
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            method: Method::POST,
            endpoint,
            path: "/".to_string(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Absolute URL of this request.
    #[must_use]
    pub fn url(&self) -> String {
        format!("{}{}", self.endpoint.url(), self.path)
    }
}

/// Response returned by the transport.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpResponse {
    #[must_use]
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Whether the status routes to the extract-error phase (>= 300).
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.status.as_u16() >= 300
    }
}

//! Error taxonomy shared by the core leaves and the request engine.
//!
//! Two families:
//! - [`ConfigError`]: construction-time failures (version resolution, catalog
//!   loading). Raised immediately and never retried.
//! - [`RequestError`]: the per-attempt and terminal error carried by a request.
//!   Every attempt failure funnels through this type so the retry policy can
//!   classify it uniformly.

use std::fmt;

use serde::Serialize;

/// Construction-time configuration failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// The service has a version registry with no registered versions.
    #[error("No clients defined on {service}")]
    NoVersions { service: String },

    /// No registered version is lexically <= the requested one.
    #[error("Could not find {service} API to satisfy version constraint '{version}'")]
    UnsatisfiableVersion { service: String, version: String },

    /// The catalog has no descriptor for `{service}-{version}`.
    #[error("Could not find API configuration {service}-{version}")]
    MissingApiConfig { service: String, version: String },

    /// A version key is neither `YYYY-MM-DD` nor the literal `latest`.
    #[error("invalid API version '{version}' for {service}: expected YYYY-MM-DD")]
    InvalidVersion { service: String, version: String },

    /// A catalog entry exists but could not be read or parsed.
    #[error("invalid API configuration {key}: {reason}")]
    InvalidApiConfig { key: String, reason: String },
}

/// Classification of a request failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Parameters failed validation before anything was sent.
    Validation,
    /// The transport could not obtain an HTTP response.
    Networking,
    /// The service answered with a status >= 300.
    Service,
    /// A listener failed in a build/sign/extract phase.
    Handler,
    /// The request was cancelled by its owner.
    Aborted,
}

/// Per-attempt and terminal request error.
///
/// `retryable` is filled in by the engine from the retry policy when an
/// attempt fails; `retry_count` records how many retries preceded delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestError {
    pub kind: ErrorKind,
    pub code: String,
    pub message: String,
    pub status_code: Option<u16>,
    pub retryable: bool,
    pub retry_count: u32,
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(status) => write!(f, "{} (HTTP {status}): {}", self.code, self.message),
            None => write!(f, "{}: {}", self.code, self.message),
        }
    }
}

impl std::error::Error for RequestError {}

impl RequestError {
    /// Builds an error of the given kind with no status code.
    #[must_use]
    pub fn new(kind: ErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
            status_code: None,
            retryable: false,
            retry_count: 0,
        }
    }

    /// Parameter validation failure. Never retried.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, "ValidationError", message)
    }

    /// Transport failure with no HTTP response.
    #[must_use]
    pub fn networking(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Networking, "NetworkingError", message)
    }

    /// Service error classified from an HTTP response.
    #[must_use]
    pub fn service(status_code: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status_code: Some(status_code),
            ..Self::new(ErrorKind::Service, code, message)
        }
    }

    /// Cancellation by the request's owner.
    #[must_use]
    pub fn aborted() -> Self {
        Self::new(ErrorKind::Aborted, "RequestAbortedError", "request aborted by caller")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_messages_name_service_and_version() {
        let err = ConfigError::UnsatisfiableVersion {
            service: "mock".into(),
            version: "1998-01-01".into(),
        };
        assert_eq!(
            err.to_string(),
            "Could not find mock API to satisfy version constraint '1998-01-01'"
        );

        let err = ConfigError::MissingApiConfig {
            service: "mock".into(),
            version: "2001-01-01".into(),
        };
        assert_eq!(err.to_string(), "Could not find API configuration mock-2001-01-01");

        let err = ConfigError::NoVersions { service: "mock".into() };
        assert_eq!(err.to_string(), "No clients defined on mock");
    }

    #[test]
    fn request_error_display_includes_status() {
        let err = RequestError::service(503, "ServiceUnavailable", "try later");
        assert_eq!(err.to_string(), "ServiceUnavailable (HTTP 503): try later");

        let err = RequestError::networking("connection reset");
        assert_eq!(err.to_string(), "NetworkingError: connection reset");
        assert_eq!(err.kind, ErrorKind::Networking);
        assert!(!err.retryable);
    }
}

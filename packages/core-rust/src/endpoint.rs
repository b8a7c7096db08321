//! Endpoint resolution: explicit override, service-global host, or the
//! `{prefix}.{region}.amazonaws.com` convention, in that order.

use std::fmt;

use http::Uri;

use crate::api::ApiDescriptor;
use crate::config::ClientConfig;

/// Domain appended to region-derived hosts.
pub const DEFAULT_DOMAIN: &str = "amazonaws.com";

/// Target host of a client's requests. Immutable once resolved.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

fn default_port(scheme: &str) -> u16 {
    if scheme.eq_ignore_ascii_case("http") {
        80
    } else {
        443
    }
}

impl Endpoint {
    /// Endpoint on the scheme's default port.
    #[must_use]
    pub fn new(scheme: impl Into<String>, host: impl Into<String>) -> Self {
        let scheme = scheme.into();
        let port = default_port(&scheme);
        Self {
            scheme,
            host: host.into(),
            port,
        }
    }

    /// Parses `host`, `host:port` or `scheme://host[:port]`. Input that is
    /// not a valid URI authority is taken verbatim as the host.
    #[must_use]
    pub fn parse(raw: &str, default_scheme: &str) -> Self {
        let Ok(uri) = raw.parse::<Uri>() else {
            return Self::new(default_scheme, raw);
        };
        let Some(host) = uri.host() else {
            return Self::new(default_scheme, raw);
        };

        let scheme = uri
            .scheme_str()
            .map_or_else(|| default_scheme.to_string(), str::to_ascii_lowercase);
        let port = uri.port_u16().unwrap_or_else(|| default_port(&scheme));
        Self {
            scheme,
            host: host.to_string(),
            port,
        }
    }

    /// Whether `port` is the default for `scheme`.
    #[must_use]
    pub fn is_default_port(&self) -> bool {
        self.port == default_port(&self.scheme)
    }

    /// Base URL without a trailing slash; the port is omitted when default.
    #[must_use]
    pub fn url(&self) -> String {
        if self.is_default_port() {
            format!("{}://{}", self.scheme, self.host)
        } else {
            format!("{}://{}:{}", self.scheme, self.host, self.port)
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

/// Resolves the endpoint for a client.
///
/// `explicit` wins outright; otherwise the descriptor's global endpoint; and
/// otherwise `{endpoint_prefix}.{region}.amazonaws.com`. When no descriptor
/// is bound, `service` stands in for the endpoint prefix. The scheme follows
/// `config.ssl_enabled` unless `explicit` names one.
#[must_use]
pub fn resolve_endpoint(
    explicit: Option<&str>,
    api: Option<&ApiDescriptor>,
    config: &ClientConfig,
    service: &str,
) -> Endpoint {
    let scheme = if config.ssl_enabled { "https" } else { "http" };

    if let Some(raw) = explicit {
        return Endpoint::parse(raw, scheme);
    }

    if let Some(global) = api.and_then(|a| a.global_endpoint.as_deref()) {
        return Endpoint::parse(global, scheme);
    }

    let prefix = api.map_or(service, |a| a.endpoint_prefix.as_str());
    Endpoint::new(scheme, format!("{prefix}.{}.{DEFAULT_DOMAIN}", config.region))
}

//! Client configuration.
//!
//! A [`ClientConfig`] is an immutable snapshot owned by a client. Overrides
//! never mutate a config in place: [`ClientConfig::merge`] produces a new
//! value where every explicitly set override wins over the base.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::api::ApiDescriptor;
use crate::retry::{RetryPolicy, DEFAULT_BASE_DELAY, DEFAULT_MAX_RETRIES};
use crate::version::ApiVersion;

/// Region used when neither config nor environment names one.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Access key pair plus optional session token, handed to signing listeners.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl Credentials {
    #[must_use]
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Effective configuration of one client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub region: String,
    pub credentials: Option<Credentials>,
    /// Retry budget; `None` defers to the service default, then 3.
    pub max_retries: Option<u32>,
    /// When false, the validation listener is removed from requests.
    pub param_validation: bool,
    /// Selects `https` (default) or `http` for derived endpoints.
    pub ssl_enabled: bool,
    /// Explicit endpoint override: `host`, `host:port` or `scheme://host[:port]`.
    pub endpoint: Option<String>,
    /// Global default API version for every service.
    pub api_version: Option<ApiVersion>,
    /// Per-service API versions; take priority over `api_version`.
    pub api_versions: HashMap<String, ApiVersion>,
    /// Inline descriptor that bypasses the version registry.
    pub api_config: Option<Arc<ApiDescriptor>>,
    /// Timeout applied to each HTTP round trip by the transport middleware.
    pub http_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            region: DEFAULT_REGION.to_string(),
            credentials: None,
            max_retries: None,
            param_validation: true,
            ssl_enabled: true,
            endpoint: None,
            api_version: None,
            api_versions: HashMap::new(),
            api_config: None,
            http_timeout: Duration::from_secs(120),
        }
    }
}

impl ClientConfig {
    /// Defaults with region and credentials taken from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults with region and credentials taken from `lookup`.
    ///
    /// Reads `AWS_REGION`, then `AWS_DEFAULT_REGION`, and the
    /// `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY` / `AWS_SESSION_TOKEN`
    /// triple. Empty values are ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let region = get("AWS_REGION")
            .or_else(|| get("AWS_DEFAULT_REGION"))
            .unwrap_or_else(|| DEFAULT_REGION.to_string());

        let credentials = match (get("AWS_ACCESS_KEY_ID"), get("AWS_SECRET_ACCESS_KEY")) {
            (Some(access_key_id), Some(secret_access_key)) => Some(Credentials {
                access_key_id,
                secret_access_key,
                session_token: get("AWS_SESSION_TOKEN"),
            }),
            _ => None,
        };

        Self {
            region,
            credentials,
            ..Self::default()
        }
    }

    /// Returns a new config with every field set in `overrides` replacing
    /// the corresponding field of `self`. Per-service versions are merged
    /// key by key.
    #[must_use]
    pub fn merge(&self, overrides: &ConfigOverrides) -> Self {
        let mut api_versions = self.api_versions.clone();
        api_versions.extend(
            overrides
                .api_versions
                .iter()
                .map(|(service, version)| (service.clone(), version.clone())),
        );

        Self {
            region: overrides.region.clone().unwrap_or_else(|| self.region.clone()),
            credentials: overrides.credentials.clone().or_else(|| self.credentials.clone()),
            max_retries: overrides.max_retries.or(self.max_retries),
            param_validation: overrides.param_validation.unwrap_or(self.param_validation),
            ssl_enabled: overrides.ssl_enabled.unwrap_or(self.ssl_enabled),
            endpoint: overrides.endpoint.clone().or_else(|| self.endpoint.clone()),
            api_version: overrides.api_version.clone().or_else(|| self.api_version.clone()),
            api_versions,
            api_config: overrides.api_config.clone().or_else(|| self.api_config.clone()),
            http_timeout: overrides.http_timeout.unwrap_or(self.http_timeout),
        }
    }

    /// Version requested for `service`: per-service entry, then the global
    /// `api_version`, then `latest`.
    #[must_use]
    pub fn requested_version(&self, service: &str) -> ApiVersion {
        self.api_versions
            .get(service)
            .or(self.api_version.as_ref())
            .cloned()
            .unwrap_or_default()
    }

    /// Retry budget: this config, then `service_default`, then 3.
    #[must_use]
    pub fn effective_max_retries(&self, service_default: Option<u32>) -> u32 {
        self.max_retries.or(service_default).unwrap_or(DEFAULT_MAX_RETRIES)
    }

    /// Retry policy for a client of a service with the given default budget.
    #[must_use]
    pub fn retry_policy(&self, service_default: Option<u32>) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.effective_max_retries(service_default),
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

/// Explicit per-client overrides. Unset fields inherit from the base config.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub region: Option<String>,
    pub credentials: Option<Credentials>,
    pub max_retries: Option<u32>,
    pub param_validation: Option<bool>,
    pub ssl_enabled: Option<bool>,
    pub endpoint: Option<String>,
    pub api_version: Option<ApiVersion>,
    pub api_versions: HashMap<String, ApiVersion>,
    pub api_config: Option<Arc<ApiDescriptor>>,
    pub http_timeout: Option<Duration>,
}

impl ConfigOverrides {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    #[must_use]
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    #[must_use]
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    #[must_use]
    pub fn param_validation(mut self, enabled: bool) -> Self {
        self.param_validation = Some(enabled);
        self
    }

    #[must_use]
    pub fn ssl_enabled(mut self, enabled: bool) -> Self {
        self.ssl_enabled = Some(enabled);
        self
    }

    #[must_use]
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    #[must_use]
    pub fn api_version(mut self, version: impl Into<ApiVersion>) -> Self {
        self.api_version = Some(version.into());
        self
    }

    #[must_use]
    pub fn service_api_version(
        mut self,
        service: impl Into<String>,
        version: impl Into<ApiVersion>,
    ) -> Self {
        self.api_versions.insert(service.into(), version.into());
        self
    }

    #[must_use]
    pub fn api_config(mut self, api: ApiDescriptor) -> Self {
        self.api_config = Some(Arc::new(api));
        self
    }

    #[must_use]
    pub fn http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = Some(timeout);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_config_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.region, "us-east-1");
        assert!(config.max_retries.is_none());
        assert!(config.param_validation);
        assert!(config.ssl_enabled);
        assert!(config.endpoint.is_none());
        assert_eq!(config.http_timeout, Duration::from_secs(120));
        assert_eq!(config.effective_max_retries(None), 3);
    }

    #[test]
    fn environment_supplies_region_and_credentials() {
        let env: HashMap<&str, &str> = [
            ("AWS_DEFAULT_REGION", "eu-west-1"),
            ("AWS_ACCESS_KEY_ID", "AKID"),
            ("AWS_SECRET_ACCESS_KEY", "secret"),
            ("AWS_SESSION_TOKEN", ""),
        ]
        .into_iter()
        .collect();

        let config = ClientConfig::from_lookup(|k| env.get(k).map(ToString::to_string));
        assert_eq!(config.region, "eu-west-1");
        let creds = config.credentials.unwrap();
        assert_eq!(creds.access_key_id, "AKID");
        assert!(creds.session_token.is_none());
    }

    #[test]
    fn missing_environment_falls_back_to_default_region() {
        let config = ClientConfig::from_lookup(|_| None);
        assert_eq!(config.region, DEFAULT_REGION);
        assert!(config.credentials.is_none());
    }

    #[test]
    fn overrides_win_and_base_is_untouched() {
        let base = ClientConfig {
            region: "us-west-2".into(),
            max_retries: Some(5),
            ..ClientConfig::default()
        }
        .merge(&ConfigOverrides::new().service_api_version("s3", "2006-03-01"));

        let merged = base.merge(
            &ConfigOverrides::new()
                .region("ap-south-1")
                .param_validation(false)
                .service_api_version("sqs", "2012-11-05"),
        );

        assert_eq!(merged.region, "ap-south-1");
        assert_eq!(merged.max_retries, Some(5));
        assert!(!merged.param_validation);
        assert_eq!(merged.api_versions.len(), 2);

        assert_eq!(base.region, "us-west-2");
        assert!(base.param_validation);
        assert_eq!(base.api_versions.len(), 1);
    }

    #[test]
    fn per_service_version_beats_global_version() {
        let config = ClientConfig::default().merge(
            &ConfigOverrides::new()
                .api_version("2000-01-01")
                .service_api_version("mock", "1999-05-05"),
        );
        assert_eq!(config.requested_version("mock").as_str(), "1999-05-05");
        assert_eq!(config.requested_version("other").as_str(), "2000-01-01");
        assert!(ClientConfig::default().requested_version("mock").is_latest());
    }

    #[test]
    fn retry_budget_precedence() {
        let config = ClientConfig::default();
        assert_eq!(config.effective_max_retries(Some(10)), 10);

        let config = config.merge(&ConfigOverrides::new().max_retries(0));
        assert_eq!(config.effective_max_retries(Some(10)), 0);
        assert_eq!(config.retry_policy(Some(10)).max_retries, 0);
    }

    #[test]
    fn credentials_debug_redacts_secrets() {
        let mut creds = Credentials::new("AKID", "top-secret");
        creds.session_token = Some("token".into());
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("AKID"));
        assert!(!rendered.contains("top-secret"));
        assert!(!rendered.contains("\"token\""));
    }
}

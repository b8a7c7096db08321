//! API descriptors: the operation table and metadata for one version of one
//! service. Supplied by an [`ApiCatalog`](crate::catalog::ApiCatalog) or
//! inline through [`ClientConfig::api_config`](crate::config::ClientConfig);
//! the engine treats them as read-only.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Serialization format of a service; selects which listener set a client
/// attaches to its requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApiFormat {
    Query,
    Json,
    RestJson,
    RestXml,
}

impl ApiFormat {
    /// All formats, in declaration order.
    pub const ALL: [ApiFormat; 4] = [Self::Query, Self::Json, Self::RestJson, Self::RestXml];

    /// Wire name (`query`, `json`, `rest-json`, `rest-xml`).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Json => "json",
            Self::RestJson => "rest-json",
            Self::RestXml => "rest-xml",
        }
    }
}

impl fmt::Display for ApiFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_http_method() -> String {
    "POST".to_string()
}

fn default_http_path() -> String {
    "/".to_string()
}

/// One callable operation of a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationDescriptor {
    /// HTTP method used when the format does not override it.
    #[serde(default = "default_http_method")]
    pub http_method: String,
    /// Request path template.
    #[serde(default = "default_http_path")]
    pub http_path: String,
    /// Input members that must be present when parameter validation is on.
    #[serde(default)]
    pub required: Vec<String>,
}

impl Default for OperationDescriptor {
    fn default() -> Self {
        Self {
            http_method: default_http_method(),
            http_path: default_http_path(),
            required: Vec::new(),
        }
    }
}

/// Operation table and endpoint metadata for one service version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiDescriptor {
    /// Stable short name of the service (`s3`, `sqs`, ...).
    pub service_identifier: String,
    pub format: ApiFormat,
    /// Host prefix used for `{prefix}.{region}.amazonaws.com`.
    pub endpoint_prefix: String,
    /// Region-independent host, if the service has one.
    #[serde(default)]
    pub global_endpoint: Option<String>,
    /// Version this descriptor describes, when known.
    #[serde(default)]
    pub api_version: Option<String>,
    #[serde(default)]
    pub operations: BTreeMap<String, OperationDescriptor>,
}

impl ApiDescriptor {
    /// Creates a descriptor with an empty operation table.
    #[must_use]
    pub fn new(
        service_identifier: impl Into<String>,
        format: ApiFormat,
        endpoint_prefix: impl Into<String>,
    ) -> Self {
        Self {
            service_identifier: service_identifier.into(),
            format,
            endpoint_prefix: endpoint_prefix.into(),
            global_endpoint: None,
            api_version: None,
            operations: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_operation(
        mut self,
        name: impl Into<String>,
        operation: OperationDescriptor,
    ) -> Self {
        self.operations.insert(name.into(), operation);
        self
    }

    #[must_use]
    pub fn with_global_endpoint(mut self, host: impl Into<String>) -> Self {
        self.global_endpoint = Some(host.into());
        self
    }

    #[must_use]
    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = Some(version.into());
        self
    }

    /// Looks up an operation by name.
    #[must_use]
    pub fn operation(&self, name: &str) -> Option<&OperationDescriptor> {
        self.operations.get(name)
    }

    /// Operation names in sorted order.
    pub fn operation_names(&self) -> impl Iterator<Item = &str> {
        self.operations.keys().map(String::as_str)
    }
}

//! `Cumulus` Core: client configuration, endpoint resolution, API descriptors,
//! version registry, and retry policy.
//!
//! Everything in this crate is synchronous and free of network I/O; the
//! request engine in `cumulus-client` builds on these leaves.

pub mod api;
pub mod catalog;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod retry;
pub mod version;

pub use api::{ApiDescriptor, ApiFormat, OperationDescriptor};
pub use catalog::{ApiCatalog, FsCatalog, InMemoryCatalog};
pub use config::{ClientConfig, ConfigOverrides, Credentials};
pub use endpoint::{resolve_endpoint, Endpoint};
pub use error::{ConfigError, ErrorKind, RequestError};
pub use retry::RetryPolicy;
pub use version::{resolve_version, ApiVersion, ResolvedApi, VersionRegistry};

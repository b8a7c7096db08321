//! Service definitions: the per-service template clients are built from.
//!
//! A [`ServiceDefinition`] names a service, owns its [`VersionRegistry`],
//! and carries service-specific behavior (listeners, hand-written operation
//! overrides, a default retry budget). [`ServiceDefinition::define_api`]
//! produces a definition pre-bound to one API descriptor, which clients use
//! as-is without consulting the registry.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use cumulus_core::{
    ApiCatalog, ApiDescriptor, ApiVersion, ConfigError, ResolvedApi, VersionRegistry,
};
use serde_json::Value;

use crate::bus::ListenerSet;
use crate::client::{Client, DispatchError};
use crate::request::Request;

// ---------------------------------------------------------------------------
// CustomOperation
// ---------------------------------------------------------------------------

/// A hand-written operation. Takes precedence over the operation synthesized
/// from the API descriptor under the same name.
pub trait CustomOperation: Send + Sync {
    /// Builds the (unsent) request for this operation.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError` when the request cannot be built.
    fn build(&self, client: &Client, params: Value) -> Result<Request, DispatchError>;
}

impl<F> CustomOperation for F
where
    F: Fn(&Client, Value) -> Result<Request, DispatchError> + Send + Sync,
{
    fn build(&self, client: &Client, params: Value) -> Result<Request, DispatchError> {
        self(client, params)
    }
}

// ---------------------------------------------------------------------------
// ApiSource
// ---------------------------------------------------------------------------

/// What to bind a definition to.
#[derive(Debug, Clone)]
pub enum ApiSource {
    /// A version constraint resolved against the definition's registry.
    Version(ApiVersion),
    /// A descriptor used as-is.
    Descriptor(ApiDescriptor),
}

impl From<ApiVersion> for ApiSource {
    fn from(version: ApiVersion) -> Self {
        Self::Version(version)
    }
}

impl From<ApiDescriptor> for ApiSource {
    fn from(api: ApiDescriptor) -> Self {
        Self::Descriptor(api)
    }
}

// ---------------------------------------------------------------------------
// ServiceDefinition
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct ServiceDefinition {
    id: String,
    registry: Option<Arc<VersionRegistry>>,
    bound: Option<ResolvedApi>,
    custom_operations: BTreeMap<String, Arc<dyn CustomOperation>>,
    listeners: Arc<ListenerSet>,
    default_max_retries: Option<u32>,
}

impl fmt::Debug for ServiceDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDefinition")
            .field("id", &self.id)
            .field("registry", &self.registry)
            .field("bound", &self.bound.as_ref().map(|b| &b.version))
            .field("custom_operations", &self.custom_operations.keys().collect::<Vec<_>>())
            .field("default_max_retries", &self.default_max_retries)
            .finish_non_exhaustive()
    }
}

impl ServiceDefinition {
    /// A service with no version registry. Its clients expose no operations
    /// unless given an inline `api_config`.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            listeners: Arc::new(ListenerSet::new(id.clone())),
            id,
            registry: None,
            bound: None,
            custom_operations: BTreeMap::new(),
            default_max_retries: None,
        }
    }

    /// Defines a service over a set of API versions served by `catalog`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidVersion` when a version key is not a
    /// `YYYY-MM-DD` date or `latest`.
    pub fn define<I, S>(
        id: impl Into<String>,
        versions: I,
        catalog: Arc<dyn ApiCatalog>,
    ) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut definition = Self::new(id);
        let registry = VersionRegistry::new(definition.id.clone(), versions, catalog)?;
        definition.registry = Some(Arc::new(registry));
        Ok(definition)
    }

    /// Returns a copy of this definition bound to one API.
    ///
    /// The registry (and its memoized resolutions) is shared with `self`.
    ///
    /// # Errors
    ///
    /// Returns the resolution error when `source` is a version this
    /// definition cannot satisfy, or `ConfigError::NoVersions` when it has
    /// no registry to resolve against.
    pub fn define_api(&self, source: impl Into<ApiSource>) -> Result<Self, ConfigError> {
        let bound = match source.into() {
            ApiSource::Version(version) => {
                let registry = self.registry.as_ref().ok_or_else(|| ConfigError::NoVersions {
                    service: self.id.clone(),
                })?;
                registry.resolve(&version)?
            }
            ApiSource::Descriptor(api) => ResolvedApi {
                version: api
                    .api_version
                    .clone()
                    .unwrap_or_else(|| ApiVersion::latest().to_string()),
                api: Arc::new(api),
            },
        };

        Ok(Self {
            bound: Some(bound),
            ..self.clone()
        })
    }

    /// Registers a hand-written operation.
    #[must_use]
    pub fn with_custom_operation(
        mut self,
        name: impl Into<String>,
        operation: impl CustomOperation + 'static,
    ) -> Self {
        self.custom_operations.insert(name.into(), Arc::new(operation));
        self
    }

    /// Sets the listeners every client of this service attaches after the
    /// core and format sets.
    #[must_use]
    pub fn with_listeners(mut self, listeners: ListenerSet) -> Self {
        self.listeners = Arc::new(listeners);
        self
    }

    /// Retry budget used when the client config leaves `max_retries` unset.
    #[must_use]
    pub fn with_default_max_retries(mut self, max_retries: u32) -> Self {
        self.default_max_retries = Some(max_retries);
        self
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn registry(&self) -> Option<&Arc<VersionRegistry>> {
        self.registry.as_ref()
    }

    /// The pre-bound API, if this definition came from [`define_api`](Self::define_api).
    #[must_use]
    pub fn bound_api(&self) -> Option<&ResolvedApi> {
        self.bound.as_ref()
    }

    #[must_use]
    pub fn listeners(&self) -> &Arc<ListenerSet> {
        &self.listeners
    }

    #[must_use]
    pub fn default_max_retries(&self) -> Option<u32> {
        self.default_max_retries
    }

    pub(crate) fn custom_operations(
        &self,
    ) -> impl Iterator<Item = (&String, &Arc<dyn CustomOperation>)> {
        self.custom_operations.iter()
    }
}

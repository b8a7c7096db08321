//! API catalog loaders, keyed by `{service}-{version}`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::api::ApiDescriptor;
use crate::error::ConfigError;
use crate::version::is_valid_version_key;

/// Source of API descriptors for a service version.
///
/// Used as `Arc<dyn ApiCatalog>` by [`VersionRegistry`](crate::version::VersionRegistry).
pub trait ApiCatalog: Send + Sync {
    /// Loads the descriptor for `{service}-{version}`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingApiConfig` when no such entry exists, or
    /// `ConfigError::InvalidApiConfig` when it exists but cannot be parsed.
    fn load(&self, service: &str, version: &str) -> Result<ApiDescriptor, ConfigError>;
}

/// Catalog key for a service version.
#[must_use]
pub fn catalog_key(service: &str, version: &str) -> String {
    format!("{service}-{version}")
}

/// Catalog backed by a map of pre-built descriptors. Used for embedded
/// catalogs and tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    entries: HashMap<String, ApiDescriptor>,
}

impl InMemoryCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a descriptor under its own service identifier and `version`.
    pub fn insert(&mut self, version: &str, api: ApiDescriptor) {
        let key = catalog_key(&api.service_identifier, version);
        self.entries.insert(key, api);
    }
}

impl ApiCatalog for InMemoryCatalog {
    fn load(&self, service: &str, version: &str) -> Result<ApiDescriptor, ConfigError> {
        self.entries
            .get(&catalog_key(service, version))
            .cloned()
            .ok_or_else(|| ConfigError::MissingApiConfig {
                service: service.to_string(),
                version: version.to_string(),
            })
    }
}

/// Catalog reading `{dir}/{service}-{version}.json` files.
#[derive(Debug, Clone)]
pub struct FsCatalog {
    dir: PathBuf,
}

impl FsCatalog {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Version keys present in the directory for `service`, unsorted.
    ///
    /// Only stems of the form `{service}-{version}` with a valid version key
    /// count, so `iot-data-2015-05-28.json` is not a version of `iot`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory cannot be listed.
    pub fn versions_for(&self, service: &str) -> std::io::Result<Vec<String>> {
        let prefix = format!("{service}-");
        let mut versions = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let version = stem.strip_prefix(&prefix).filter(|v| is_valid_version_key(v));
            if let Some(version) = version {
                versions.push(version.to_string());
            }
        }
        Ok(versions)
    }
}

impl ApiCatalog for FsCatalog {
    fn load(&self, service: &str, version: &str) -> Result<ApiDescriptor, ConfigError> {
        let key = catalog_key(service, version);
        let path = self.dir.join(format!("{key}.json"));

        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConfigError::MissingApiConfig {
                    service: service.to_string(),
                    version: version.to_string(),
                });
            }
            Err(e) => {
                return Err(ConfigError::InvalidApiConfig {
                    key,
                    reason: e.to_string(),
                });
            }
        };

        serde_json::from_str(&raw).map_err(|e| ConfigError::InvalidApiConfig {
            key,
            reason: e.to_string(),
        })
    }
}

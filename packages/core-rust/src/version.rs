//! API version resolution.
//!
//! Registered version keys are ISO dates (`YYYY-MM-DD`), validated at
//! registration so lexical order equals chronological order. A requested
//! version resolves to an exact key when one exists, otherwise to the greatest
//! key lexically <= the request. `latest` sorts after every date, so it picks
//! the newest registered version unless a literal `latest` key exists.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock};

use chrono::NaiveDate;
use parking_lot::RwLock;
use regex::Regex;

use crate::api::ApiDescriptor;
use crate::catalog::ApiCatalog;
use crate::error::ConfigError;

/// The literal version token meaning "newest available".
pub const LATEST: &str = "latest";

static ISO_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("static regex is valid"));

/// A requested API version: a `YYYY-MM-DD` date, `latest`, or any other
/// string compared lexically against registered keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ApiVersion(String);

impl ApiVersion {
    #[must_use]
    pub fn latest() -> Self {
        Self(LATEST.to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_latest(&self) -> bool {
        self.0 == LATEST
    }
}

impl Default for ApiVersion {
    fn default() -> Self {
        Self::latest()
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ApiVersion {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ApiVersion {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<NaiveDate> for ApiVersion {
    fn from(date: NaiveDate) -> Self {
        Self(date.format("%Y-%m-%d").to_string())
    }
}

/// Whether `key` may be registered: a real calendar date in `YYYY-MM-DD`
/// form, or the literal `latest`.
#[must_use]
pub fn is_valid_version_key(key: &str) -> bool {
    key == LATEST
        || (ISO_DATE.is_match(key) && NaiveDate::parse_from_str(key, "%Y-%m-%d").is_ok())
}

/// Resolves `requested` against `versions`, which must be sorted ascending.
///
/// # Errors
///
/// - `ConfigError::NoVersions` if `versions` is empty
/// - `ConfigError::UnsatisfiableVersion` if no key is <= `requested`
pub fn resolve_version(
    service: &str,
    requested: &str,
    versions: &[String],
) -> Result<String, ConfigError> {
    if versions.is_empty() {
        return Err(ConfigError::NoVersions {
            service: service.to_string(),
        });
    }

    if versions.iter().any(|v| v == requested) {
        return Ok(requested.to_string());
    }

    versions
        .iter()
        .rev()
        .find(|v| v.as_str() <= requested)
        .cloned()
        .ok_or_else(|| ConfigError::UnsatisfiableVersion {
            service: service.to_string(),
            version: requested.to_string(),
        })
}

/// A resolved version key together with its loaded descriptor.
#[derive(Debug, Clone)]
pub struct ResolvedApi {
    pub version: String,
    pub api: Arc<ApiDescriptor>,
}

/// Per-service set of registered versions with memoized resolution.
///
/// Descriptors are loaded from the catalog on first resolution of each
/// version and kept for the life of the registry; entries are never removed.
pub struct VersionRegistry {
    service: String,
    versions: Vec<String>,
    catalog: Arc<dyn ApiCatalog>,
    /// version key -> loaded descriptor.
    loaded: RwLock<HashMap<String, Arc<ApiDescriptor>>>,
    /// requested version -> resolved key.
    resolved: RwLock<HashMap<String, String>>,
}

impl fmt::Debug for VersionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionRegistry")
            .field("service", &self.service)
            .field("versions", &self.versions)
            .field("loaded", &self.loaded.read().len())
            .finish_non_exhaustive()
    }
}

impl VersionRegistry {
    /// Creates a registry for `service` over the given version keys.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidVersion` for the first key that is not a
    /// valid `YYYY-MM-DD` date (or `latest`).
    pub fn new<I, S>(
        service: impl Into<String>,
        versions: I,
        catalog: Arc<dyn ApiCatalog>,
    ) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let service = service.into();
        let mut keys = Vec::new();
        for version in versions {
            let version = version.into();
            if !is_valid_version_key(&version) {
                return Err(ConfigError::InvalidVersion { service, version });
            }
            keys.push(version);
        }
        keys.sort();
        keys.dedup();

        Ok(Self {
            service,
            versions: keys,
            catalog,
            loaded: RwLock::new(HashMap::new()),
            resolved: RwLock::new(HashMap::new()),
        })
    }

    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Registered version keys, ascending.
    #[must_use]
    pub fn versions(&self) -> &[String] {
        &self.versions
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    /// Resolves a requested version to a registered key.
    ///
    /// # Errors
    ///
    /// See [`resolve_version`].
    pub fn resolve_key(&self, requested: &ApiVersion) -> Result<String, ConfigError> {
        if let Some(key) = self.resolved.read().get(requested.as_str()) {
            return Ok(key.clone());
        }

        let key = resolve_version(&self.service, requested.as_str(), &self.versions)?;
        self.resolved
            .write()
            .insert(requested.as_str().to_string(), key.clone());
        Ok(key)
    }

    /// Resolves a requested version and loads its descriptor, memoizing both.
    ///
    /// # Errors
    ///
    /// Returns a resolution error from [`resolve_version`], or the catalog's
    /// error when the descriptor for the resolved key cannot be loaded.
    pub fn resolve(&self, requested: &ApiVersion) -> Result<ResolvedApi, ConfigError> {
        let version = self.resolve_key(requested)?;

        if let Some(api) = self.loaded.read().get(&version) {
            return Ok(ResolvedApi {
                version,
                api: Arc::clone(api),
            });
        }

        let mut api = self.catalog.load(&self.service, &version)?;
        if api.api_version.is_none() {
            api.api_version = Some(version.clone());
        }

        tracing::debug!(
            service = %self.service,
            requested = %requested,
            version = %version,
            "loaded API descriptor"
        );

        let api = Arc::clone(
            self.loaded
                .write()
                .entry(version.clone())
                .or_insert_with(|| Arc::new(api)),
        );
        Ok(ResolvedApi { version, api })
    }

    /// Number of descriptors loaded so far.
    #[must_use]
    pub fn loaded_count(&self) -> usize {
        self.loaded.read().len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use proptest::prelude::*;

    use super::*;
    use crate::api::ApiFormat;
    use crate::catalog::InMemoryCatalog;

    fn keys(versions: &[&str]) -> Vec<String> {
        let mut keys: Vec<String> = versions.iter().map(ToString::to_string).collect();
        keys.sort();
        keys
    }

    /// Catalog that counts loads, to observe memoization.
    struct CountingCatalog {
        inner: InMemoryCatalog,
        loads: AtomicUsize,
    }

    impl ApiCatalog for CountingCatalog {
        fn load(&self, service: &str, version: &str) -> Result<ApiDescriptor, ConfigError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            self.inner.load(service, version)
        }
    }

    fn mock_catalog(versions: &[&str]) -> InMemoryCatalog {
        let mut catalog = InMemoryCatalog::new();
        for v in versions {
            catalog.insert(v, ApiDescriptor::new("mock", ApiFormat::Json, "mockservice"));
        }
        catalog
    }

    #[test]
    fn fuzzy_match_picks_greatest_older_version() {
        let versions = keys(&["1999-05-05", "2001-01-01"]);
        assert_eq!(resolve_version("mock", "2000-01-01", &versions).unwrap(), "1999-05-05");
    }

    #[test]
    fn exact_match_wins() {
        let versions = keys(&["1999-05-05", "2001-01-01"]);
        assert_eq!(resolve_version("mock", "2001-01-01", &versions).unwrap(), "2001-01-01");
    }

    #[test]
    fn latest_resolves_to_newest_key() {
        let versions = keys(&["1999-05-05", "2001-01-01", "2000-02-02"]);
        assert_eq!(resolve_version("mock", LATEST, &versions).unwrap(), "2001-01-01");
    }

    #[test]
    fn literal_latest_key_is_an_exact_match() {
        let versions = keys(&["1999-05-05", "latest"]);
        assert_eq!(resolve_version("mock", LATEST, &versions).unwrap(), "latest");
        assert_eq!(resolve_version("mock", "2000-01-01", &versions).unwrap(), "1999-05-05");
    }

    #[test]
    fn too_old_request_is_unsatisfiable() {
        let versions = keys(&["1999-05-05"]);
        let err = resolve_version("mock", "1998-01-01", &versions).unwrap_err();
        assert_eq!(
            err,
            ConfigError::UnsatisfiableVersion {
                service: "mock".into(),
                version: "1998-01-01".into(),
            }
        );
    }

    #[test]
    fn empty_registry_fails() {
        let err = resolve_version("mock", LATEST, &[]).unwrap_err();
        assert_eq!(err, ConfigError::NoVersions { service: "mock".into() });
    }

    #[test]
    fn date_values_normalize_to_iso() {
        let date = NaiveDate::from_ymd_opt(2000, 1, 1).unwrap();
        assert_eq!(ApiVersion::from(date).as_str(), "2000-01-01");
    }

    #[test]
    fn version_keys_are_validated_at_registration() {
        assert!(is_valid_version_key("2012-11-05"));
        assert!(is_valid_version_key("latest"));
        assert!(!is_valid_version_key("2012-13-05"));
        assert!(!is_valid_version_key("2012-1-5"));
        assert!(!is_valid_version_key("v2"));

        let catalog = Arc::new(InMemoryCatalog::new());
        let err = VersionRegistry::new("mock", ["2001-01-01", "v2"], catalog).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidVersion {
                service: "mock".into(),
                version: "v2".into(),
            }
        );
    }

    #[test]
    fn registry_memoizes_loaded_descriptors() {
        let catalog = Arc::new(CountingCatalog {
            inner: mock_catalog(&["1999-05-05", "2001-01-01"]),
            loads: AtomicUsize::new(0),
        });
        let registry =
            VersionRegistry::new("mock", ["2001-01-01", "1999-05-05"], catalog.clone()).unwrap();

        let first = registry.resolve(&"2000-06-01".into()).unwrap();
        let second = registry.resolve(&"1999-05-05".into()).unwrap();
        assert_eq!(first.version, "1999-05-05");
        assert!(Arc::ptr_eq(&first.api, &second.api));
        assert_eq!(first.api.api_version.as_deref(), Some("1999-05-05"));
        assert_eq!(catalog.loads.load(Ordering::SeqCst), 1);
        assert_eq!(registry.loaded_count(), 1);

        let newest = registry.resolve(&ApiVersion::latest()).unwrap();
        assert_eq!(newest.version, "2001-01-01");
        assert_eq!(catalog.loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn registry_surfaces_missing_catalog_entry() {
        let registry =
            VersionRegistry::new("mock", ["2001-01-01"], Arc::new(InMemoryCatalog::new())).unwrap();
        let err = registry.resolve(&ApiVersion::latest()).unwrap_err();
        assert_eq!(err.to_string(), "Could not find API configuration mock-2001-01-01");
    }

    fn iso_date() -> impl Strategy<Value = String> {
        (1990u32..2030, 1u32..=12, 1u32..=28).prop_map(|(y, m, d)| format!("{y:04}-{m:02}-{d:02}"))
    }

    proptest! {
        #[test]
        fn resolves_to_greatest_key_not_after_request(
            registered in prop::collection::vec(iso_date(), 1..12),
            requested in iso_date(),
        ) {
            let mut versions = registered.clone();
            versions.sort();
            versions.dedup();

            let expected = versions.iter().filter(|v| **v <= requested).max().cloned();
            match resolve_version("mock", &requested, &versions) {
                Ok(key) => prop_assert_eq!(Some(key), expected),
                Err(err) => {
                    prop_assert!(expected.is_none());
                    let is_unsatisfiable = matches!(err, ConfigError::UnsatisfiableVersion { .. });
                    prop_assert!(is_unsatisfiable);
                }
            }
        }

        #[test]
        fn latest_is_always_the_maximum(registered in prop::collection::vec(iso_date(), 1..12)) {
            let mut versions = registered.clone();
            versions.sort();
            versions.dedup();
            let newest = versions.last().cloned().unwrap();
            prop_assert_eq!(resolve_version("mock", LATEST, &versions).unwrap(), newest);
        }
    }
}

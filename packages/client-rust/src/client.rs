//! Client dispatcher: binds a service definition to an API version and
//! exposes its operations as an explicit table.
//!
//! Construction resolves everything that can fail (version, catalog entry)
//! up front, so a `Client` that exists can always build requests.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use cumulus_core::{
    resolve_endpoint, ApiDescriptor, ApiFormat, ApiVersion, ClientConfig, ConfigError,
    ConfigOverrides, Endpoint, ResolvedApi, RetryPolicy,
};
use serde_json::Value;
use tracing::debug;

use crate::bus::{EventBus, ListenerBus, ListenerSet, Phase};
use crate::definition::{CustomOperation, ServiceDefinition};
use crate::listeners::{core_listeners, VALIDATE_PARAMETERS};
use crate::request::{Request, RequestContext, RequestHandle, Response};
use crate::transport::{boxed, build_transport, BoxTransport, HttpClient, SharedTransport};

// ---------------------------------------------------------------------------
// DispatchError
// ---------------------------------------------------------------------------

/// Failure to route a call to an operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("Operation '{operation}' is not defined on {service}")]
    UnknownOperation { service: String, operation: String },
}

// ---------------------------------------------------------------------------
// ClientContext
// ---------------------------------------------------------------------------

/// Process-level collaborators shared by every client: default config, the
/// global event bus, per-format listener sets, and the base transport.
#[derive(Debug, Clone)]
pub struct ClientContext {
    defaults: ClientConfig,
    events: Arc<EventBus>,
    formats: HashMap<ApiFormat, Arc<ListenerSet>>,
    transport: SharedTransport,
}

impl ClientContext {
    #[must_use]
    pub fn new(defaults: ClientConfig, transport: BoxTransport) -> Self {
        Self {
            defaults,
            events: Arc::new(EventBus::new()),
            formats: HashMap::new(),
            transport: SharedTransport::new(transport),
        }
    }

    /// Context over the `reqwest` transport.
    #[must_use]
    pub fn http(defaults: ClientConfig) -> Self {
        Self::new(defaults, boxed(HttpClient::default()))
    }

    /// Shares an existing event bus instead of a private one.
    #[must_use]
    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    /// Registers the serialization listeners for one API format.
    #[must_use]
    pub fn with_format_listeners(mut self, format: ApiFormat, listeners: ListenerSet) -> Self {
        self.formats.insert(format, Arc::new(listeners));
        self
    }

    #[must_use]
    pub fn defaults(&self) -> &ClientConfig {
        &self.defaults
    }

    #[must_use]
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

#[derive(Clone)]
enum Operation {
    /// Synthesized from the bound descriptor.
    Api,
    Custom(Arc<dyn CustomOperation>),
}

/// A configured client of one service.
#[derive(Clone)]
pub struct Client {
    service: String,
    config: Arc<ClientConfig>,
    api: Option<ResolvedApi>,
    endpoint: Endpoint,
    operations: BTreeMap<String, Operation>,
    policy: RetryPolicy,
    core: Arc<ListenerSet>,
    format: Option<Arc<ListenerSet>>,
    service_listeners: Arc<ListenerSet>,
    events: Arc<EventBus>,
    client_listeners: Vec<Arc<ListenerSet>>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("service", &self.service)
            .field("api_version", &self.api_version())
            .field("endpoint", &self.endpoint)
            .field("operations", &self.operations.keys().collect::<Vec<_>>())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Constructs a client of `definition` with `overrides` merged over the
    /// context defaults.
    ///
    /// The API is chosen in order: the definition's pre-bound API, an inline
    /// `api_config`, nothing when the service has no registry, and otherwise
    /// the registry's resolution of the requested version.
    ///
    /// # Errors
    ///
    /// Returns the `ConfigError` raised by version resolution or catalog
    /// loading.
    pub fn new(
        ctx: &ClientContext,
        definition: &ServiceDefinition,
        overrides: &ConfigOverrides,
    ) -> Result<Self, ConfigError> {
        let service = definition.id().to_string();
        let config = ctx.defaults.merge(overrides);

        let api = if let Some(bound) = definition.bound_api() {
            Some(bound.clone())
        } else if let Some(inline) = &config.api_config {
            Some(ResolvedApi {
                version: inline
                    .api_version
                    .clone()
                    .unwrap_or_else(|| ApiVersion::latest().to_string()),
                api: Arc::clone(inline),
            })
        } else if let Some(registry) = definition.registry() {
            Some(registry.resolve(&config.requested_version(&service))?)
        } else {
            None
        };

        let endpoint = resolve_endpoint(
            config.endpoint.as_deref(),
            api.as_ref().map(|resolved| resolved.api.as_ref()),
            &config,
            &service,
        );

        let mut operations: BTreeMap<String, Operation> = definition
            .custom_operations()
            .map(|(name, op)| (name.clone(), Operation::Custom(Arc::clone(op))))
            .collect();
        if let Some(resolved) = &api {
            for name in resolved.api.operation_names() {
                operations
                    .entry(name.to_string())
                    .or_insert(Operation::Api);
            }
        }

        let transport = build_transport(ctx.transport.service(), &config);
        let mut core = core_listeners(transport);
        if !config.param_validation {
            core.remove(Phase::Validate, VALIDATE_PARAMETERS);
        }

        let format = api
            .as_ref()
            .and_then(|resolved| ctx.formats.get(&resolved.api.format))
            .cloned();
        let policy = config.retry_policy(definition.default_max_retries());

        debug!(
            service = %service,
            version = api.as_ref().map_or("none", |resolved| resolved.version.as_str()),
            endpoint = %endpoint,
            operations = operations.len(),
            "client constructed"
        );

        Ok(Self {
            service,
            config: Arc::new(config),
            api,
            endpoint,
            operations,
            policy,
            core: Arc::new(core),
            format,
            service_listeners: Arc::clone(definition.listeners()),
            events: Arc::clone(&ctx.events),
            client_listeners: Vec::new(),
        })
    }

    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The bound API version key, if any.
    #[must_use]
    pub fn api_version(&self) -> Option<&str> {
        self.api.as_ref().map(|resolved| resolved.version.as_str())
    }

    #[must_use]
    pub fn api(&self) -> Option<&Arc<ApiDescriptor>> {
        self.api.as_ref().map(|resolved| &resolved.api)
    }

    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Callable operation names, sorted.
    pub fn operation_names(&self) -> impl Iterator<Item = &str> {
        self.operations.keys().map(String::as_str)
    }

    #[must_use]
    pub fn has_operation(&self, name: &str) -> bool {
        self.operations.contains_key(name)
    }

    /// Re-binds the endpoint. Affects requests built afterwards.
    pub fn set_endpoint(&mut self, raw: &str) {
        let scheme = if self.config.ssl_enabled { "https" } else { "http" };
        self.endpoint = Endpoint::parse(raw, scheme);
    }

    /// Attaches listeners to every request this client builds afterwards,
    /// after the global set.
    pub fn add_listeners(&mut self, listeners: ListenerSet) {
        self.client_listeners.push(Arc::new(listeners));
    }

    /// Builds an unsent request for `operation` without consulting the
    /// operation table.
    #[must_use]
    pub fn make_request(&self, operation: &str, params: Value) -> Request {
        let mut bus = ListenerBus::new();
        bus.attach(Arc::clone(&self.core));
        if let Some(format) = &self.format {
            bus.attach(Arc::clone(format));
        }
        bus.attach(Arc::clone(&self.service_listeners));
        bus.attach(self.events.snapshot());
        for set in &self.client_listeners {
            bus.attach(Arc::clone(set));
        }

        let ctx = RequestContext::new(
            self.service.clone(),
            operation,
            self.api().cloned(),
            params,
            Arc::clone(&self.config),
            self.endpoint.clone(),
        );
        Request::new(ctx, bus, self.policy)
    }

    /// Builds an unsent request through the operation table.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::UnknownOperation` for a name not in the table,
    /// or the error of a hand-written operation.
    pub fn request(&self, operation: &str, params: Value) -> Result<Request, DispatchError> {
        match self.operations.get(operation) {
            Some(Operation::Api) => Ok(self.make_request(operation, params)),
            Some(Operation::Custom(custom)) => custom.build(self, params),
            None => Err(DispatchError::UnknownOperation {
                service: self.service.clone(),
                operation: operation.to_string(),
            }),
        }
    }

    /// Invokes `operation` and waits for its outcome.
    ///
    /// # Errors
    ///
    /// See [`Client::request`]. Failures of the request itself are carried
    /// in the returned [`Response`].
    pub async fn call(&self, operation: &str, params: Value) -> Result<Response, DispatchError> {
        Ok(self.request(operation, params)?.send().await)
    }

    /// Invokes `operation` on the tokio runtime, handing the outcome to
    /// `callback`.
    ///
    /// # Errors
    ///
    /// See [`Client::request`].
    pub fn invoke<F>(
        &self,
        operation: &str,
        params: Value,
        callback: F,
    ) -> Result<RequestHandle, DispatchError>
    where
        F: FnOnce(&Response) + Send + 'static,
    {
        Ok(self.request(operation, params)?.spawn(callback))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use cumulus_core::{ApiCatalog, ErrorKind, InMemoryCatalog, OperationDescriptor, RequestError};
    use http::StatusCode;
    use parking_lot::Mutex;
    use serde_json::json;

    use super::*;
    use crate::bus::handler_fn;
    use crate::transport::ScriptedTransport;

    fn catalog() -> Arc<dyn ApiCatalog> {
        let mut catalog = InMemoryCatalog::new();
        catalog.insert(
            "1999-05-05",
            ApiDescriptor::new("mock", ApiFormat::Json, "mockservice")
                .with_operation("oldOperation", OperationDescriptor::default()),
        );
        catalog.insert(
            "2001-01-01",
            ApiDescriptor::new("mock", ApiFormat::Json, "mockservice")
                .with_global_endpoint("mock.global.test")
                .with_operation(
                    "putThing",
                    OperationDescriptor {
                        required: vec!["Name".into()],
                        ..OperationDescriptor::default()
                    },
                )
                .with_operation("listThings", OperationDescriptor::default()),
        );
        Arc::new(catalog)
    }

    fn mock_service() -> ServiceDefinition {
        ServiceDefinition::define("mock", ["1999-05-05", "2001-01-01"], catalog()).unwrap()
    }

    fn context(transport: &ScriptedTransport) -> ClientContext {
        ClientContext::new(ClientConfig::default(), boxed(transport.clone()))
    }

    #[test]
    fn resolves_the_requested_version_at_construction() {
        let ctx = context(&ScriptedTransport::new());
        let overrides = ConfigOverrides::new().service_api_version("mock", "2000-01-01");
        let client = Client::new(&ctx, &mock_service(), &overrides).unwrap();

        assert_eq!(client.api_version(), Some("1999-05-05"));
        assert_eq!(client.operation_names().collect::<Vec<_>>(), vec!["oldOperation"]);
        assert_eq!(client.endpoint().host, "mockservice.us-east-1.amazonaws.com");
    }

    #[test]
    fn per_service_version_wins_over_global_version() {
        let ctx = context(&ScriptedTransport::new());
        let overrides = ConfigOverrides::new()
            .api_version("1999-12-31")
            .service_api_version("mock", "latest");
        let client = Client::new(&ctx, &mock_service(), &overrides).unwrap();
        assert_eq!(client.api_version(), Some("2001-01-01"));
    }

    #[test]
    fn unsatisfiable_version_fails_construction() {
        let ctx = context(&ScriptedTransport::new());
        let overrides = ConfigOverrides::new().api_version("1990-01-01");
        let err = Client::new(&ctx, &mock_service(), &overrides).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Could not find mock API to satisfy version constraint '1990-01-01'"
        );
    }

    #[test]
    fn empty_registry_and_missing_catalog_entry_fail_construction() {
        let ctx = context(&ScriptedTransport::new());

        let empty = ServiceDefinition::define("mock", Vec::<String>::new(), catalog()).unwrap();
        let err = Client::new(&ctx, &empty, &ConfigOverrides::new()).unwrap_err();
        assert_eq!(err.to_string(), "No clients defined on mock");

        let orphan = ServiceDefinition::define("mock", ["2005-05-05"], catalog()).unwrap();
        let err = Client::new(&ctx, &orphan, &ConfigOverrides::new()).unwrap_err();
        assert_eq!(err.to_string(), "Could not find API configuration mock-2005-05-05");
    }

    #[test]
    fn service_without_registry_has_no_operations() {
        let ctx = context(&ScriptedTransport::new());
        let client =
            Client::new(&ctx, &ServiceDefinition::new("bare"), &ConfigOverrides::new()).unwrap();
        assert!(client.api().is_none());
        assert_eq!(client.operation_names().count(), 0);
        assert_eq!(client.endpoint().host, "bare.us-east-1.amazonaws.com");
    }

    #[test]
    fn explicit_endpoint_overrides_global_and_regional() {
        let ctx = context(&ScriptedTransport::new());
        let client = Client::new(&ctx, &mock_service(), &ConfigOverrides::new()).unwrap();
        assert_eq!(client.endpoint().host, "mock.global.test");

        let overrides = ConfigOverrides::new().endpoint("localhost:4566").ssl_enabled(false);
        let mut client = Client::new(&ctx, &mock_service(), &overrides).unwrap();
        assert_eq!(client.endpoint().url(), "http://localhost:4566");

        client.set_endpoint("https://other.test");
        assert_eq!(client.endpoint().host, "other.test");
        assert_eq!(client.endpoint().port, 443);
    }

    #[test]
    fn inline_api_config_bypasses_the_registry() {
        let ctx = context(&ScriptedTransport::new());
        let inline = ApiDescriptor::new("mock", ApiFormat::RestJson, "inline")
            .with_operation("operationName", OperationDescriptor::default());
        // A constraint the registry cannot satisfy proves it is never consulted.
        let overrides = ConfigOverrides::new().api_config(inline).api_version("1900-01-01");

        let definition = mock_service();
        let client = Client::new(&ctx, &definition, &overrides).unwrap();
        assert_eq!(client.operation_names().collect::<Vec<_>>(), vec!["operationName"]);
        assert_eq!(client.api_version(), Some("latest"));
        assert_eq!(definition.registry().unwrap().loaded_count(), 0);
    }

    #[test]
    fn pre_bound_definition_is_used_as_is() {
        let ctx = context(&ScriptedTransport::new());
        let bound = mock_service().define_api(ApiVersion::from("1999-05-05")).unwrap();
        let overrides = ConfigOverrides::new().api_version("latest");

        let client = Client::new(&ctx, &bound, &overrides).unwrap();
        assert_eq!(client.api_version(), Some("1999-05-05"));
    }

    #[test]
    fn construction_is_idempotent() {
        let ctx = context(&ScriptedTransport::new());
        let overrides = ConfigOverrides::new().region("ap-south-1").api_version("2002-02-02");
        let definition = mock_service();

        let first = Client::new(&ctx, &definition, &overrides).unwrap();
        let second = Client::new(&ctx, &definition, &overrides).unwrap();
        assert_eq!(first.endpoint(), second.endpoint());
        assert_eq!(first.api_version(), second.api_version());
        assert_eq!(definition.registry().unwrap().loaded_count(), 1);
    }

    #[test]
    fn custom_operations_shadow_synthesized_ones() {
        let ctx = context(&ScriptedTransport::new());
        let definition = mock_service().with_custom_operation(
            "listThings",
            |client: &Client, _params: Value| {
                Ok(client.make_request("listThings", json!({ "Limit": 10 })))
            },
        );
        let client = Client::new(&ctx, &definition, &ConfigOverrides::new()).unwrap();

        let request = client.request("listThings", json!({})).unwrap();
        assert_eq!(request.context().params, json!({ "Limit": 10 }));
        assert!(client.has_operation("putThing"));
    }

    #[test]
    fn retry_budget_precedence() {
        let ctx = context(&ScriptedTransport::new());
        let definition = mock_service().with_default_max_retries(7);

        let client = Client::new(&ctx, &definition, &ConfigOverrides::new()).unwrap();
        assert_eq!(client.retry_policy().max_retries, 7);

        let client =
            Client::new(&ctx, &definition, &ConfigOverrides::new().max_retries(1)).unwrap();
        assert_eq!(client.retry_policy().max_retries, 1);

        let client = Client::new(&ctx, &mock_service(), &ConfigOverrides::new()).unwrap();
        assert_eq!(client.retry_policy().max_retries, 3);
    }

    #[tokio::test]
    async fn unknown_operation_is_a_dispatch_error() {
        let ctx = context(&ScriptedTransport::new());
        let client = Client::new(&ctx, &mock_service(), &ConfigOverrides::new()).unwrap();
        let err = client.call("deleteEverything", json!({})).await.unwrap_err();
        assert_eq!(err.to_string(), "Operation 'deleteEverything' is not defined on mock");
    }

    #[tokio::test(start_paused = true)]
    async fn validation_failures_are_not_retried() {
        let transport = ScriptedTransport::new().respond(StatusCode::OK, "{}");
        let client =
            Client::new(&context(&transport), &mock_service(), &ConfigOverrides::new()).unwrap();

        let response = client.call("putThing", json!({})).await.unwrap();
        let error = response.error().unwrap();
        assert_eq!(error.kind, ErrorKind::Validation);
        assert!(!error.retryable);
        assert_eq!(response.retry_count, 0);
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn validation_failures_skip_retry_listeners() {
        let transport = ScriptedTransport::new().respond(StatusCode::OK, "{}");
        let seen = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&seen);
        let mut client =
            Client::new(&context(&transport), &mock_service(), &ConfigOverrides::new()).unwrap();
        client.add_listeners(ListenerSet::new("force").with(
            Phase::Retry,
            "force",
            handler_fn(move |ctx| {
                *counter.lock() += 1;
                if let Some(error) = ctx.error.as_mut() {
                    error.retryable = true;
                }
                Ok(())
            }),
        ));

        let started = tokio::time::Instant::now();
        let response = client.call("putThing", json!({})).await.unwrap();

        let error = response.error().unwrap();
        assert_eq!(error.kind, ErrorKind::Validation);
        assert!(!error.retryable);
        assert_eq!(error.retry_count, 0);
        assert_eq!(response.retry_count, 0);
        assert!(response.retry_delays.is_empty());
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(*seen.lock(), 0);
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn disabling_param_validation_removes_the_validator() {
        let transport = ScriptedTransport::new().respond(StatusCode::OK, "{}");
        let overrides = ConfigOverrides::new().param_validation(false);
        let client = Client::new(&context(&transport), &mock_service(), &overrides).unwrap();

        let response = client.call("putThing", Value::Null).await.unwrap();
        assert!(response.is_success());
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn listener_sets_run_in_layer_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let recorder = |label: &'static str| {
            let log = Arc::clone(&log);
            handler_fn(move |_ctx| {
                log.lock().push(label);
                Ok(())
            })
        };

        let events = Arc::new(EventBus::new());
        events.on(Phase::Sign, "global", recorder("global"));
        let transport = ScriptedTransport::new().respond(StatusCode::OK, "{}");
        let ctx = context(&transport)
            .with_event_bus(Arc::clone(&events))
            .with_format_listeners(
                ApiFormat::Json,
                ListenerSet::new("json").with(Phase::Sign, "format", recorder("format")),
            );
        let definition = mock_service().with_listeners(ListenerSet::new("mock").with(
            Phase::Sign,
            "service",
            recorder("service"),
        ));

        let mut client = Client::new(&ctx, &definition, &ConfigOverrides::new()).unwrap();
        client.add_listeners(ListenerSet::new("client").with(
            Phase::Sign,
            "client",
            recorder("client"),
        ));

        let mut request = client.request("listThings", json!({})).unwrap();
        request.on(Phase::Sign, "request", recorder("request"));
        // Registered after the request snapshotted the global set.
        events.on(Phase::Sign, "late", recorder("late"));

        assert!(request.send().await.is_success());
        assert_eq!(*log.lock(), vec!["format", "service", "global", "client", "request"]);
    }

    #[tokio::test(start_paused = true)]
    async fn invoke_delivers_exactly_one_outcome_to_the_callback() {
        let transport = ScriptedTransport::new()
            .respond(StatusCode::INTERNAL_SERVER_ERROR, "")
            .respond(StatusCode::OK, "{}");
        let ctx = context(&transport).with_format_listeners(
            ApiFormat::Json,
            ListenerSet::new("json").with(
                Phase::ExtractData,
                "parse",
                handler_fn(|ctx| {
                    let status = ctx.http_response.as_ref().map(|r| r.status.as_u16());
                    ctx.data = Some(json!({ "status": status }));
                    Ok(())
                }),
            ),
        );
        let client = Client::new(&ctx, &mock_service(), &ConfigOverrides::new()).unwrap();

        let seen: Arc<Mutex<Vec<(Option<Value>, Option<RequestError>)>>> =
            Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handle = client
            .invoke("listThings", json!({}), move |response| {
                sink.lock()
                    .push((response.data().cloned(), response.error().cloned()));
            })
            .unwrap();

        let response = handle.join().await.unwrap();
        assert_eq!(response.retry_count, 1);
        assert_eq!(response.retry_delays, vec![Duration::from_millis(30)]);
        assert_eq!(*seen.lock(), vec![(Some(json!({ "status": 200 })), None)]);
    }
}

//! Invokes one operation of a catalogued service and prints the outcome.
//!
//! ```sh
//! cumulus-call --catalog ./apis sqs listQueues --params '{"QueueNamePrefix":"jobs"}'
//! ```
//!
//! Requests and responses are plain JSON bodies; no signing is applied.
//! Logging is controlled with `RUST_LOG`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use clap::Parser;
use cumulus_client::{handler_fn, Client, ClientContext, ListenerSet, Phase, ServiceDefinition};
use cumulus_core::{ApiFormat, ClientConfig, ConfigOverrides, ErrorKind, FsCatalog, RequestError};
use http::header::{HeaderValue, CONTENT_TYPE};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cumulus-call", version)]
struct Cli {
    /// Directory of `{service}-{version}.json` API descriptors.
    #[arg(long, env = "CUMULUS_CATALOG", default_value = "apis")]
    catalog: PathBuf,

    /// Service identifier.
    service: String,

    /// Operation name.
    operation: String,

    /// Operation parameters as a JSON object.
    #[arg(long, default_value = "{}")]
    params: String,

    #[arg(long)]
    region: Option<String>,

    /// Endpoint override (`host`, `host:port` or `scheme://host[:port]`).
    #[arg(long)]
    endpoint: Option<String>,

    /// API version constraint (`YYYY-MM-DD` or `latest`).
    #[arg(long)]
    api_version: Option<String>,

    #[arg(long)]
    max_retries: Option<u32>,

    #[arg(long)]
    no_param_validation: bool,

    /// Use plain HTTP for derived endpoints.
    #[arg(long)]
    no_ssl: bool,

    /// Per-round-trip timeout in seconds.
    #[arg(long)]
    timeout_secs: Option<u64>,
}

#[derive(Serialize)]
struct Outcome<'a> {
    request_id: &'a str,
    operation: &'a str,
    retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a RequestError>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    let params: Value = serde_json::from_str(&cli.params).context("--params is not valid JSON")?;

    let catalog = FsCatalog::new(&cli.catalog);
    let versions = catalog
        .versions_for(&cli.service)
        .with_context(|| format!("failed to list catalog {}", cli.catalog.display()))?;
    let definition =
        ServiceDefinition::define(cli.service.clone(), versions, Arc::new(catalog))?;

    let mut ctx = ClientContext::http(ClientConfig::from_env());
    for format in ApiFormat::ALL {
        ctx = ctx.with_format_listeners(format, json_listeners());
    }

    let client = Client::new(&ctx, &definition, &overrides(&cli))?;
    tracing::info!(
        service = client.service(),
        version = client.api_version().unwrap_or("none"),
        endpoint = %client.endpoint(),
        "client ready"
    );

    let response = client.call(&cli.operation, params).await?;
    let outcome = Outcome {
        request_id: &response.request_id,
        operation: &response.operation,
        retry_count: response.retry_count,
        data: response.data(),
        error: response.error(),
    };
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    if let Some(error) = response.error() {
        bail!("{error}");
    }
    Ok(())
}

fn init_logging() {
    let default_level = "warn";
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(default_level))
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

fn overrides(cli: &Cli) -> ConfigOverrides {
    let mut overrides = ConfigOverrides::new()
        .param_validation(!cli.no_param_validation)
        .ssl_enabled(!cli.no_ssl);
    if let Some(region) = &cli.region {
        overrides = overrides.region(region.clone());
    }
    if let Some(endpoint) = &cli.endpoint {
        overrides = overrides.endpoint(endpoint.clone());
    }
    if let Some(version) = &cli.api_version {
        overrides = overrides.service_api_version(cli.service.clone(), version.as_str());
    }
    if let Some(max_retries) = cli.max_retries {
        overrides = overrides.max_retries(max_retries);
    }
    if let Some(secs) = cli.timeout_secs {
        overrides = overrides.http_timeout(Duration::from_secs(secs));
    }
    overrides
}

/// Plain JSON bodies in both directions. Errors are read from `code` (or
/// `__type`) and `message` members.
fn json_listeners() -> ListenerSet {
    ListenerSet::new("json")
        .with(
            Phase::Build,
            "JSON_BODY",
            handler_fn(|ctx| {
                let body = serde_json::to_vec(&ctx.params).map_err(serialization_error)?;
                ctx.http_request.body = Bytes::from(body);
                ctx.http_request
                    .headers
                    .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                Ok(())
            }),
        )
        .with(
            Phase::ExtractData,
            "JSON_DATA",
            handler_fn(|ctx| {
                let body = ctx
                    .http_response
                    .as_ref()
                    .map(|r| r.body.clone())
                    .unwrap_or_default();
                if body.is_empty() {
                    ctx.data = Some(Value::Object(Map::new()));
                    return Ok(());
                }
                let data = serde_json::from_slice(&body).map_err(serialization_error)?;
                ctx.data = Some(data);
                Ok(())
            }),
        )
        .with(
            Phase::ExtractError,
            "JSON_ERROR",
            handler_fn(|ctx| {
                let Some(response) = ctx.http_response.as_ref() else {
                    return Ok(());
                };
                let status = response.status.as_u16();
                let body: Value = serde_json::from_slice(&response.body).unwrap_or(Value::Null);
                let code = body
                    .get("code")
                    .or_else(|| body.get("__type"))
                    .and_then(Value::as_str)
                    .map_or_else(
                        || "UnknownError".to_string(),
                        |code| code.rsplit('#').next().unwrap_or(code).to_string(),
                    );
                let message = body
                    .get("message")
                    .and_then(Value::as_str)
                    .or_else(|| response.status.canonical_reason())
                    .unwrap_or("Unknown")
                    .to_string();
                ctx.error = Some(RequestError::service(status, code, message));
                Ok(())
            }),
        )
}

fn serialization_error(err: serde_json::Error) -> RequestError {
    RequestError::new(ErrorKind::Handler, "SerializationError", err.to_string())
}

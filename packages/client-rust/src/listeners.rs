//! Core listener set attached first to every request.
//!
//! Format-agnostic: it validates parameters against the operation
//! descriptor, routes the HTTP request, and hands it to the transport.
//! Serialization, signing and response parsing belong to the per-format and
//! per-service sets.

use std::sync::Arc;

use async_trait::async_trait;
use cumulus_core::{ErrorKind, RequestError};
use http::header::{HeaderValue, USER_AGENT};
use http::Method;
use serde_json::Value;

use crate::bus::{handler_fn, ListenerSet, Phase, PhaseHandler};
use crate::request::RequestContext;
use crate::transport::SharedTransport;

/// Name of the parameter validation listener, removed when
/// `param_validation` is off.
pub const VALIDATE_PARAMETERS: &str = "VALIDATE_PARAMETERS";
pub const BUILD_ROUTE: &str = "BUILD_ROUTE";
pub const SEND_REQUEST: &str = "SEND_REQUEST";

/// `User-Agent` sent with every request.
pub const USER_AGENT_VALUE: &str = concat!("cumulus/", env!("CARGO_PKG_VERSION"));

/// Builds the core set around one client's transport.
#[must_use]
pub fn core_listeners(transport: SharedTransport) -> ListenerSet {
    ListenerSet::new("core")
        .with(Phase::Validate, VALIDATE_PARAMETERS, handler_fn(validate_parameters))
        .with(Phase::Build, BUILD_ROUTE, handler_fn(build_route))
        .with(Phase::Send, SEND_REQUEST, Arc::new(SendHandler { transport }))
}

/// Params must be an object holding every required member of the operation.
fn validate_parameters(ctx: &mut RequestContext) -> Result<(), RequestError> {
    let Value::Object(params) = &ctx.params else {
        return Err(RequestError::validation(format!(
            "Expected params to be an object, got {}",
            json_type(&ctx.params)
        )));
    };

    let Some(operation) = ctx.operation_descriptor() else {
        return Ok(());
    };
    let missing: Vec<&str> = operation
        .required
        .iter()
        .filter(|key| params.get(key.as_str()).is_none_or(Value::is_null))
        .map(String::as_str)
        .collect();

    match missing.as_slice() {
        [] => Ok(()),
        [key] => Err(RequestError::validation(format!(
            "Missing required key '{key}' in params"
        ))),
        keys => Err(RequestError::validation(format!(
            "Missing required keys {} in params",
            keys.iter().map(|k| format!("'{k}'")).collect::<Vec<_>>().join(", ")
        ))),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn build_route(ctx: &mut RequestContext) -> Result<(), RequestError> {
    if let Some(operation) = ctx.operation_descriptor() {
        let method = Method::from_bytes(operation.http_method.as_bytes()).map_err(|_| {
            RequestError::new(
                ErrorKind::Handler,
                "InvalidOperation",
                format!("Invalid HTTP method '{}' for {}", operation.http_method, ctx.operation),
            )
        })?;
        let path = operation.http_path.clone();
        ctx.http_request.method = method;
        ctx.http_request.path = path;
    }
    ctx.http_request
        .headers
        .insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));
    Ok(())
}

/// Sends the built request. The only phase that suspends on I/O.
struct SendHandler {
    transport: SharedTransport,
}

#[async_trait]
impl PhaseHandler for SendHandler {
    async fn handle(&self, ctx: &mut RequestContext) -> Result<(), RequestError> {
        let response = self.transport.send(ctx.http_request.clone()).await?;
        ctx.http_response = Some(response);
        Ok(())
    }
}

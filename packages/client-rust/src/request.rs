//! Request lifecycle state machine.
//!
//! Each attempt walks `validate -> build -> sign -> send`, then runs
//! `extractError` when the response status is >= 300 or `extractData`
//! otherwise. Any failure ends the attempt and goes to the retry decision:
//! the `retry` listeners see the error, the [`RetryPolicy`] decides, and a
//! retried request restarts at `validate` with a freshly built HTTP request
//! and pristine parameters. The `complete` listeners run exactly once, with
//! either data or the final error.
//!
//! Suspension happens only while sending and during backoff. A request is
//! driven by exactly one task; retries are sequential re-entries.

use std::sync::Arc;
use std::time::Duration;

use cumulus_core::{
    ApiDescriptor, ClientConfig, Endpoint, ErrorKind, OperationDescriptor, RequestError,
    RetryPolicy,
};
use serde_json::{Map, Value};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::bus::{ListenerBus, ListenerSet, Phase, PhaseHandler};
use crate::http::{HttpRequest, HttpResponse};

// ---------------------------------------------------------------------------
// RequestContext
// ---------------------------------------------------------------------------

/// Mutable state handed to every listener.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub service: String,
    pub operation: String,
    /// Descriptor of the client's bound API, if any.
    pub api: Option<Arc<ApiDescriptor>>,
    /// Operation parameters, reset to the caller's original value each attempt.
    pub params: Value,
    pub config: Arc<ClientConfig>,
    pub endpoint: Endpoint,
    /// Zero-based attempt index (equals retries so far).
    pub attempt: u32,
    pub http_request: HttpRequest,
    pub http_response: Option<HttpResponse>,
    pub data: Option<Value>,
    pub error: Option<RequestError>,
}

impl RequestContext {
    #[must_use]
    pub fn new(
        service: impl Into<String>,
        operation: impl Into<String>,
        api: Option<Arc<ApiDescriptor>>,
        params: Value,
        config: Arc<ClientConfig>,
        endpoint: Endpoint,
    ) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            service: service.into(),
            operation: operation.into(),
            api,
            params,
            config,
            http_request: HttpRequest::new(endpoint.clone()),
            endpoint,
            attempt: 0,
            http_response: None,
            data: None,
            error: None,
        }
    }

    /// Descriptor of the operation being invoked.
    #[must_use]
    pub fn operation_descriptor(&self) -> Option<&OperationDescriptor> {
        self.api.as_deref().and_then(|api| api.operation(&self.operation))
    }

    fn begin_attempt(&mut self, attempt: u32, params: &Value) {
        self.attempt = attempt;
        self.params = params.clone();
        self.http_request = HttpRequest::new(self.endpoint.clone());
        self.http_response = None;
        self.data = None;
        self.error = None;
    }
}

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

/// Timing of one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptTiming {
    pub attempt: u32,
    pub started_at: Instant,
    pub elapsed: Duration,
}

/// Terminal outcome of a request.
#[derive(Debug, Clone)]
pub struct Response {
    pub request_id: String,
    pub operation: String,
    /// Exactly one of data or error.
    pub result: Result<Value, RequestError>,
    /// Retries performed before the terminal outcome.
    pub retry_count: u32,
    /// Backoff delays waited between attempts, in order.
    pub retry_delays: Vec<Duration>,
    pub attempts: Vec<AttemptTiming>,
    /// Response of the last attempt, if one was received.
    pub http_response: Option<HttpResponse>,
}

impl Response {
    #[must_use]
    pub fn data(&self) -> Option<&Value> {
        self.result.as_ref().ok()
    }

    #[must_use]
    pub fn error(&self) -> Option<&RequestError> {
        self.result.as_ref().err()
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// One operation invocation. Sending consumes it, so a request runs at most
/// once.
pub struct Request {
    ctx: RequestContext,
    params: Value,
    bus: ListenerBus,
    local: ListenerSet,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("request_id", &self.ctx.request_id)
            .field("service", &self.ctx.service)
            .field("operation", &self.ctx.operation)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Request {
    /// Creates an unsent request. `Value::Null` params become `{}`.
    #[must_use]
    pub fn new(mut ctx: RequestContext, bus: ListenerBus, policy: RetryPolicy) -> Self {
        if ctx.params.is_null() {
            ctx.params = Value::Object(Map::new());
        }
        let params = ctx.params.clone();
        Self {
            ctx,
            params,
            bus,
            local: ListenerSet::new("request"),
            policy,
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn context(&self) -> &RequestContext {
        &self.ctx
    }

    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Adds a listener for this request only; it runs after all others.
    pub fn on(
        &mut self,
        phase: Phase,
        name: impl Into<std::borrow::Cow<'static, str>>,
        handler: Arc<dyn PhaseHandler>,
    ) -> &mut Self {
        self.local.on(phase, name, handler);
        self
    }

    /// Token that aborts the request at the next phase boundary or during
    /// backoff.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs the request to completion.
    pub async fn send(self) -> Response {
        self.run().await
    }

    /// Runs the request and hands the outcome to `callback` before returning it.
    pub async fn send_with<F>(self, callback: F) -> Response
    where
        F: FnOnce(&Response),
    {
        let response = self.run().await;
        callback(&response);
        response
    }

    /// Runs the request on the tokio runtime. Must be called from within a
    /// runtime.
    pub fn spawn<F>(self, callback: F) -> RequestHandle
    where
        F: FnOnce(&Response) + Send + 'static,
    {
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(self.send_with(callback));
        RequestHandle { handle, cancel }
    }

    async fn run(mut self) -> Response {
        if !self.local.is_empty() {
            let local = std::mem::take(&mut self.local);
            self.bus.attach(Arc::new(local));
        }

        let span = info_span!(
            "request",
            service = %self.ctx.service,
            operation = %self.ctx.operation,
            request_id = %self.ctx.request_id,
        );

        async move {
            let started = Instant::now();
            let mut retry_count = 0;
            let mut retry_delays = Vec::new();
            let mut attempts = Vec::new();

            let result = loop {
                self.ctx.begin_attempt(retry_count, &self.params);
                let attempt_started = Instant::now();
                let outcome = self.run_attempt().await;
                attempts.push(AttemptTiming {
                    attempt: retry_count,
                    started_at: attempt_started,
                    elapsed: attempt_started.elapsed(),
                });

                let mut error = match outcome {
                    Ok(data) => break Ok(data),
                    Err(error) => error,
                };
                let policy_retryable = self.policy.is_retryable(&error);
                error.retryable = policy_retryable;
                error.retry_count = retry_count;
                if matches!(error.kind, ErrorKind::Validation | ErrorKind::Aborted) {
                    break Err(error);
                }

                self.ctx.error = Some(error.clone());
                if let Err(handler_error) = self.bus.invoke(Phase::Retry, &mut self.ctx).await {
                    self.ctx.error = Some(handler_error);
                }
                if let Some(updated) = self.ctx.error.take() {
                    error = updated;
                }
                // Retry listeners may veto a retry, never force one.
                error.retryable &= policy_retryable;

                if !error.retryable || !self.policy.has_budget(retry_count) {
                    break Err(error);
                }

                let delay = self.policy.delay_for_attempt(retry_count);
                warn!(
                    attempt = retry_count,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    code = %error.code,
                    "retrying request"
                );
                retry_delays.push(delay);

                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    () = self.cancel.cancelled() => break Err(RequestError::aborted()),
                }
                retry_count += 1;
            };

            let result = result.map_err(|mut error| {
                error.retry_count = retry_count;
                error
            });

            match &result {
                Ok(data) => {
                    self.ctx.data = Some(data.clone());
                    self.ctx.error = None;
                }
                Err(error) => {
                    self.ctx.data = None;
                    self.ctx.error = Some(error.clone());
                }
            }
            if let Err(error) = self.bus.invoke(Phase::Complete, &mut self.ctx).await {
                warn!(code = %error.code, "complete listener failed: {}", error.message);
            }

            let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            let outcome = if result.is_ok() { "ok" } else { "error" };
            info!(outcome, retry_count, duration_ms, "request complete");

            Response {
                request_id: self.ctx.request_id.clone(),
                operation: self.ctx.operation.clone(),
                result,
                retry_count,
                retry_delays,
                attempts,
                http_response: self.ctx.http_response.take(),
            }
        }
        .instrument(span)
        .await
    }

    fn check_cancelled(&self) -> Result<(), RequestError> {
        if self.cancel.is_cancelled() {
            Err(RequestError::aborted())
        } else {
            Ok(())
        }
    }

    async fn run_attempt(&mut self) -> Result<Value, RequestError> {
        for phase in Phase::ATTEMPT {
            self.check_cancelled()?;
            debug!(phase = %phase, attempt = self.ctx.attempt, "entering phase");
            self.bus.invoke(phase, &mut self.ctx).await?;
        }
        self.check_cancelled()?;

        let Some(status) = self.ctx.http_response.as_ref().map(|r| r.status) else {
            return Err(RequestError::networking("no HTTP response received"));
        };

        if status.as_u16() >= 300 {
            debug!(phase = %Phase::ExtractError, status = status.as_u16(), "entering phase");
            self.bus
                .invoke(Phase::ExtractError, &mut self.ctx)
                .await
                .map_err(|mut error| {
                    error.status_code.get_or_insert(status.as_u16());
                    error
                })?;
            let mut error = self.ctx.error.take().unwrap_or_else(|| {
                let reason = status.canonical_reason().unwrap_or("Unknown");
                RequestError::service(status.as_u16(), "UnknownError", reason)
            });
            error.status_code.get_or_insert(status.as_u16());
            Err(error)
        } else {
            debug!(phase = %Phase::ExtractData, status = status.as_u16(), "entering phase");
            self.bus.invoke(Phase::ExtractData, &mut self.ctx).await?;
            Ok(self
                .ctx
                .data
                .take()
                .unwrap_or_else(|| Value::Object(Map::new())))
        }
    }
}

// ---------------------------------------------------------------------------
// RequestHandle
// ---------------------------------------------------------------------------

/// Handle to a spawned request.
#[derive(Debug)]
pub struct RequestHandle {
    handle: JoinHandle<Response>,
    cancel: CancellationToken,
}

impl RequestHandle {
    /// Requests cancellation; the request completes with `RequestAbortedError`
    /// at its next phase boundary or backoff.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits for the terminal response.
    ///
    /// # Errors
    ///
    /// Returns a `JoinError` if the request task panicked.
    pub async fn join(self) -> Result<Response, JoinError> {
        self.handle.await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

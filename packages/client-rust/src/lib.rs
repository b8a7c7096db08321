//! `Cumulus` Client: listener bus, request lifecycle and retry loop, and the
//! client dispatcher that binds services to versioned API descriptors.

pub mod bus;
pub mod client;
pub mod definition;
pub mod http;
pub mod listeners;
pub mod request;
pub mod transport;

pub use bus::{handler_fn, EventBus, ListenerBus, ListenerSet, Phase, PhaseHandler};
pub use client::{Client, ClientContext, DispatchError};
pub use definition::{ApiSource, CustomOperation, ServiceDefinition};
pub use self::http::{HttpRequest, HttpResponse};
pub use request::{AttemptTiming, Request, RequestContext, RequestHandle, Response};
pub use transport::{BoxTransport, HttpClient, ScriptedTransport, SharedTransport, TransportError};

//! Tower middleware layers for the transport.
//!
//! - [`timeout`]: Per-round-trip timeout enforcement
//! - [`metrics`]: Round-trip timing via `tracing` spans
//! - [`pipeline`]: Composes all layers around a client's transport

pub mod metrics;
pub mod pipeline;
pub mod timeout;

pub use metrics::MetricsLayer;
pub use pipeline::build_transport;
pub use timeout::TimeoutLayer;

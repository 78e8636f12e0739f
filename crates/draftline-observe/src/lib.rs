//! Observability setup for Draftline: structured logging through
//! `tracing-subscriber` with an optional OpenTelemetry span bridge.

pub mod tracing_setup;

pub use tracing_setup::{LogFormat, TracingOptions, init_tracing, shutdown_tracing};

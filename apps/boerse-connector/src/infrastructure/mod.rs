//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Boerse Frankfurt HTTP adapters (connector, bootstrap, event streams).
pub mod boerse;

/// Endpoint, timeout and salt configuration.
pub mod config;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Tracing subscriber and OpenTelemetry setup.
pub mod telemetry;

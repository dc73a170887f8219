//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Broker WebSocket session (Socket.IO framing, auth, reconnection).
pub mod upstream;

/// Downstream subscriber fan-out.
pub mod broadcast;

/// Configuration loading.
pub mod config;

/// HTTP API and downstream WebSocket endpoint.
pub mod http;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;

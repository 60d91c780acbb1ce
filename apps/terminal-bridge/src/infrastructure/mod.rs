//! Infrastructure Layer - Adapters and external integrations.
//!
//! Wire protocol, terminal sockets and the operational surface around them.

/// Frame codec, field conversions and wire transforms.
pub mod protocol;

/// Socket connection, command client and retry policy.
pub mod terminal;

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;

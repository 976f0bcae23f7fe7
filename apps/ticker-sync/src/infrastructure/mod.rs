//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete implementations of the application ports plus the upstream
//! exchange clients and the service's operational surface.

/// Korbit REST and WebSocket adapters.
pub mod korbit;

/// Bookmark store adapters (in-memory, JSON file).
pub mod bookmarks;

/// Configuration from environment variables.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;

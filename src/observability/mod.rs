//! # Observability
//!
//! Prometheus metrics collection. Tracing is configured in `main`.

pub mod metrics;

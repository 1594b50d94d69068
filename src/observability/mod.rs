//! # Observability
//!
//! Prometheus metrics for the controller. Logging goes through `tracing` and is
//! configured at startup in [`crate::runtime::initialization`].

pub mod metrics;

pub use metrics::*;

//! # Runtime
//!
//! Process wiring around the reconciler.
//!
//! - `initialization`: TLS provider, tracing, metrics, HTTP server and client setup
//! - `error_policy`: backoff for failed reconciliations and watch stream errors
//! - `watch_loop`: the `kube_runtime::Controller` loop with restart on stream errors

pub mod error_policy;
pub mod initialization;
pub mod watch_loop;

//! # Controller
//!
//! - `parser`: label queries, namespace resolution, binding expansion and object naming
//! - `reconciler`: the per-rule state machine
//! - `store`: typed object access against the API server or memory
//! - `backoff`: exponential backoff for failed passes
//! - `server`: metrics and probe endpoints

pub mod backoff;
pub mod parser;
pub mod reconciler;
pub mod server;
pub mod store;

//! # Custom Resource Definitions
//!
//! The `RBACRule` resource and its admission logic.
//!
//! - `spec`: desired state (bindings, subjects, namespace selection, time window)
//! - `status`: observed state (phase, conditions, owned binding identifiers)
//! - `admission`: defaulting and validation shared by the webhook and the reconciler

pub mod admission;
mod spec;
mod status;

pub use spec::*;
pub use status::*;

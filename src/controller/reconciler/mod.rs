//! # Reconciler
//!
//! Core reconciliation logic for `RBACRule` resources.
//!
//! The reconciler:
//! - Attaches a cleanup finalizer to every rule
//! - Defaults and validates the rule's spec
//! - Holds rules back until `startTime` and deletes them after `endTime`
//! - Expands every binding and upserts the generated Namespaces, ServiceAccounts,
//!   RoleBindings and ClusterRoleBindings
//! - Records generated bindings in status as they are applied
//! - Sweeps all generated objects before releasing a deleted rule
//!
//! Failures on generated objects requeue the pass after a short fixed delay; failures
//! on the rule itself are returned to the error policy.

pub mod reconcile;
pub mod status;
pub mod types;

pub use reconcile::{reconcile, reconcile_at, ApplyOutcome};
pub use types::{BackoffState, Reconciler, ReconcilerError};

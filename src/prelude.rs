//! # Prelude
//!
//! Re-exports commonly used types and traits for convenience.
//!
//! ```rust
//! use rbac_rule_controller::prelude::*;
//! ```

// CRD types
pub use crate::crd::*;

// Reconciler types
pub use crate::controller::reconciler::{
    reconcile, reconcile_at, ApplyOutcome, BackoffState, Reconciler, ReconcilerError,
};

// Expansion
pub use crate::controller::parser::{expand_binding, Expansion, ExpansionError, Ownership};

// Object stores
pub use crate::controller::store::{KubeStore, ObjectStore, StoreError};
#[cfg(any(test, feature = "test-util"))]
pub use crate::controller::store::InMemoryStore;

// Config types
pub use crate::config::{ControllerConfig, LogFormat};

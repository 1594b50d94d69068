//! RBACRule Controller Library
//!
//! Namespace resolution, binding expansion and the reconciliation state machine
//! behind the `rbac-rule-controller` binary.
//!
//! ## Quick Start
//!
//! ```rust
//! use rbac_rule_controller::prelude::*;
//! ```

pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod observability;
pub mod prelude;
pub mod runtime;

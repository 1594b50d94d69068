//! # Status Management
//!
//! Writes RBACRule status: the lifecycle phase with its `Ready` condition, and the
//! inventory of generated bindings used for cleanup bookkeeping.

mod inventory;
mod phase;

pub use inventory::{cluster_role_binding_id, forget, record, role_binding_id, Inventory};
pub use phase::set_phase;

use crate::controller::reconciler::types::{Reconciler, ReconcilerError};
use crate::controller::store::ObjectStore;
use crate::crd::RBACRule;
use kube::ResourceExt;

/// Persist `rule.status`, refreshing `rule` with the stored object
pub async fn write_status<S: ObjectStore>(
    ctx: &Reconciler<S>,
    rule: &mut RBACRule,
) -> Result<(), ReconcilerError> {
    *rule = ctx
        .store
        .replace_status(rule)
        .await
        .map_err(|source| ReconcilerError::Status {
            name: rule.name_any(),
            source,
        })?;
    Ok(())
}

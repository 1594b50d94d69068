//! # Binding Inventory
//!
//! `status.roleBindings` and `status.clusterRoleBindings` list the bindings a rule
//! currently owns. Entries are added right after a binding is applied and removed
//! right after it is deleted, each change written immediately so a crash mid-pass
//! never loses track of an object.

use super::write_status;
use crate::controller::reconciler::types::{Reconciler, ReconcilerError};
use crate::controller::store::ObjectStore;
use crate::crd::{RBACRule, RBACRuleStatus};
use std::collections::BTreeSet;
use tracing::debug;

/// Which status set an identifier belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inventory {
    RoleBindings,
    ClusterRoleBindings,
}

impl Inventory {
    fn set_mut(self, status: &mut RBACRuleStatus) -> &mut BTreeSet<String> {
        match self {
            Inventory::RoleBindings => &mut status.role_bindings,
            Inventory::ClusterRoleBindings => &mut status.cluster_role_bindings,
        }
    }
}

/// Identifier of a RoleBinding in status
#[must_use]
pub fn role_binding_id(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

/// Identifier of a ClusterRoleBinding in status
#[must_use]
pub fn cluster_role_binding_id(name: &str) -> String {
    name.to_string()
}

/// Add `id` to the inventory and write status if it was missing
pub async fn record<S: ObjectStore>(
    ctx: &Reconciler<S>,
    rule: &mut RBACRule,
    inventory: Inventory,
    id: &str,
) -> Result<(), ReconcilerError> {
    let status = rule.status.get_or_insert_with(RBACRuleStatus::default);
    if !inventory.set_mut(status).insert(id.to_string()) {
        return Ok(());
    }
    debug!(?inventory, id, "Recording binding in status");
    write_status(ctx, rule).await
}

/// Remove exactly `id` from the inventory and write status if it was present
pub async fn forget<S: ObjectStore>(
    ctx: &Reconciler<S>,
    rule: &mut RBACRule,
    inventory: Inventory,
    id: &str,
) -> Result<(), ReconcilerError> {
    let Some(status) = rule.status.as_mut() else {
        return Ok(());
    };
    if !inventory.set_mut(status).remove(id) {
        return Ok(());
    }
    debug!(?inventory, id, "Removing binding from status");
    write_status(ctx, rule).await
}

//! # Cleanup
//!
//! Terminating path of an RBACRule: delete everything carrying its ownership label
//! (RoleBindings, then ClusterRoleBindings, then ServiceAccounts), then release the
//! finalizer. A ServiceAccount another live rule also uses is handed over to that
//! rule instead of being deleted. Any failed delete leaves the finalizer in place and the next attempt
//! resumes where this one stopped.

use super::finalizer;
use crate::constants::OWNER_LABEL;
use crate::controller::parser::naming::{owner_label_value, owner_selector};
use crate::controller::parser::references_rule;
use crate::controller::parser::selector::LabelQuery;
use crate::controller::reconciler::status::{
    cluster_role_binding_id, forget, role_binding_id, set_phase, Inventory,
};
use crate::controller::reconciler::types::{Reconciler, ReconcilerError};
use crate::controller::store::{ObjectStore, StoreError, StoreObject};
use crate::crd::{RBACRule, RulePhase};
use crate::observability;
use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{ClusterRoleBinding, RoleBinding};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use k8s_openapi::Resource;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use tracing::{debug, info, warn};

/// Sweep the objects of a rule that is being deleted
pub async fn finalize<S: ObjectStore>(
    ctx: &Reconciler<S>,
    mut rule: RBACRule,
) -> Result<Action, ReconcilerError> {
    if !finalizer::has_finalizer(&rule) {
        debug!("Deletion in progress without our finalizer, nothing to clean up");
        return Ok(Action::await_change());
    }

    let name = rule.name_any();
    info!("🧹 Cleaning up objects owned by RBACRule {}", name);
    set_phase(ctx, &mut rule, RulePhase::Terminating, None).await?;

    let selector = owner_selector(&name, rule.namespace().as_deref()).map_err(|source| {
        ReconcilerError::Selector {
            name: name.clone(),
            source,
        }
    })?;

    for binding in list_owned::<S, RoleBinding>(ctx, &name, &selector).await? {
        let namespace = binding.namespace().unwrap_or_default();
        let object = binding.name_any();
        delete_owned::<S, RoleBinding>(ctx, &name, Some(&namespace), &object).await?;
        forget(
            ctx,
            &mut rule,
            Inventory::RoleBindings,
            &role_binding_id(&namespace, &object),
        )
        .await?;
    }

    for binding in list_owned::<S, ClusterRoleBinding>(ctx, &name, &selector).await? {
        let object = binding.name_any();
        delete_owned::<S, ClusterRoleBinding>(ctx, &name, None, &object).await?;
        forget(
            ctx,
            &mut rule,
            Inventory::ClusterRoleBindings,
            &cluster_role_binding_id(&object),
        )
        .await?;
    }

    sweep_unlabelled(ctx, &mut rule).await?;

    sweep_service_accounts(ctx, &rule).await?;

    finalizer::remove(ctx, &mut rule).await?;
    info!("✅ Cleanup complete for RBACRule {}", name);
    Ok(Action::await_change())
}

/// Bindings still listed in status after the label sweep lost their label
///
/// They are deleted only when an owner reference still points at this rule;
/// otherwise the entry is dropped and the object left alone.
async fn sweep_unlabelled<S: ObjectStore>(
    ctx: &Reconciler<S>,
    rule: &mut RBACRule,
) -> Result<(), ReconcilerError> {
    let Some(status) = rule.status.clone() else {
        return Ok(());
    };
    let name = rule.name_any();
    let uid = rule.uid();

    for id in &status.role_bindings {
        let Some((namespace, object)) = id.split_once('/') else {
            warn!(id, "Dropping malformed RoleBinding entry from status");
            forget(ctx, rule, Inventory::RoleBindings, id).await?;
            continue;
        };
        if let Some(binding) = get_recorded::<S, RoleBinding>(ctx, &name, Some(namespace), object).await? {
            if owned_by(&binding, uid.as_deref()) {
                delete_owned::<S, RoleBinding>(ctx, &name, Some(namespace), object).await?;
            } else {
                warn!(id, "RoleBinding in status is not owned by this rule, leaving it in place");
            }
        }
        forget(ctx, rule, Inventory::RoleBindings, id).await?;
    }

    for id in &status.cluster_role_bindings {
        if let Some(binding) = get_recorded::<S, ClusterRoleBinding>(ctx, &name, None, id).await? {
            if owned_by(&binding, uid.as_deref()) {
                delete_owned::<S, ClusterRoleBinding>(ctx, &name, None, id).await?;
            } else {
                warn!(id, "ClusterRoleBinding in status is not owned by this rule, leaving it in place");
            }
        }
        forget(ctx, rule, Inventory::ClusterRoleBindings, id).await?;
    }
    Ok(())
}

/// ServiceAccounts the rule created or shares
///
/// An account the rule controls is deleted unless another live RBACRule still
/// references it; that rule then takes over the ownership label and the controller
/// reference. An account the rule merely shares loses the rule's owner reference.
async fn sweep_service_accounts<S: ObjectStore>(
    ctx: &Reconciler<S>,
    rule: &RBACRule,
) -> Result<(), ReconcilerError> {
    let name = rule.name_any();
    let uid = rule.uid();
    let label = owner_label_value(&name, rule.namespace().as_deref());
    let managed = LabelQuery::exists(OWNER_LABEL).map_err(|source| ReconcilerError::Selector {
        name: name.clone(),
        source,
    })?;

    for account in list_owned::<S, ServiceAccount>(ctx, &name, &managed).await? {
        let namespace = account.namespace().unwrap_or_default();
        let object = account.name_any();
        if account.labels().get(OWNER_LABEL) == Some(&label) {
            match next_owner(ctx, &name, &account, uid.as_deref()).await? {
                Some(next) => {
                    info!(namespace = %namespace, object = %object, next_owner = %next.name, "Handing shared ServiceAccount over to another RBACRule");
                    rewrite_owners(ctx, &name, account, uid.as_deref(), Some(&next)).await?;
                }
                None => {
                    delete_owned::<S, ServiceAccount>(ctx, &name, Some(&namespace), &object)
                        .await?;
                }
            }
        } else if owned_by(&account, uid.as_deref()) {
            debug!(namespace = %namespace, object = %object, "Releasing ServiceAccount controlled by another owner");
            rewrite_owners(ctx, &name, account, uid.as_deref(), None).await?;
        }
    }
    Ok(())
}

/// Another RBACRule referencing `account` that still exists and is not being deleted
async fn next_owner<S: ObjectStore>(
    ctx: &Reconciler<S>,
    rule: &str,
    account: &ServiceAccount,
    uid: Option<&str>,
) -> Result<Option<OwnerReference>, ReconcilerError> {
    let candidates = account
        .owner_references()
        .iter()
        .filter(|r| references_rule(r) && Some(r.uid.as_str()) != uid);
    for reference in candidates {
        match ctx.store.get::<RBACRule>(None, &reference.name).await {
            Ok(other)
                if other.uid().as_deref() == Some(reference.uid.as_str())
                    && other.metadata.deletion_timestamp.is_none() =>
            {
                return Ok(Some(reference.clone()));
            }
            Ok(_) | Err(StoreError::NotFound) => {}
            Err(source) => {
                return Err(ReconcilerError::Cleanup {
                    name: rule.to_string(),
                    kind: ServiceAccount::KIND,
                    object: format!("{}/{}", account.namespace().unwrap_or_default(), account.name_any()),
                    source,
                })
            }
        }
    }
    Ok(None)
}

/// Drop the rule's owner reference; `next` becomes controller and label owner
async fn rewrite_owners<S: ObjectStore>(
    ctx: &Reconciler<S>,
    rule: &str,
    mut account: ServiceAccount,
    uid: Option<&str>,
    next: Option<&OwnerReference>,
) -> Result<(), ReconcilerError> {
    let object = format!("{}/{}", account.namespace().unwrap_or_default(), account.name_any());
    if let Some(references) = account.metadata.owner_references.as_mut() {
        references.retain(|r| Some(r.uid.as_str()) != uid);
        for reference in references.iter_mut() {
            if next.is_some_and(|next| next.uid == reference.uid) {
                reference.controller = Some(true);
            }
        }
    }
    if let Some(next) = next {
        account
            .labels_mut()
            .insert(OWNER_LABEL.to_string(), owner_label_value(&next.name, None));
    }

    match ctx.store.replace(&account).await {
        Ok(_) | Err(StoreError::NotFound) => Ok(()),
        Err(source) => {
            warn!(object = %object, error = %source, "Failed to rewrite ServiceAccount owners");
            Err(ReconcilerError::Cleanup {
                name: rule.to_string(),
                kind: ServiceAccount::KIND,
                object,
                source,
            })
        }
    }
}

fn owned_by<K: StoreObject>(object: &K, uid: Option<&str>) -> bool {
    uid.is_some_and(|uid| object.owner_references().iter().any(|r| r.uid == uid))
}

async fn list_owned<S: ObjectStore, K: StoreObject + Resource>(
    ctx: &Reconciler<S>,
    rule: &str,
    selector: &LabelQuery,
) -> Result<Vec<K>, ReconcilerError> {
    ctx.store
        .list::<K>(None, selector)
        .await
        .map_err(|source| ReconcilerError::Cleanup {
            name: rule.to_string(),
            kind: K::KIND,
            object: selector.to_string(),
            source,
        })
}

async fn get_recorded<S: ObjectStore, K: StoreObject + Resource>(
    ctx: &Reconciler<S>,
    rule: &str,
    namespace: Option<&str>,
    object: &str,
) -> Result<Option<K>, ReconcilerError> {
    match ctx.store.get::<K>(namespace, object).await {
        Ok(found) => Ok(Some(found)),
        Err(StoreError::NotFound) => Ok(None),
        Err(source) => Err(ReconcilerError::Cleanup {
            name: rule.to_string(),
            kind: K::KIND,
            object: object.to_string(),
            source,
        }),
    }
}

/// Delete one generated object; an already absent object counts as deleted
async fn delete_owned<S: ObjectStore, K: StoreObject + Resource>(
    ctx: &Reconciler<S>,
    rule: &str,
    namespace: Option<&str>,
    object: &str,
) -> Result<(), ReconcilerError> {
    let kind = K::KIND;
    match ctx.store.delete::<K>(namespace, object).await {
        Ok(()) => {
            debug!(kind, namespace, object, "Deleted generated object");
            observability::metrics::increment_objects_deleted(kind);
            Ok(())
        }
        Err(StoreError::NotFound) => {
            debug!(kind, namespace, object, "Generated object already gone");
            Ok(())
        }
        Err(source) => {
            warn!(kind, namespace, object, error = %source, "Failed to delete generated object");
            Err(ReconcilerError::Cleanup {
                name: rule.to_string(),
                kind,
                object: match namespace {
                    Some(ns) => format!("{ns}/{object}"),
                    None => object.to_string(),
                },
                source,
            })
        }
    }
}

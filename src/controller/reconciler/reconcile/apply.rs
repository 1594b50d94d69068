//! # Apply
//!
//! Upserts the expansion of every binding, in declaration order: namespaces,
//! ServiceAccounts, RoleBindings, then ClusterRoleBindings.
//!
//! Every object goes through create-then-replace: creation is attempted first and an
//! `AlreadyExists` answer falls back to reading the current object and replacing the
//! fields this controller owns. Generated specs are deterministic, so in steady state
//! the replace changes nothing.

use crate::constants::OWNER_LABEL;
use crate::controller::parser::{expand_binding, Expansion, Ownership};
use crate::controller::reconciler::status::{
    cluster_role_binding_id, record, role_binding_id, Inventory,
};
use crate::controller::reconciler::types::{Reconciler, ReconcilerError};
use crate::controller::store::{ObjectStore, StoreError, StoreObject};
use crate::crd::{RBACRule, RBACRuleSpec};
use crate::observability;
use k8s_openapi::api::core::v1::{Namespace, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRoleBinding, RoleBinding};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::Resource;
use kube::ResourceExt;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Result of applying a rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Every expandable binding was applied; `failed_bindings` could not be expanded
    Applied { failed_bindings: Vec<String> },
    /// A generated object could not be written; retry the pass shortly
    Retry,
}

/// Object kind generated by the controller
trait Generated: StoreObject + Resource {
    /// Copy the fields this controller owns from `desired`
    ///
    /// Returns the other owner when the object is controlled by someone else.
    fn converge(&mut self, desired: &Self) -> Option<String>;
}

impl Generated for ServiceAccount {
    fn converge(&mut self, desired: &Self) -> Option<String> {
        converge_metadata(&mut self.metadata, &desired.metadata)
    }
}

impl Generated for RoleBinding {
    fn converge(&mut self, desired: &Self) -> Option<String> {
        self.role_ref = desired.role_ref.clone();
        self.subjects = desired.subjects.clone();
        converge_metadata(&mut self.metadata, &desired.metadata)
    }
}

impl Generated for ClusterRoleBinding {
    fn converge(&mut self, desired: &Self) -> Option<String> {
        self.role_ref = desired.role_ref.clone();
        self.subjects = desired.subjects.clone();
        converge_metadata(&mut self.metadata, &desired.metadata)
    }
}

/// Add the ownership labels and owner references, keeping anything else
///
/// An object already controlled by another owner, or carrying another rule's
/// ownership label, keeps that controller and label. The rule is then added as a
/// plain (non-controller) owner reference so its events still reach it.
fn converge_metadata(current: &mut ObjectMeta, desired: &ObjectMeta) -> Option<String> {
    let desired_references = desired.owner_references.as_deref().unwrap_or_default();
    let other_owner = foreign_owner(current, desired);

    if let Some(labels) = &desired.labels {
        let current_labels = current.labels.get_or_insert_with(Default::default);
        for (key, value) in labels {
            if other_owner.is_some() && key == OWNER_LABEL {
                continue;
            }
            current_labels.insert(key.clone(), value.clone());
        }
    }

    if !desired_references.is_empty() {
        let existing = current.owner_references.get_or_insert_with(Vec::new);
        for reference in desired_references {
            let mut reference = reference.clone();
            if other_owner.is_some() {
                reference.controller = Some(false);
            }
            match existing.iter_mut().find(|r| r.uid == reference.uid) {
                Some(r) => *r = reference,
                None => existing.push(reference),
            }
        }
    }
    other_owner
}

/// Controller reference or ownership label on `current` that is not `desired`'s
fn foreign_owner(current: &ObjectMeta, desired: &ObjectMeta) -> Option<String> {
    let desired_references = desired.owner_references.as_deref().unwrap_or_default();
    let controller = current
        .owner_references
        .iter()
        .flatten()
        .find(|r| r.controller == Some(true) && !desired_references.iter().any(|d| d.uid == r.uid))
        .map(|r| format!("{} {}", r.kind, r.name));
    if controller.is_some() {
        return controller;
    }

    let label = |meta: &ObjectMeta| meta.labels.as_ref().and_then(|l| l.get(OWNER_LABEL)).cloned();
    match (label(current), label(desired)) {
        (Some(have), Some(want)) if have != want => Some(format!("{OWNER_LABEL}={have}")),
        _ => None,
    }
}

/// Apply every binding of `spec` for `rule`
///
/// Bindings whose namespaces cannot be resolved are skipped and reported; a failed
/// object write stops the pass with [`ApplyOutcome::Retry`]. Status inventory is
/// written after each binding object, so everything applied before a failure is
/// still tracked.
pub async fn apply_rule<S: ObjectStore>(
    ctx: &Reconciler<S>,
    rule: &mut RBACRule,
    spec: &RBACRuleSpec,
) -> Result<ApplyOutcome, ReconcilerError> {
    let ownership = Ownership::for_rule(rule);
    let mut known_namespaces = BTreeSet::new();
    let mut failed_bindings = Vec::new();

    for binding in &spec.bindings {
        let expansion = match expand_binding(&ctx.store, binding, &ownership).await {
            Ok(expansion) => expansion,
            Err(e) => {
                warn!(binding = %binding.name, error = %e, "Failed to expand binding, continuing with the next one");
                observability::metrics::increment_expansion_errors();
                failed_bindings.push(binding.name.clone());
                continue;
            }
        };
        if let Some(outcome) =
            apply_expansion(ctx, rule, spec, &ownership, &expansion, &mut known_namespaces).await?
        {
            return Ok(outcome);
        }
    }

    Ok(ApplyOutcome::Applied { failed_bindings })
}

async fn apply_expansion<S: ObjectStore>(
    ctx: &Reconciler<S>,
    rule: &mut RBACRule,
    spec: &RBACRuleSpec,
    ownership: &Ownership,
    expansion: &Expansion,
    known_namespaces: &mut BTreeSet<String>,
) -> Result<Option<ApplyOutcome>, ReconcilerError> {
    for namespace in expansion.required_namespaces(spec.create_service_accounts) {
        if known_namespaces.contains(&namespace) {
            continue;
        }
        if let Err(e) = ensure_namespace(ctx, ownership, &namespace).await {
            return object_failure(Namespace::KIND, namespace, e).map(Some);
        }
        known_namespaces.insert(namespace);
    }

    if spec.create_service_accounts {
        for account in &expansion.service_accounts {
            if let Err(e) = upsert(ctx, account).await {
                return object_failure(ServiceAccount::KIND, qualified(account), e).map(Some);
            }
        }
    }

    for binding in &expansion.role_bindings {
        if let Err(e) = upsert(ctx, binding).await {
            return object_failure(RoleBinding::KIND, qualified(binding), e).map(Some);
        }
        let id = role_binding_id(&binding.namespace().unwrap_or_default(), &binding.name_any());
        record(ctx, rule, Inventory::RoleBindings, &id).await?;
    }

    for binding in &expansion.cluster_role_bindings {
        if let Err(e) = upsert(ctx, binding).await {
            return object_failure(ClusterRoleBinding::KIND, binding.name_any(), e).map(Some);
        }
        let id = cluster_role_binding_id(&binding.name_any());
        record(ctx, rule, Inventory::ClusterRoleBindings, &id).await?;
    }

    Ok(None)
}

/// Create the namespace if it does not exist; existing namespaces are not touched
///
/// Created namespaces are never deleted by the controller.
async fn ensure_namespace<S: ObjectStore>(
    ctx: &Reconciler<S>,
    ownership: &Ownership,
    name: &str,
) -> Result<(), StoreError> {
    match ctx.store.get::<Namespace>(None, name).await {
        Ok(_) => return Ok(()),
        Err(StoreError::NotFound) => {}
        Err(e) => return Err(e),
    }
    // owner reference only: namespaces outlive the cleanup sweep, which selects by label
    let namespace = Namespace {
        metadata: ObjectMeta {
            labels: None,
            ..ownership.object_meta(name, None)
        },
        ..Namespace::default()
    };
    match ctx.store.create(&namespace).await {
        Ok(_) => {
            info!(namespace = name, "Created namespace");
            observability::metrics::increment_objects_applied(Namespace::KIND);
            Ok(())
        }
        Err(StoreError::AlreadyExists) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Create `desired`, or converge the existing object onto it
async fn upsert<S: ObjectStore, K: Generated>(
    ctx: &Reconciler<S>,
    desired: &K,
) -> Result<K, StoreError> {
    match ctx.store.create(desired).await {
        Ok(created) => {
            debug!(kind = K::KIND, object = %qualified(desired), "Created");
            observability::metrics::increment_objects_applied(K::KIND);
            return Ok(created);
        }
        Err(StoreError::AlreadyExists) => {}
        Err(e) => return Err(e),
    }

    let mut current: K = ctx
        .store
        .get(desired.namespace().as_deref(), &desired.name_any())
        .await?;
    let version = current.resource_version();
    if let Some(owner) = current.converge(desired) {
        debug!(kind = K::KIND, object = %qualified(desired), owner = %owner, "Shared with another owner, adding a non-controller reference");
    }
    let replaced = ctx.store.replace(&current).await?;
    if replaced.resource_version() != version {
        debug!(kind = K::KIND, object = %qualified(desired), "Updated");
        observability::metrics::increment_objects_applied(K::KIND);
    }
    Ok(replaced)
}

/// Transient failures ask for a short retry; anything else is a hard error
fn object_failure(
    kind: &'static str,
    object: String,
    error: StoreError,
) -> Result<ApplyOutcome, ReconcilerError> {
    if !error.is_transient() {
        return Err(ReconcilerError::Object {
            kind,
            object,
            source: error,
        });
    }
    warn!(kind, object = %object, error = %error, "Failed to apply generated object, retrying shortly");
    Ok(ApplyOutcome::Retry)
}

fn qualified<K: StoreObject>(object: &K) -> String {
    match object.namespace() {
        Some(ns) => format!("{ns}/{}", object.name_any()),
        None => object.name_any(),
    }
}

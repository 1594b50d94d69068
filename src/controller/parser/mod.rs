//! # Binding Expander
//!
//! Expands one [`Binding`] of an RBACRule into the concrete objects that realize it.
//!
//! ## Expansion
//!
//! - **User / Group subjects**: bound once, cluster-wide (no namespace)
//! - **ServiceAccount subjects**: one subject entry and one ServiceAccount per resolved namespace
//! - **Role bindings**: one RoleBinding per resolved namespace and per role reference
//!   (`role` and `clusterRole` on the same entry give two RoleBindings)
//! - **Cluster role bindings**: one ClusterRoleBinding per entry
//!
//! Every RoleBinding and ClusterRoleBinding of a binding carries the same, fully
//! expanded subject list. Names come from [`naming`], so expanding the same
//! declaration twice always produces the same objects.
//!
//! Namespace selection is handled by [`namespaces`]; label queries by [`selector`].

pub mod naming;
pub mod namespaces;
pub mod selector;

use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{
    ClusterRoleBinding, RoleBinding, RoleRef, Subject as RbacSubject,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};
use thiserror::Error;
use tracing::{debug, warn};

use crate::constants::RBAC_API_GROUP;
use crate::controller::store::{ObjectStore, StoreError};
use crate::crd::{Binding, RBACRule, RoleBindingSpec, SubjectKind};
use selector::SelectorError;

/// Why a binding could not be expanded
#[derive(Debug, Error)]
pub enum ExpansionError {
    #[error("invalid namespace selector: {0}")]
    Selector(#[from] SelectorError),
    #[error("failed to list namespaces: {0}")]
    Store(#[from] StoreError),
}

/// Labels and owner references stamped on every generated object
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ownership {
    pub rule_name: String,
    pub labels: BTreeMap<String, String>,
    pub owner_references: Vec<OwnerReference>,
}

impl Ownership {
    /// Ownership of objects generated for `rule`
    ///
    /// The owner reference is only present once the rule has a uid (i.e. has been
    /// stored); the label is always present.
    #[must_use]
    pub fn for_rule(rule: &RBACRule) -> Self {
        let rule_name = rule.name_any();
        Self {
            labels: naming::owner_labels(&rule_name, rule.namespace().as_deref()),
            owner_references: rule.controller_owner_ref(&()).into_iter().collect(),
            rule_name,
        }
    }

    /// Metadata for a generated object
    #[must_use]
    pub fn object_meta(&self, name: &str, namespace: Option<&str>) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: namespace.map(str::to_string),
            labels: Some(self.labels.clone()),
            owner_references: (!self.owner_references.is_empty())
                .then(|| self.owner_references.clone()),
            ..ObjectMeta::default()
        }
    }
}

/// Whether `reference` points at an RBACRule
#[must_use]
pub fn references_rule(reference: &OwnerReference) -> bool {
    reference.kind == RBACRule::kind(&())
        && reference
            .api_version
            .strip_prefix(RBACRule::group(&()).as_ref())
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Role referenced by a RoleBinding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleReference<'a> {
    Role(&'a str),
    ClusterRole(&'a str),
}

impl<'a> RoleReference<'a> {
    /// Role references of a role binding entry, `role` first; blank names are skipped
    #[must_use]
    pub fn of(spec: &'a RoleBindingSpec) -> Vec<Self> {
        let role = spec.role.as_deref().map(str::trim).filter(|r| !r.is_empty());
        let cluster_role = spec
            .cluster_role
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty());
        role.map(RoleReference::Role)
            .into_iter()
            .chain(cluster_role.map(RoleReference::ClusterRole))
            .collect()
    }

    #[must_use]
    pub fn name(&self) -> &'a str {
        match self {
            RoleReference::Role(name) | RoleReference::ClusterRole(name) => name,
        }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            RoleReference::Role(_) => "Role",
            RoleReference::ClusterRole(_) => "ClusterRole",
        }
    }

    /// Name tag of the generated RoleBinding
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            RoleReference::Role(_) => "rb",
            RoleReference::ClusterRole(_) => "rbc",
        }
    }

    #[must_use]
    pub fn role_ref(&self) -> RoleRef {
        RoleRef {
            api_group: RBAC_API_GROUP.to_string(),
            kind: self.kind().to_string(),
            name: self.name().to_string(),
        }
    }
}

/// Concrete objects realizing one binding
#[derive(Debug, Clone, Default)]
pub struct Expansion {
    pub binding: String,
    /// Expanded subjects, shared by every generated binding object
    pub subjects: Vec<RbacSubject>,
    pub service_accounts: Vec<ServiceAccount>,
    pub role_bindings: Vec<RoleBinding>,
    pub cluster_role_bindings: Vec<ClusterRoleBinding>,
}

impl Expansion {
    /// Namespaces that must exist before the objects can be applied
    ///
    /// Role binding namespaces always; ServiceAccount namespaces only when the
    /// ServiceAccounts are created by the controller.
    #[must_use]
    pub fn required_namespaces(&self, include_service_accounts: bool) -> Vec<String> {
        let service_accounts = self
            .service_accounts
            .iter()
            .filter(|_| include_service_accounts)
            .filter_map(ResourceExt::namespace);
        let role_bindings = self.role_bindings.iter().filter_map(ResourceExt::namespace);
        dedup(service_accounts.chain(role_bindings))
    }
}

/// Expand `binding` into subjects, ServiceAccounts, RoleBindings and ClusterRoleBindings
///
/// Only reads from the store (namespace listing).
///
/// # Errors
///
/// Any namespace resolution failure aborts the expansion of this binding.
pub async fn expand_binding<S: ObjectStore>(
    store: &S,
    binding: &Binding,
    ownership: &Ownership,
) -> Result<Expansion, ExpansionError> {
    let mut expansion = Expansion {
        binding: binding.name.clone(),
        ..Expansion::default()
    };
    let mut seen_subjects = BTreeSet::new();

    for subject in &binding.subjects {
        let name = subject.name.trim();
        if name.is_empty() {
            warn!(binding = %binding.name, kind = subject.kind.as_str(), "Skipping subject without a name");
            continue;
        }
        match subject.kind {
            SubjectKind::User | SubjectKind::Group => {
                if seen_subjects.insert((subject.kind.as_str(), name.to_string(), None)) {
                    expansion.subjects.push(RbacSubject {
                        api_group: Some(RBAC_API_GROUP.to_string()),
                        kind: subject.kind.as_str().to_string(),
                        name: name.to_string(),
                        namespace: None,
                    });
                }
            }
            SubjectKind::ServiceAccount => {
                let resolved = namespaces::resolve(store, &subject.selection).await?;
                for namespace in dedup(resolved) {
                    if !seen_subjects.insert((subject.kind.as_str(), name.to_string(), Some(namespace.clone()))) {
                        continue;
                    }
                    expansion.subjects.push(RbacSubject {
                        api_group: None,
                        kind: subject.kind.as_str().to_string(),
                        name: name.to_string(),
                        namespace: Some(namespace.clone()),
                    });
                    expansion.service_accounts.push(ServiceAccount {
                        metadata: ownership.object_meta(name, Some(&namespace)),
                        ..ServiceAccount::default()
                    });
                }
            }
        }
    }

    for spec in &binding.role_bindings {
        let roles = RoleReference::of(spec);
        if roles.is_empty() {
            warn!(binding = %binding.name, "Skipping role binding without role or clusterRole");
            continue;
        }
        let resolved = dedup(namespaces::resolve(store, &spec.selection).await?);
        if resolved.is_empty() {
            debug!(binding = %binding.name, "Role binding resolved to no namespaces");
        }
        for namespace in &resolved {
            for role in &roles {
                let name = naming::role_binding_name(
                    &ownership.rule_name,
                    &binding.name,
                    role.tag(),
                    role.name(),
                );
                expansion.role_bindings.push(RoleBinding {
                    metadata: ownership.object_meta(&name, Some(namespace)),
                    role_ref: role.role_ref(),
                    subjects: Some(expansion.subjects.clone()),
                });
            }
        }
    }

    for spec in &binding.cluster_role_bindings {
        let cluster_role = spec.cluster_role.trim();
        if cluster_role.is_empty() {
            warn!(binding = %binding.name, "Skipping cluster role binding without clusterRole");
            continue;
        }
        let name =
            naming::cluster_role_binding_name(&ownership.rule_name, &binding.name, cluster_role);
        expansion.cluster_role_bindings.push(ClusterRoleBinding {
            metadata: ownership.object_meta(&name, None),
            role_ref: RoleReference::ClusterRole(cluster_role).role_ref(),
            subjects: Some(expansion.subjects.clone()),
        });
    }

    debug!(
        binding = %binding.name,
        subjects = expansion.subjects.len(),
        service_accounts = expansion.service_accounts.len(),
        role_bindings = expansion.role_bindings.len(),
        cluster_role_bindings = expansion.cluster_role_bindings.len(),
        "Expanded binding"
    );
    Ok(expansion)
}

/// Remove duplicates keeping the first occurrence
fn dedup(items: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

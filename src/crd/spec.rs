//! # RBACRule Spec
//!
//! Desired state of an `RBACRule`.

use chrono::{DateTime, Datelike, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::crd::admission::AdmissionError;

/// RBACRule Custom Resource Definition
///
/// Declares a set of bindings (subjects x roles) that must exist across namespaces.
/// The controller expands every binding into RoleBindings, ClusterRoleBindings and
/// ServiceAccounts, keeps them in sync, and removes them when the rule is deleted
/// or its `endTime` passes.
///
/// # Example
///
/// ```yaml
/// apiVersion: rbac-controller.io/v1alpha1
/// kind: RBACRule
/// metadata:
///   name: team-a-access
/// spec:
///   bindings:
///     - name: dev
///       subjects:
///         - kind: ServiceAccount
///           name: sa1
///           namespaceSelector:
///             matchLabels:
///               env: dev
///       roleBindings:
///         - role: edit
///           namespaces: [team-a]
/// ```
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "RBACRule",
    group = "rbac-controller.io",
    version = "v1alpha1",
    status = "crate::crd::RBACRuleStatus",
    shortname = "rbr",
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}, {"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}, {"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RBACRuleSpec {
    /// Bindings to realize, processed in declaration order
    pub bindings: Vec<Binding>,
    /// RFC 3339 instant before which nothing is applied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    /// RFC 3339 instant after which the rule deletes itself
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    /// Create the ServiceAccounts (and their namespaces) named by ServiceAccount subjects.
    /// When false the subjects are still bound but the accounts must already exist.
    #[serde(default = "default_true", alias = "createSA")]
    pub create_service_accounts: bool,
}

/// One named group of subjects bound to a set of roles
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Binding {
    /// Scopes the names of the generated objects
    pub name: String,
    #[serde(default)]
    pub subjects: Vec<Subject>,
    #[serde(default)]
    pub role_bindings: Vec<RoleBindingSpec>,
    #[serde(default)]
    pub cluster_role_bindings: Vec<ClusterRoleBindingSpec>,
}

/// Kind of an RBAC subject
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum SubjectKind {
    User,
    Group,
    ServiceAccount,
}

impl SubjectKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectKind::User => "User",
            SubjectKind::Group => "Group",
            SubjectKind::ServiceAccount => "ServiceAccount",
        }
    }
}

/// Entity granted access by a binding
///
/// Namespace selection only applies to `ServiceAccount` subjects: one subject entry
/// (and one ServiceAccount) is generated per resolved namespace.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub kind: SubjectKind,
    pub name: String,
    #[serde(flatten)]
    pub selection: NamespaceSelection,
}

/// Binding of the subjects to a Role and/or ClusterRole inside selected namespaces
///
/// Setting both `role` and `clusterRole` yields two RoleBindings per namespace.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoleBindingSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_role: Option<String>,
    #[serde(flatten)]
    pub selection: NamespaceSelection,
}

/// Cluster-wide binding of the subjects to a ClusterRole
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterRoleBindingSpec {
    pub cluster_role: String,
}

/// Namespace-selection rule shared by subjects and role bindings
///
/// The resolved set is the union of the explicit list, the namespaces matched by
/// `namespaceSelector`, and the namespaces matched by `namespaceMatchExpression`
/// (a label selector string such as `env in (dev,qa),!legacy`).
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceSelection {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<String>,
    #[serde(
        default,
        alias = "nameSpaceSelector",
        skip_serializing_if = "Option::is_none"
    )]
    pub namespace_selector: Option<LabelSelectorSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_match_expression: Option<String>,
}

impl NamespaceSelection {
    /// True when no rule of any form is given
    #[must_use]
    pub fn is_unset(&self) -> bool {
        self.namespaces.iter().all(|ns| ns.trim().is_empty())
            && self
                .namespace_selector
                .as_ref()
                .is_none_or(LabelSelectorSpec::is_empty)
            && self
                .namespace_match_expression
                .as_deref()
                .is_none_or(|expr| expr.trim().is_empty())
    }
}

/// Standard Kubernetes label selector (`matchLabels` + `matchExpressions`)
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelectorSpec {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_expressions: Vec<LabelSelectorRequirementSpec>,
}

impl LabelSelectorSpec {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.match_labels.is_empty() && self.match_expressions.is_empty()
    }
}

/// One `matchExpressions` entry: `In`, `NotIn`, `Exists` or `DoesNotExist`
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelectorRequirementSpec {
    pub key: String,
    pub operator: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

/// Parsed `startTime` / `endTime` of a rule
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl RBACRuleSpec {
    /// Parse the activation window
    ///
    /// Absent, blank and zero-valued (`0001-01-01T00:00:00Z`) instants are unset.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::InvalidTimestamp`] when a value is not RFC 3339.
    pub fn window(&self) -> Result<TimeWindow, AdmissionError> {
        Ok(TimeWindow {
            start: parse_instant("startTime", self.start_time.as_deref())?,
            end: parse_instant("endTime", self.end_time.as_deref())?,
        })
    }
}

fn parse_instant(
    field: &'static str,
    value: Option<&str>,
) -> Result<Option<DateTime<Utc>>, AdmissionError> {
    let Some(raw) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    let parsed = DateTime::parse_from_rfc3339(raw)
        .map_err(|_| AdmissionError::InvalidTimestamp {
            field,
            value: raw.to_string(),
        })?
        .with_timezone(&Utc);
    // zero time.Time written by older clients
    if parsed.year() <= 1 {
        return Ok(None);
    }
    Ok(Some(parsed))
}

fn default_true() -> bool {
    true
}

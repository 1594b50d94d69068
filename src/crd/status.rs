//! # RBACRule Status
//!
//! Observed state of an `RBACRule`.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Lifecycle phase of an RBACRule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum RulePhase {
    /// `startTime` lies in the future, nothing is applied yet
    Pending,
    /// Bindings are applied and maintained
    Active,
    /// Deletion requested, generated objects are being swept
    Terminating,
    /// The spec cannot be applied as written
    Failed,
}

impl RulePhase {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            RulePhase::Pending => "Pending",
            RulePhase::Active => "Active",
            RulePhase::Terminating => "Terminating",
            RulePhase::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for RulePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RBACRuleStatus {
    #[serde(default)]
    pub phase: Option<RulePhase>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub observed_generation: Option<i64>,
    #[serde(default)]
    pub last_reconcile_time: Option<String>,
    /// RoleBindings owned by this rule, as `namespace/name`
    #[serde(default)]
    #[schemars(with = "Vec<String>")]
    pub role_bindings: BTreeSet<String>,
    /// ClusterRoleBindings owned by this rule, by name
    #[serde(default)]
    #[schemars(with = "Vec<String>")]
    pub cluster_role_bindings: BTreeSet<String>,
}

impl RBACRuleStatus {
    /// The `Ready` condition, if one has been written
    #[must_use]
    pub fn ready_condition(&self) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.r#type == "Ready")
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub r#type: String,
    pub status: String,
    #[serde(default)]
    pub last_transition_time: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

//! # Admission
//!
//! Defaulting and validation of `RBACRule` specs.
//!
//! The webhook serving these checks is deployed separately; the reconciler applies
//! [`default_rule`] and [`validate_update`] to its own copy of the spec on every pass,
//! so a rule admitted without the webhook still behaves the same way.

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::debug;

use crate::crd::{RBACRuleSpec, SubjectKind, TimeWindow};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("{field} is not a valid RFC 3339 timestamp: {value:?}")]
    InvalidTimestamp { field: &'static str, value: String },
    #[error("startTime {start} is in the past")]
    StartInPast { start: String },
    #[error("startTime {start} is after endTime {end}")]
    StartAfterEnd { start: String, end: String },
    #[error("binding #{index} has no name")]
    UnnamedBinding { index: usize },
    #[error("binding {binding:?} declares neither roleBindings nor clusterRoleBindings")]
    NoRoles { binding: String },
    #[error("binding {binding:?} has a roleBinding with neither role nor clusterRole")]
    EmptyRoleReference { binding: String },
    #[error("binding {binding:?} has a clusterRoleBinding without clusterRole")]
    EmptyClusterRole { binding: String },
    #[error("binding {binding:?} has a {kind} subject without a name")]
    UnnamedSubject {
        binding: String,
        kind: &'static str,
    },
}

/// Fill in the fallback namespace wherever a namespace is needed but none is selected
///
/// Applies to every ServiceAccount subject and every role binding whose namespace
/// selection is entirely unset. Returns the number of entries that were defaulted.
pub fn default_rule(spec: &mut RBACRuleSpec, fallback_namespace: &str) -> usize {
    let mut defaulted = 0;
    for binding in &mut spec.bindings {
        for subject in &mut binding.subjects {
            if subject.kind == SubjectKind::ServiceAccount && subject.selection.is_unset() {
                debug!(
                    binding = %binding.name,
                    subject = %subject.name,
                    namespace = fallback_namespace,
                    "Defaulting ServiceAccount subject namespace"
                );
                subject.selection.namespaces = vec![fallback_namespace.to_string()];
                defaulted += 1;
            }
        }
        for role_binding in &mut binding.role_bindings {
            if role_binding.selection.is_unset() {
                role_binding.selection.namespaces = vec![fallback_namespace.to_string()];
                defaulted += 1;
            }
        }
    }
    defaulted
}

/// Validate a newly created rule
///
/// Runs every check of [`validate_update`] and additionally rejects a `startTime`
/// that already lies in the past.
///
/// # Errors
///
/// Returns the first [`AdmissionError`] found.
pub fn validate_create(
    spec: &RBACRuleSpec,
    now: DateTime<Utc>,
) -> Result<TimeWindow, AdmissionError> {
    let window = validate_update(spec)?;
    if let Some(start) = window.start {
        if start < now {
            return Err(AdmissionError::StartInPast {
                start: start.to_rfc3339(),
            });
        }
    }
    Ok(window)
}

/// Validate an updated rule (structure and window ordering)
///
/// # Errors
///
/// Returns the first [`AdmissionError`] found.
pub fn validate_update(spec: &RBACRuleSpec) -> Result<TimeWindow, AdmissionError> {
    let window = spec.window()?;
    if let (Some(start), Some(end)) = (window.start, window.end) {
        if start > end {
            return Err(AdmissionError::StartAfterEnd {
                start: start.to_rfc3339(),
                end: end.to_rfc3339(),
            });
        }
    }

    for (index, binding) in spec.bindings.iter().enumerate() {
        if binding.name.trim().is_empty() {
            return Err(AdmissionError::UnnamedBinding { index });
        }
        if binding.role_bindings.is_empty() && binding.cluster_role_bindings.is_empty() {
            return Err(AdmissionError::NoRoles {
                binding: binding.name.clone(),
            });
        }
        if let Some(subject) = binding.subjects.iter().find(|s| s.name.trim().is_empty()) {
            return Err(AdmissionError::UnnamedSubject {
                binding: binding.name.clone(),
                kind: subject.kind.as_str(),
            });
        }
        let names_nothing = |name: &Option<String>| name.as_deref().is_none_or(|n| n.trim().is_empty());
        if binding
            .role_bindings
            .iter()
            .any(|rb| names_nothing(&rb.role) && names_nothing(&rb.cluster_role))
        {
            return Err(AdmissionError::EmptyRoleReference {
                binding: binding.name.clone(),
            });
        }
        if binding
            .cluster_role_bindings
            .iter()
            .any(|crb| crb.cluster_role.trim().is_empty())
        {
            return Err(AdmissionError::EmptyClusterRole {
                binding: binding.name.clone(),
            });
        }
    }

    Ok(window)
}

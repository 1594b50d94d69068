//! # Naming
//!
//! Deterministic names for generated objects and the ownership label that ties
//! them back to their RBACRule.
//!
//! Generated binding names have the form `{rule}-{binding}-{tag}-{role}`:
//!
//! | tag   | object                                   |
//! |-------|------------------------------------------|
//! | `rb`  | RoleBinding referencing a Role           |
//! | `rbc` | RoleBinding referencing a ClusterRole    |
//! | `crb` | ClusterRoleBinding                       |
//!
//! When the binding or role component contains a `-`, when sanitizing changes the
//! text, or when the result is too long, a digest of the raw components is appended
//! so that two different tuples can never produce the same name.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use crate::constants::OWNER_LABEL;
use crate::controller::parser::selector::{is_label_token, LabelQuery, SelectorError};

/// Maximum length of a DNS subdomain object name
const MAX_NAME_LENGTH: usize = 253;
/// Maximum length of a label value
const MAX_LABEL_VALUE_LENGTH: usize = 63;
/// Hex characters of digest appended to disambiguated names
const DIGEST_LENGTH: usize = 10;

/// Name of a RoleBinding; `tag` is `rb` for a Role reference, `rbc` for a ClusterRole
#[must_use]
pub fn role_binding_name(rule: &str, binding: &str, tag: &str, role: &str) -> String {
    generated_name(rule, binding, tag, role)
}

/// Name of a ClusterRoleBinding generated for `cluster_role`
#[must_use]
pub fn cluster_role_binding_name(rule: &str, binding: &str, cluster_role: &str) -> String {
    generated_name(rule, binding, "crb", cluster_role)
}

fn generated_name(rule: &str, binding: &str, tag: &str, role: &str) -> String {
    let raw = format!("{rule}-{binding}-{tag}-{role}");
    let sanitized = sanitize_dns_subdomain(&raw);
    let ambiguous = binding.contains('-') || role.contains('-');
    if sanitized == raw && !ambiguous && sanitized.len() <= MAX_NAME_LENGTH {
        return sanitized;
    }

    let suffix = digest(&[rule, binding, tag, role]);
    let keep = MAX_NAME_LENGTH - DIGEST_LENGTH - 1;
    let mut base: String = sanitized.chars().take(keep).collect();
    while base.ends_with(['-', '.']) {
        base.pop();
    }
    if base.is_empty() {
        suffix
    } else {
        format!("{base}-{suffix}")
    }
}

/// Value of the ownership label for a rule
///
/// The rule name, prefixed with `{namespace}.` for namespaced rules. Values that are
/// not valid label values (too long, bad characters) are shortened and suffixed
/// with a digest of the full value.
#[must_use]
pub fn owner_label_value(rule: &str, namespace: Option<&str>) -> String {
    let full = match namespace {
        Some(ns) if !ns.is_empty() => format!("{ns}.{rule}"),
        _ => rule.to_string(),
    };
    if is_label_token(&full) {
        return full;
    }

    let suffix = digest(&[&full]);
    let keep = MAX_LABEL_VALUE_LENGTH - DIGEST_LENGTH - 1;
    let mut base: String = full
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        .take(keep)
        .collect();
    while base.ends_with(|c: char| !c.is_ascii_alphanumeric()) {
        base.pop();
    }
    while base.starts_with(|c: char| !c.is_ascii_alphanumeric()) {
        base.remove(0);
    }
    if base.is_empty() {
        suffix
    } else {
        format!("{base}-{suffix}")
    }
}

/// Labels stamped on every object generated for a rule
#[must_use]
pub fn owner_labels(rule: &str, namespace: Option<&str>) -> BTreeMap<String, String> {
    BTreeMap::from([(OWNER_LABEL.to_string(), owner_label_value(rule, namespace))])
}

/// Query selecting every object generated for a rule
///
/// # Errors
///
/// Cannot fail for values produced by [`owner_label_value`]; the error is kept so a
/// broken label never turns into an unfiltered list.
pub fn owner_selector(rule: &str, namespace: Option<&str>) -> Result<LabelQuery, SelectorError> {
    LabelQuery::equals(OWNER_LABEL, &owner_label_value(rule, namespace))
}

/// Lowercase, map anything outside `[a-z0-9.-]` to `-`, trim non-alphanumeric ends
fn sanitize_dns_subdomain(raw: &str) -> String {
    let mapped: String = raw
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.' {
                c
            } else {
                '-'
            }
        })
        .collect();
    mapped
        .trim_matches(|c: char| !c.is_ascii_alphanumeric())
        .to_string()
}

fn digest(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update([0u8]);
        }
        hasher.update(part.as_bytes());
    }
    hasher
        .finalize()
        .iter()
        .take(DIGEST_LENGTH / 2)
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_names_are_readable() {
        assert_eq!(
            role_binding_name("access", "dev", "rb", "edit"),
            "access-dev-rb-edit"
        );
        assert_eq!(
            cluster_role_binding_name("access", "dev", "view"),
            "access-dev-crb-view"
        );
        // the rule name is fixed per resource and never forces a digest
        assert_eq!(
            role_binding_name("team-a-access", "dev", "rbc", "view"),
            "team-a-access-dev-rbc-view"
        );
    }

    #[test]
    fn test_names_are_deterministic() {
        let first = role_binding_name("access", "dev-team", "rb", "Edit:All");
        let second = role_binding_name("access", "dev-team", "rb", "Edit:All");
        assert_eq!(first, second);
        assert!(first.starts_with("access-dev-team-rb-edit-all-"));
    }

    #[test]
    fn test_dashes_cannot_collide() {
        // both would read `r-a-rb-b-rb-c` without disambiguation
        let one = role_binding_name("r", "a", "rb", "b-rb-c");
        let two = role_binding_name("r", "a-rb-b", "rb", "c");
        assert_ne!(one, two);
    }

    #[test]
    fn test_role_and_cluster_role_tags_differ() {
        assert_ne!(
            role_binding_name("r", "dev", "rb", "edit"),
            role_binding_name("r", "dev", "rbc", "edit")
        );
    }

    #[test]
    fn test_long_names_are_truncated_with_digest() {
        let long_role = "x".repeat(400);
        let name = role_binding_name("rule", "dev", "rb", &long_role);
        assert!(name.len() <= MAX_NAME_LENGTH);
        assert_ne!(name, role_binding_name("rule", "dev", "rb", &"x".repeat(401)));
    }

    #[test]
    fn test_owner_label_value() {
        assert_eq!(owner_label_value("access", None), "access");
        assert_eq!(owner_label_value("access", Some("ops")), "ops.access");

        let long = "a".repeat(120);
        let value = owner_label_value(&long, None);
        assert!(value.len() <= MAX_LABEL_VALUE_LENGTH);
        assert!(is_label_token(&value));
        assert_eq!(value, owner_label_value(&long, None));
    }

    #[test]
    fn test_owner_selector_matches_owner_labels() {
        let labels = owner_labels("access", None);
        let selector = owner_selector("access", None).unwrap();
        assert!(selector.matches(&labels));
        assert!(!selector.matches(&owner_labels("other", None)));
        assert_eq!(selector.to_string(), "rbac-controller.io/rbac-rule=access");
    }
}

//! # Label Queries
//!
//! Set-based label matching, as used by `namespaceSelector`, `namespaceMatchExpression`
//! and the ownership-label sweep.
//!
//! A [`LabelQuery`] is a conjunction of requirements. It can be built from a
//! `LabelSelector` object, parsed from the selector string syntax accepted by
//! `kubectl -l`, and rendered back to that syntax for API-server list calls.
//!
//! ```
//! use rbac_rule_controller::controller::parser::selector::LabelQuery;
//! use std::collections::BTreeMap;
//!
//! let query = LabelQuery::parse("env in (dev,qa),!legacy").unwrap();
//! let labels = BTreeMap::from([("env".to_string(), "qa".to_string())]);
//! assert!(query.matches(&labels));
//! assert_eq!(query.to_string(), "env in (dev,qa),!legacy");
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use thiserror::Error;

use crate::crd::{LabelSelectorRequirementSpec, LabelSelectorSpec};

/// Maximum length of a label name and of a label value
const MAX_LABEL_LENGTH: usize = 63;
/// Maximum length of a label key prefix (a DNS subdomain)
const MAX_PREFIX_LENGTH: usize = 253;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SelectorError {
    #[error("invalid label key {0:?}")]
    InvalidKey(String),
    #[error("invalid label value {value:?} for key {key:?}")]
    InvalidValue { key: String, value: String },
    #[error("unknown operator {operator:?} for key {key:?}")]
    UnknownOperator { key: String, operator: String },
    #[error("operator {operator} for key {key:?} requires at least one value")]
    MissingValues { key: String, operator: &'static str },
    #[error("operator {operator} for key {key:?} does not take values")]
    UnexpectedValues { key: String, operator: &'static str },
    #[error("malformed selector {input:?}: {reason}")]
    Malformed { input: String, reason: &'static str },
}

/// A single label requirement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    Equals { key: String, value: String },
    NotEquals { key: String, value: String },
    In { key: String, values: BTreeSet<String> },
    NotIn { key: String, values: BTreeSet<String> },
    Exists { key: String },
    DoesNotExist { key: String },
}

impl Requirement {
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Requirement::Equals { key, .. }
            | Requirement::NotEquals { key, .. }
            | Requirement::In { key, .. }
            | Requirement::NotIn { key, .. }
            | Requirement::Exists { key }
            | Requirement::DoesNotExist { key } => key,
        }
    }

    /// Evaluate against an object's labels
    #[must_use]
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let actual = labels.get(self.key());
        match self {
            Requirement::Equals { value, .. } => actual == Some(value),
            Requirement::NotEquals { value, .. } => actual != Some(value),
            Requirement::In { values, .. } => actual.is_some_and(|v| values.contains(v)),
            Requirement::NotIn { values, .. } => actual.is_none_or(|v| !values.contains(v)),
            Requirement::Exists { .. } => actual.is_some(),
            Requirement::DoesNotExist { .. } => actual.is_none(),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |values: &BTreeSet<String>| values.iter().cloned().collect::<Vec<_>>().join(",");
        match self {
            Requirement::Equals { key, value } => write!(f, "{key}={value}"),
            Requirement::NotEquals { key, value } => write!(f, "{key}!={value}"),
            Requirement::In { key, values } => write!(f, "{key} in ({})", join(values)),
            Requirement::NotIn { key, values } => write!(f, "{key} notin ({})", join(values)),
            Requirement::Exists { key } => f.write_str(key),
            Requirement::DoesNotExist { key } => write!(f, "!{key}"),
        }
    }
}

/// Conjunction of label requirements
///
/// An empty query matches every object. Callers that must not select everything
/// (the namespace resolver) check [`LabelQuery::is_empty`] first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelQuery {
    requirements: Vec<Requirement>,
}

impl LabelQuery {
    /// Query requiring `key=value`
    ///
    /// # Errors
    ///
    /// Fails when the key or value is not a valid label key/value.
    pub fn equals(key: &str, value: &str) -> Result<Self, SelectorError> {
        validate_key(key)?;
        validate_value(key, value)?;
        Ok(Self {
            requirements: vec![Requirement::Equals {
                key: key.to_string(),
                value: value.to_string(),
            }],
        })
    }

    /// Query requiring `key` to be present, whatever its value
    ///
    /// # Errors
    ///
    /// Fails when the key is not a valid label key.
    pub fn exists(key: &str) -> Result<Self, SelectorError> {
        validate_key(key)?;
        Ok(Self {
            requirements: vec![Requirement::Exists {
                key: key.to_string(),
            }],
        })
    }

    /// Build from a `LabelSelector` (`matchLabels` then `matchExpressions`)
    ///
    /// # Errors
    ///
    /// Fails on invalid keys or values, unknown operators, `In`/`NotIn` without values
    /// and `Exists`/`DoesNotExist` with values.
    pub fn from_selector(selector: &LabelSelectorSpec) -> Result<Self, SelectorError> {
        let mut requirements = Vec::with_capacity(
            selector.match_labels.len() + selector.match_expressions.len(),
        );
        for (key, value) in &selector.match_labels {
            validate_key(key)?;
            validate_value(key, value)?;
            requirements.push(Requirement::Equals {
                key: key.clone(),
                value: value.clone(),
            });
        }
        for expression in &selector.match_expressions {
            requirements.push(requirement_from_expression(expression)?);
        }
        Ok(Self { requirements })
    }

    /// Parse the selector string syntax, e.g. `env=dev,tier notin (db),!legacy`
    ///
    /// Blank input yields the empty query.
    ///
    /// # Errors
    ///
    /// Fails on unbalanced parentheses, empty terms, invalid keys or values and
    /// set operators other than `in` / `notin`.
    pub fn parse(input: &str) -> Result<Self, SelectorError> {
        if input.trim().is_empty() {
            return Ok(Self::default());
        }
        let requirements = split_terms(input)?
            .into_iter()
            .map(|term| parse_term(input, term))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { requirements })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    #[must_use]
    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    /// True when every requirement holds for `labels`
    #[must_use]
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }
}

impl fmt::Display for LabelQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, requirement) in self.requirements.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{requirement}")?;
        }
        Ok(())
    }
}

fn requirement_from_expression(
    expression: &LabelSelectorRequirementSpec,
) -> Result<Requirement, SelectorError> {
    let key = expression.key.clone();
    validate_key(&key)?;
    match expression.operator.as_str() {
        "In" | "NotIn" => {
            let operator = if expression.operator == "In" { "In" } else { "NotIn" };
            if expression.values.is_empty() {
                return Err(SelectorError::MissingValues { key, operator });
            }
            for value in &expression.values {
                validate_value(&key, value)?;
            }
            let values = expression.values.iter().cloned().collect();
            Ok(if operator == "In" {
                Requirement::In { key, values }
            } else {
                Requirement::NotIn { key, values }
            })
        }
        "Exists" | "DoesNotExist" => {
            let exists = expression.operator == "Exists";
            if !expression.values.is_empty() {
                let operator = if exists { "Exists" } else { "DoesNotExist" };
                return Err(SelectorError::UnexpectedValues { key, operator });
            }
            Ok(if exists {
                Requirement::Exists { key }
            } else {
                Requirement::DoesNotExist { key }
            })
        }
        other => Err(SelectorError::UnknownOperator {
            key,
            operator: other.to_string(),
        }),
    }
}

/// Split on commas outside parentheses
fn split_terms(input: &str) -> Result<Vec<&str>, SelectorError> {
    let malformed = |reason| SelectorError::Malformed {
        input: input.to_string(),
        reason,
    };
    let mut terms = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in input.char_indices() {
        match c {
            '(' => {
                if depth > 0 {
                    return Err(malformed("nested parentheses"));
                }
                depth += 1;
            }
            ')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| malformed("unbalanced parentheses"))?;
            }
            ',' if depth == 0 => {
                terms.push(input[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(malformed("unbalanced parentheses"));
    }
    terms.push(input[start..].trim());
    if terms.iter().any(|t| t.is_empty()) {
        return Err(malformed("empty requirement"));
    }
    Ok(terms)
}

fn parse_term(input: &str, term: &str) -> Result<Requirement, SelectorError> {
    let malformed = |reason| SelectorError::Malformed {
        input: input.to_string(),
        reason,
    };

    if let Some(open) = term.find('(') {
        let close = term
            .rfind(')')
            .filter(|close| *close > open)
            .ok_or_else(|| malformed("unbalanced parentheses"))?;
        if !term[close + 1..].trim().is_empty() {
            return Err(malformed("trailing characters after value set"));
        }
        let mut head = term[..open].split_whitespace();
        let (Some(key), Some(operator), None) = (head.next(), head.next(), head.next()) else {
            return Err(malformed("expected `<key> in (...)` or `<key> notin (...)`"));
        };
        let key = key.to_string();
        validate_key(&key)?;
        let values = term[open + 1..close]
            .split(',')
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| validate_value(&key, v).map(|()| v.to_string()))
            .collect::<Result<BTreeSet<_>, _>>()?;
        return match operator {
            "in" | "notin" if values.is_empty() => Err(SelectorError::MissingValues {
                key,
                operator: if operator == "in" { "in" } else { "notin" },
            }),
            "in" => Ok(Requirement::In { key, values }),
            "notin" => Ok(Requirement::NotIn { key, values }),
            other => Err(SelectorError::UnknownOperator {
                key,
                operator: other.to_string(),
            }),
        };
    }

    if let Some(key) = term.strip_prefix('!') {
        let key = key.trim().to_string();
        validate_key(&key)?;
        return Ok(Requirement::DoesNotExist { key });
    }

    let binary = if let Some((key, value)) = term.split_once("!=") {
        Some((key, value, false))
    } else if let Some((key, value)) = term.split_once("==") {
        Some((key, value, true))
    } else {
        term.split_once('=').map(|(key, value)| (key, value, true))
    };

    match binary {
        Some((key, value, equals)) => {
            let key = key.trim().to_string();
            let value = value.trim().to_string();
            validate_key(&key)?;
            validate_value(&key, &value)?;
            Ok(if equals {
                Requirement::Equals { key, value }
            } else {
                Requirement::NotEquals { key, value }
            })
        }
        None => {
            let key = term.to_string();
            validate_key(&key)?;
            Ok(Requirement::Exists { key })
        }
    }
}

/// `[prefix/]name` where prefix is a DNS subdomain and name a label name
fn validate_key(key: &str) -> Result<(), SelectorError> {
    let invalid = || SelectorError::InvalidKey(key.to_string());
    let (prefix, name) = match key.rsplit_once('/') {
        Some((prefix, name)) => (Some(prefix), name),
        None => (None, key),
    };
    if name.is_empty() || !is_label_token(name) {
        return Err(invalid());
    }
    if let Some(prefix) = prefix {
        let valid_prefix = !prefix.is_empty()
            && prefix.len() <= MAX_PREFIX_LENGTH
            && prefix.split('.').all(|part| {
                !part.is_empty()
                    && part
                        .chars()
                        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
                    && !part.starts_with('-')
                    && !part.ends_with('-')
            });
        if !valid_prefix {
            return Err(invalid());
        }
    }
    Ok(())
}

fn validate_value(key: &str, value: &str) -> Result<(), SelectorError> {
    if value.is_empty() || is_label_token(value) {
        Ok(())
    } else {
        Err(SelectorError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        })
    }
}

/// Label name / value shape: at most 63 characters of `[A-Za-z0-9._-]`,
/// beginning and ending with an alphanumeric
pub(crate) fn is_label_token(s: &str) -> bool {
    let bytes = s.as_bytes();
    !bytes.is_empty()
        && bytes.len() <= MAX_LABEL_LENGTH
        && bytes[0].is_ascii_alphanumeric()
        && bytes[bytes.len() - 1].is_ascii_alphanumeric()
        && bytes
            .iter()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
}

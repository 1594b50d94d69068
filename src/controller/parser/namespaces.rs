//! # Namespace Resolver
//!
//! Turns a [`NamespaceSelection`] into namespace names: the explicit list, then the
//! namespaces matched by `namespaceSelector`, then those matched by
//! `namespaceMatchExpression`. Duplicates are left for the expander to remove.

use k8s_openapi::api::core::v1::Namespace;
use kube::ResourceExt;
use tracing::debug;

use crate::controller::parser::selector::LabelQuery;
use crate::controller::parser::ExpansionError;
use crate::controller::store::ObjectStore;
use crate::crd::NamespaceSelection;

/// Resolve a selection rule to namespace names
///
/// An empty selector resolves to nothing, never to every namespace.
///
/// # Errors
///
/// [`ExpansionError::Selector`] for an invalid selector or match expression,
/// [`ExpansionError::Store`] when namespaces cannot be listed.
pub async fn resolve<S: ObjectStore>(
    store: &S,
    selection: &NamespaceSelection,
) -> Result<Vec<String>, ExpansionError> {
    let mut resolved: Vec<String> = selection
        .namespaces
        .iter()
        .map(|ns| ns.trim())
        .filter(|ns| !ns.is_empty())
        .map(str::to_string)
        .collect();

    if let Some(selector) = &selection.namespace_selector {
        let query = LabelQuery::from_selector(selector)?;
        resolved.extend(matching_namespaces(store, &query).await?);
    }

    if let Some(expression) = selection
        .namespace_match_expression
        .as_deref()
        .map(str::trim)
        .filter(|expr| !expr.is_empty())
    {
        let query = LabelQuery::parse(expression)?;
        resolved.extend(matching_namespaces(store, &query).await?);
    }

    Ok(resolved)
}

async fn matching_namespaces<S: ObjectStore>(
    store: &S,
    query: &LabelQuery,
) -> Result<Vec<String>, ExpansionError> {
    if query.is_empty() {
        return Ok(Vec::new());
    }
    let mut names: Vec<String> = store
        .list::<Namespace>(None, query)
        .await?
        .iter()
        .map(ResourceExt::name_any)
        .collect();
    names.sort();
    debug!(selector = %query, matched = names.len(), "Resolved namespace selector");
    Ok(names)
}

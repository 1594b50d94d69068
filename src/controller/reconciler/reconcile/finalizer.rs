//! # Finalizer
//!
//! The cleanup finalizer keeps a deleted RBACRule around until its generated
//! objects are gone.

use crate::constants::RBAC_RULE_FINALIZER;
use crate::controller::reconciler::types::{Reconciler, ReconcilerError};
use crate::controller::store::{ObjectStore, StoreError};
use crate::crd::RBACRule;
use kube::ResourceExt;
use tracing::{debug, info};

#[must_use]
pub fn has_finalizer(rule: &RBACRule) -> bool {
    rule.finalizers().iter().any(|f| f == RBAC_RULE_FINALIZER)
}

/// Attach the finalizer with a single update
///
/// A concurrent writer surfaces as a conflict; the retry re-reads the rule and
/// finds the finalizer either present or still missing.
pub async fn ensure<S: ObjectStore>(
    ctx: &Reconciler<S>,
    rule: &mut RBACRule,
) -> Result<(), ReconcilerError> {
    if has_finalizer(rule) {
        return Ok(());
    }
    rule.finalizers_mut().push(RBAC_RULE_FINALIZER.to_string());
    *rule = ctx
        .store
        .replace(rule)
        .await
        .map_err(|source| ReconcilerError::Update {
            name: rule.name_any(),
            source,
        })?;
    info!("Added cleanup finalizer");
    Ok(())
}

/// Drop the finalizer, letting the pending delete complete
pub async fn remove<S: ObjectStore>(
    ctx: &Reconciler<S>,
    rule: &mut RBACRule,
) -> Result<(), ReconcilerError> {
    if !has_finalizer(rule) {
        return Ok(());
    }
    rule.finalizers_mut().retain(|f| f != RBAC_RULE_FINALIZER);
    match ctx.store.replace(rule).await {
        Ok(updated) => *rule = updated,
        Err(StoreError::NotFound) => debug!("RBACRule already gone while removing finalizer"),
        Err(source) => {
            return Err(ReconcilerError::Update {
                name: rule.name_any(),
                source,
            })
        }
    }
    info!("Removed cleanup finalizer");
    Ok(())
}

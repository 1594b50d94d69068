//! # Reconciliation Logic
//!
//! One pass of the RBACRule state machine.
//!
//! ```text
//! not found ──────────────────────────────► done
//! deletion requested ─► cleanup sweep ─────► finalizer removed
//! no finalizer ─► attach finalizer
//! invalid spec ─► Failed (wait for a spec change)
//! endTime passed ─► delete the rule
//! startTime ahead ─► Pending, wake at startTime
//! apply bindings ─► Active, wake at endTime (if set)
//! ```
//!
//! Time gates never sleep: the pass returns an [`Action`] asking to be requeued at
//! the instant of interest.

mod apply;
mod cleanup;
mod finalizer;

pub use apply::ApplyOutcome;
pub use finalizer::has_finalizer;

use crate::controller::reconciler::status::set_phase;
use crate::controller::reconciler::types::{Reconciler, ReconcilerError};
use crate::controller::store::{ObjectStore, StoreError};
use crate::crd::admission::{default_rule, validate_update};
use crate::crd::{RBACRule, RulePhase};
use crate::observability;
use chrono::{DateTime, Utc};
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn, Instrument};

/// Main reconciliation function
///
/// Errors are handled by the error policy of the watch loop, which applies
/// per-resource exponential backoff.
pub async fn reconcile<S: ObjectStore>(
    rule: Arc<RBACRule>,
    ctx: Arc<Reconciler<S>>,
) -> Result<Action, ReconcilerError> {
    reconcile_at(rule, ctx, Utc::now()).await
}

/// [`reconcile`] evaluated at a fixed instant
pub async fn reconcile_at<S: ObjectStore>(
    rule: Arc<RBACRule>,
    ctx: Arc<Reconciler<S>>,
    now: DateTime<Utc>,
) -> Result<Action, ReconcilerError> {
    let name = rule.name_any();
    let span = tracing::info_span!(
        "reconcile",
        rule = %name,
        pass_id = %uuid::Uuid::new_v4(),
    );

    async move {
        let start = Instant::now();
        observability::metrics::increment_reconciliations();
        debug!("Reconciling RBACRule");

        let result = run_pass(&ctx, &name, now).await;

        observability::metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());
        if result.is_ok() && ctx.reset_backoff(&name) {
            info!("🔄 Backoff reset after successful reconciliation");
        }
        result
    }
    .instrument(span)
    .await
}

async fn run_pass<S: ObjectStore>(
    ctx: &Reconciler<S>,
    name: &str,
    now: DateTime<Utc>,
) -> Result<Action, ReconcilerError> {
    let mut rule = match ctx.store.get::<RBACRule>(None, name).await {
        Ok(rule) => rule,
        Err(StoreError::NotFound) => {
            debug!("RBACRule no longer exists, nothing to do");
            return Ok(Action::await_change());
        }
        Err(source) => {
            return Err(ReconcilerError::Fetch {
                name: name.to_string(),
                source,
            })
        }
    };

    if rule.metadata.deletion_timestamp.is_some() {
        return cleanup::finalize(ctx, rule).await;
    }

    finalizer::ensure(ctx, &mut rule).await?;

    let mut spec = rule.spec.clone();
    let defaulted = default_rule(&mut spec, &ctx.config.default_namespace);
    if defaulted > 0 {
        debug!(
            defaulted,
            namespace = %ctx.config.default_namespace,
            "Defaulted namespace selection"
        );
    }

    let window = match validate_update(&spec) {
        Ok(window) => window,
        Err(e) => {
            warn!(error = %e, "RBACRule spec is invalid");
            set_phase(ctx, &mut rule, RulePhase::Failed, Some(&e.to_string())).await?;
            return Ok(Action::await_change());
        }
    };

    if let Some(end) = window.end.filter(|end| *end <= now) {
        info!(end_time = %end.to_rfc3339(), "End time has passed, deleting RBACRule");
        return match ctx.store.delete::<RBACRule>(None, name).await {
            Ok(()) | Err(StoreError::NotFound) => Ok(Action::await_change()),
            Err(source) => Err(ReconcilerError::Update {
                name: name.to_string(),
                source,
            }),
        };
    }

    if let Some(start) = window.start.filter(|start| *start > now) {
        let wait = (start - now).to_std().unwrap_or_default();
        let message = format!("waiting for start time {}", start.to_rfc3339());
        set_phase(ctx, &mut rule, RulePhase::Pending, Some(&message)).await?;
        info!(
            "📅 Rule not active yet, next reconciliation at {} (in {}s)",
            start.to_rfc3339(),
            wait.as_secs()
        );
        observability::metrics::increment_requeues_total("start-time");
        return Ok(Action::requeue(wait));
    }

    match apply::apply_rule(ctx, &mut rule, &spec).await? {
        ApplyOutcome::Retry => {
            observability::metrics::increment_requeues_total("object-retry");
            return Ok(Action::requeue(ctx.config.object_retry_delay()));
        }
        ApplyOutcome::Applied { failed_bindings } if failed_bindings.is_empty() => {
            set_phase(ctx, &mut rule, RulePhase::Active, None).await?;
        }
        ApplyOutcome::Applied { failed_bindings } => {
            let message = format!(
                "bindings not applied: {}",
                failed_bindings.join(", ")
            );
            set_phase(ctx, &mut rule, RulePhase::Active, Some(&message)).await?;
        }
    }

    match window.end {
        Some(end) => {
            let wait = (end - now).to_std().unwrap_or_default();
            info!(
                "📅 RBACRule scheduled for deletion at {} (in {}s)",
                end.to_rfc3339(),
                wait.as_secs()
            );
            observability::metrics::increment_requeues_total("end-time");
            Ok(Action::requeue(wait))
        }
        None => {
            info!("✅ RBACRule applied");
            Ok(Action::await_change())
        }
    }
}

//! # Status Phase Updates
//!
//! Phase transitions and the `Ready` condition.

use super::write_status;
use crate::controller::reconciler::types::{Reconciler, ReconcilerError};
use crate::controller::store::ObjectStore;
use crate::crd::{Condition, RBACRule, RulePhase};
use chrono::{SecondsFormat, Utc};
use tracing::debug;

/// Set the phase and `Ready` condition of `rule`
///
/// Skips the write when phase, message and observed generation are unchanged, so
/// steady-state passes do not generate watch events. The condition's transition time
/// only moves when its status flips.
pub async fn set_phase<S: ObjectStore>(
    ctx: &Reconciler<S>,
    rule: &mut RBACRule,
    phase: RulePhase,
    message: Option<&str>,
) -> Result<(), ReconcilerError> {
    let generation = rule.metadata.generation;
    let mut status = rule.status.clone().unwrap_or_default();
    let previous = status.ready_condition().cloned();

    if status.phase == Some(phase)
        && status.observed_generation == generation
        && previous.as_ref().and_then(|c| c.message.as_deref()) == message
    {
        debug!(phase = %phase, "Skipping status update - phase unchanged");
        return Ok(());
    }

    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    let ready = if phase == RulePhase::Active && message.is_none() {
        "True"
    } else {
        "False"
    };
    let reason = match (phase, message) {
        (RulePhase::Active, None) => "Applied",
        (RulePhase::Active, Some(_)) => "PartiallyApplied",
        (RulePhase::Pending, _) => "WaitingForStartTime",
        (RulePhase::Terminating, _) => "Terminating",
        (RulePhase::Failed, _) => "InvalidSpec",
    };
    let last_transition_time = match previous {
        Some(condition) if condition.status == ready => condition.last_transition_time,
        _ => Some(now.clone()),
    };

    status.conditions.retain(|c| c.r#type != "Ready");
    status.conditions.push(Condition {
        r#type: "Ready".to_string(),
        status: ready.to_string(),
        last_transition_time,
        reason: Some(reason.to_string()),
        message: message.map(str::to_string),
    });
    status.phase = Some(phase);
    status.observed_generation = generation;
    status.last_reconcile_time = Some(now);
    rule.status = Some(status);

    debug!(phase = %phase, ready, reason, "Updating status phase");
    write_status(ctx, rule).await
}

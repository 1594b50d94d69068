//! # Error Policy
//!
//! Error handling and backoff logic for the controller watch loop.
//! This module handles reconciliation errors and watch stream errors.

use crate::controller::reconciler::{Reconciler, ReconcilerError};
use crate::controller::store::ObjectStore;
use crate::crd::RBACRule;
use crate::observability;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Instrument};

/// Handle reconciliation errors with per-resource exponential backoff
pub fn handle_reconciliation_error<S: ObjectStore>(
    rule: Arc<RBACRule>,
    error: &ReconcilerError,
    ctx: Arc<Reconciler<S>>,
) -> Action {
    let name = rule.name_any();

    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "controller.watch.reconciliation_error",
        rule = %name,
        error = %error
    );
    let _error_guard = error_span.enter();

    error!("Reconciliation error for {}: {:?}", name, error);
    observability::metrics::increment_reconciliation_errors();

    let (delay, error_count) = ctx.next_backoff(&name);
    let next_trigger_time =
        chrono::Utc::now() + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());

    info!(
        "🔄 Retrying with exponential backoff: {}ms (error count: {})",
        delay.as_millis(),
        error_count
    );
    info!(
        "📅 Next retry scheduled: {}",
        next_trigger_time.to_rfc3339()
    );

    observability::metrics::increment_requeues_total("error-backoff");
    Action::requeue(delay)
}

/// Kind of failure seen on the watch stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorKind {
    NotFound,
    Unauthorized,
    Expired,
    Throttled,
    Other,
}

/// Classify a watch stream error from its debug rendering
///
/// 404 is checked before 401: a plain-text 404 body can surface as a decode error
/// mentioning `WatchFailed`.
#[must_use]
pub fn classify_watch_error(error_string: &str) -> WatchErrorKind {
    let is_not_found = error_string.contains("ObjectNotFound")
        || error_string.contains("404")
        || error_string.contains("not found");
    if is_not_found {
        return WatchErrorKind::NotFound;
    }
    if error_string.contains("401") || error_string.contains("Unauthorized") {
        return WatchErrorKind::Unauthorized;
    }
    if error_string.contains("410")
        || error_string.contains("too old resource version")
        || error_string.contains("Expired")
        || error_string.contains("Gone")
    {
        return WatchErrorKind::Expired;
    }
    if error_string.contains("429")
        || error_string.contains("storage is (re)initializing")
        || error_string.contains("TooManyRequests")
    {
        return WatchErrorKind::Throttled;
    }
    WatchErrorKind::Other
}

/// Handle watch stream errors with appropriate classification and backoff
///
/// Returns `None` to filter out the error (allow restart) or `Some(())` to continue.
pub async fn handle_watch_stream_error(
    error_string: &str,
    backoff: &Arc<AtomicU64>,
    max_backoff_ms: u64,
    watch_restart_delay: Duration,
) -> Option<()> {
    let error_span = tracing::span!(
        tracing::Level::WARN,
        "controller.watch.error",
        error = %error_string
    );

    async {
        match classify_watch_error(error_string) {
            WatchErrorKind::Unauthorized => {
                error!("❌ Watch authentication failed (401 Unauthorized) - RBAC may have been revoked or token expired");
                error!("   Verify the controller ClusterRole can list and watch rbacrules, namespaces, serviceaccounts, rolebindings and clusterrolebindings");
                warn!(
                    "⏳ Waiting {}s before retrying watch...",
                    watch_restart_delay.as_secs()
                );
                tokio::time::sleep(watch_restart_delay).await;
                None
            }
            WatchErrorKind::Expired => {
                warn!("Watch resource version expired (410), watch will restart");
                None
            }
            WatchErrorKind::Throttled => {
                let current_backoff = backoff.load(Ordering::Relaxed);
                warn!(
                    "API server throttling or reinitializing (429), backing off for {}ms before restart...",
                    current_backoff
                );
                tokio::time::sleep(Duration::from_millis(current_backoff)).await;
                backoff.store(
                    current_backoff.saturating_mul(2).min(max_backoff_ms),
                    Ordering::Relaxed,
                );
                None
            }
            WatchErrorKind::NotFound => {
                warn!(
                    "Resource not found (404) - normal for deleted objects, or the RBACRule CRD is missing. Error: {}",
                    error_string
                );
                Some(())
            }
            WatchErrorKind::Other => {
                error!("Controller stream error: {}", error_string);
                tokio::time::sleep(watch_restart_delay).await;
                None
            }
        }
    }
    .instrument(error_span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ControllerConfig;
    use crate::controller::store::InMemoryStore;

    #[test]
    fn test_classify_watch_error() {
        assert_eq!(
            classify_watch_error("Api(ErrorResponse { code: 404, reason: \"NotFound\" })"),
            WatchErrorKind::NotFound
        );
        assert_eq!(
            classify_watch_error("WatchFailed(Unauthorized)"),
            WatchErrorKind::Unauthorized
        );
        assert_eq!(
            classify_watch_error("too old resource version: 123"),
            WatchErrorKind::Expired
        );
        assert_eq!(
            classify_watch_error("TooManyRequests"),
            WatchErrorKind::Throttled
        );
        assert_eq!(classify_watch_error("connection reset"), WatchErrorKind::Other);
    }

    #[test]
    fn test_watch_error_handler_can_be_spawned() {
        fn assert_send<T: Send>(_: &T) {}
        let backoff = Arc::new(AtomicU64::new(1));
        let handler = handle_watch_stream_error("connection reset", &backoff, 3, Duration::ZERO);
        assert_send(&handler);
    }

    #[tokio::test]
    async fn test_throttled_errors_double_backoff() {
        let backoff = Arc::new(AtomicU64::new(1));
        let outcome =
            handle_watch_stream_error("429 TooManyRequests", &backoff, 3, Duration::ZERO).await;
        assert!(outcome.is_none());
        assert_eq!(backoff.load(Ordering::Relaxed), 2);
        handle_watch_stream_error("429 TooManyRequests", &backoff, 3, Duration::ZERO).await;
        assert_eq!(backoff.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_reconciliation_errors_back_off_per_rule() {
        let ctx = Arc::new(Reconciler::new(
            InMemoryStore::new(),
            ControllerConfig::default(),
        ));
        let mut rule = RBACRule::new("access", serde_json::from_value(serde_json::json!({
            "bindings": []
        })).unwrap());
        rule.metadata.uid = Some("uid-1".to_string());
        let rule = Arc::new(rule);
        let error = ReconcilerError::Fetch {
            name: "access".to_string(),
            source: crate::controller::store::StoreError::Conflict,
        };

        let first = handle_reconciliation_error(rule.clone(), &error, ctx.clone());
        let second = handle_reconciliation_error(rule, &error, ctx);
        assert_eq!(first, Action::requeue(Duration::from_secs(1)));
        assert_eq!(second, Action::requeue(Duration::from_secs(2)));
    }
}

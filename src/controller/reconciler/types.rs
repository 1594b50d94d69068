//! # Types
//!
//! Core types for the reconciler.

use crate::config::ControllerConfig;
use crate::controller::backoff::ExponentialBackoff;
use crate::controller::parser::selector::SelectorError;
use crate::controller::store::{KubeStore, ObjectStore, StoreError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

/// Errors returned to the error policy, which retries them with exponential backoff
///
/// Failures on generated objects are not here: they are retried with a short fixed
/// delay from inside the reconciler. Only failures that a retry cannot fix (a decode
/// failure, or a write the API server rejects as invalid) escalate as
/// [`ReconcilerError::Object`].
#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("failed to fetch RBACRule {name}: {source}")]
    Fetch {
        name: String,
        #[source]
        source: StoreError,
    },
    #[error("failed to update RBACRule {name}: {source}")]
    Update {
        name: String,
        #[source]
        source: StoreError,
    },
    #[error("failed to write status of RBACRule {name}: {source}")]
    Status {
        name: String,
        #[source]
        source: StoreError,
    },
    #[error("failed to clean up {kind} {object} owned by RBACRule {name}: {source}")]
    Cleanup {
        name: String,
        kind: &'static str,
        object: String,
        #[source]
        source: StoreError,
    },
    #[error("cannot build ownership selector for RBACRule {name}: {source}")]
    Selector {
        name: String,
        #[source]
        source: SelectorError,
    },
    #[error("unexpected {kind} {object}: {source}")]
    Object {
        kind: &'static str,
        object: String,
        #[source]
        source: StoreError,
    },
}

/// Backoff state for a specific resource
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: ExponentialBackoff,
    pub error_count: u32,
}

impl BackoffState {
    #[must_use]
    pub fn new(config: &ControllerConfig) -> Self {
        Self {
            backoff: ExponentialBackoff::new(
                config.backoff_start_duration(),
                config.backoff_max_duration(),
            ),
            error_count: 0,
        }
    }

    pub fn increment_error(&mut self) {
        self.error_count += 1;
    }

    pub fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

/// Shared reconciliation context
///
/// Holds no per-rule state besides the backoff map; concurrent reconciliations of
/// different rules only meet in the store.
pub struct Reconciler<S: ObjectStore = KubeStore> {
    pub store: S,
    pub config: ControllerConfig,
    /// Backoff state per rule name, owned by the error policy
    pub backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl<S: ObjectStore> std::fmt::Debug for Reconciler<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S: ObjectStore> Reconciler<S> {
    #[must_use]
    pub fn new(store: S, config: ControllerConfig) -> Self {
        Self {
            store,
            config,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Record a failure for `rule` and return the delay before its next attempt
    /// together with the consecutive error count
    pub fn next_backoff(&self, rule: &str) -> (std::time::Duration, u32) {
        let mut states = self
            .backoff_states
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let state = states
            .entry(rule.to_string())
            .or_insert_with(|| BackoffState::new(&self.config));
        state.increment_error();
        (state.backoff.next_backoff(), state.error_count)
    }

    /// Forget past failures of `rule`; returns whether it was backing off
    pub fn reset_backoff(&self, rule: &str) -> bool {
        let mut states = self
            .backoff_states
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        states.remove(rule).is_some_and(|state| state.error_count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::store::InMemoryStore;
    use std::time::Duration;

    #[test]
    fn test_backoff_is_tracked_per_rule() {
        let reconciler = Reconciler::new(InMemoryStore::new(), ControllerConfig::default());
        assert_eq!(reconciler.next_backoff("a"), (Duration::from_secs(1), 1));
        assert_eq!(reconciler.next_backoff("a"), (Duration::from_secs(2), 2));
        assert_eq!(reconciler.next_backoff("b"), (Duration::from_secs(1), 1));

        assert!(reconciler.reset_backoff("a"));
        assert!(!reconciler.reset_backoff("a"));
        assert_eq!(reconciler.next_backoff("a"), (Duration::from_secs(1), 1));
    }
}

//! # Watch Loop
//!
//! Controller watch loop that monitors RBACRule resources, and the objects they
//! generate, and triggers reconciliation when changes are detected.
//!
//! Generated ServiceAccounts, RoleBindings and ClusterRoleBindings are watched
//! through the ownership label, created Namespaces (which carry no label) through
//! an unfiltered watch. Events map back to every rule named in the owner references,
//! so an edited or deleted binding is restored on the next pass.
//!
//! SIGINT and SIGTERM mark the server not ready and stop the controller after its
//! in-flight reconciliations finish; the loop then exits instead of restarting.

use crate::config::ControllerConfig;
use crate::constants::OWNER_LABEL;
use crate::controller::parser::references_rule;
use crate::controller::reconciler::{reconcile, Reconciler};
use crate::controller::server::ServerState;
use crate::controller::store::KubeStore;
use crate::crd::RBACRule;
use crate::runtime::error_policy::{handle_reconciliation_error, handle_watch_stream_error};
use futures::{FutureExt, StreamExt};
use k8s_openapi::api::core::v1::{Namespace, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRoleBinding, RoleBinding};
use kube::api::Api;
use kube::{Client, Resource, ResourceExt};
use kube_runtime::controller::Config as ControllerRunConfig;
use kube_runtime::reflector::ObjectRef;
use kube_runtime::{watcher, Controller};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Rules owning `object`, taken from its `RBACRule` owner references
///
/// Controller and plain references both count: a ServiceAccount shared by two
/// rules wakes both of them.
pub fn owning_rules<K: Resource>(object: &K) -> Vec<ObjectRef<RBACRule>> {
    object
        .owner_references()
        .iter()
        .filter(|owner| references_rule(owner))
        .map(|owner| ObjectRef::new(&owner.name))
        .collect()
}

/// Wait for SIGINT or SIGTERM and name the signal received
pub async fn wait_for_signal() -> &'static str {
    let interrupt = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => "SIGINT",
            Err(e) => {
                error!("Failed to listen for SIGINT: {}", e);
                std::future::pending().await
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                "SIGTERM"
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending().await
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<&'static str>();

    tokio::select! {
        received = interrupt => received,
        received = terminate => received,
    }
}

/// Mark the server not ready once `signal` fires
///
/// Readiness drops before the future resolves, so a controller stopped by it
/// never sees a ready server and is not restarted.
pub async fn shutdown_on(signal: impl Future<Output = &'static str>, server_state: Arc<ServerState>) {
    let received = signal.await;
    info!("Received {}, initiating graceful shutdown...", received);
    server_state.is_ready.store(false, Ordering::Relaxed);
    info!("Marked server as not ready, waiting for in-flight reconciliations to complete...");
}

/// Run the controller watch loop
///
/// Restarts the controller after the stream ends or fails, until a shutdown
/// signal marks the server not ready.
pub async fn run_watch_loop(
    client: Client,
    rules: Api<RBACRule>,
    reconciler: Arc<Reconciler<KubeStore>>,
    server_state: Arc<ServerState>,
) -> Result<(), anyhow::Error> {
    let config: ControllerConfig = reconciler.config.clone();
    let backoff_duration_ms = Arc::new(AtomicU64::new(config.backoff_start_ms));

    // shared so every controller restart waits on the same signal
    let shutdown = shutdown_on(wait_for_signal(), server_state.clone())
        .boxed()
        .shared();
    tokio::spawn(shutdown.clone());

    loop {
        if !server_state.is_ready.load(Ordering::Relaxed) {
            info!("Shutdown requested, exiting watch loop");
            break;
        }

        let owned = watcher::Config::default().labels(OWNER_LABEL);
        let backoff = backoff_duration_ms.clone();
        let backoff_start_ms = config.backoff_start_ms;
        let backoff_max_ms = config.backoff_max_ms;
        let restart_delay = config.watch_restart_delay_duration();

        info!("Starting controller watch loop...");
        Controller::new(rules.clone(), watcher::Config::default().any_semantic())
            .with_config(
                ControllerRunConfig::default().concurrency(config.max_concurrent_reconciliations),
            )
            .watches(
                Api::<ServiceAccount>::all(client.clone()),
                owned.clone(),
                |sa| owning_rules(&sa),
            )
            .watches(
                Api::<RoleBinding>::all(client.clone()),
                owned.clone(),
                |rb| owning_rules(&rb),
            )
            .watches(
                Api::<ClusterRoleBinding>::all(client.clone()),
                owned,
                |crb| owning_rules(&crb),
            )
            .watches(
                Api::<Namespace>::all(client.clone()),
                watcher::Config::default(),
                |ns| owning_rules(&ns),
            )
            .graceful_shutdown_on(shutdown.clone())
            .run(reconcile, handle_reconciliation_error, reconciler.clone())
            .filter_map(move |event| {
                let backoff = backoff.clone();
                async move {
                    match event {
                        Ok((rule, action)) => {
                            backoff.store(backoff_start_ms, Ordering::Relaxed);
                            debug!(rule = %rule.name, ?action, "watch.event.reconciled");
                            Some(())
                        }
                        Err(e) => {
                            let error_string = format!("{e:?}");
                            handle_watch_stream_error(
                                &error_string,
                                &backoff,
                                backoff_max_ms,
                                restart_delay,
                            )
                            .await
                        }
                    }
                }
            })
            .for_each(|()| futures::future::ready(()))
            .await;

        if !server_state.is_ready.load(Ordering::Relaxed) {
            info!("Shutdown requested, exiting watch loop");
            break;
        }

        let delay = config.watch_restart_delay_after_end_duration();
        warn!(
            "Controller watch stream ended, restarting in {} seconds...",
            delay.as_secs()
        );
        tokio::time::sleep(delay).await;
    }

    info!("Controller stopped gracefully");
    Ok(())
}

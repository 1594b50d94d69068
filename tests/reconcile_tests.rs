//! # Reconciliation Tests
//!
//! Drives whole passes of the state machine against the in-memory store:
//! finalizer handling, time gating, idempotent upsert, status bookkeeping and the
//! cleanup sweep.

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use common::{all, create_namespace, create_rule, fetch_rule, owned, reconciler};
use k8s_openapi::api::core::v1::{Namespace, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRoleBinding, RoleBinding};
use kube::ResourceExt;
use kube_runtime::controller::Action;
use rbac_rule_controller::constants::{OWNER_LABEL, RBAC_RULE_FINALIZER};
use rbac_rule_controller::controller::reconciler::{
    reconcile, reconcile_at, Reconciler, ReconcilerError,
};
use rbac_rule_controller::controller::store::{
    InMemoryStore, ObjectStore, Operation, StoreError, CONCURRENT_WRITE_ANNOTATION,
};
use rbac_rule_controller::crd::{RBACRule, RulePhase};

const ACCESS: &str = r#"
bindings:
  - name: dev
    subjects:
      - kind: ServiceAccount
        name: sa1
        namespaces: [team-a, team-b]
      - kind: User
        name: alice
    roleBindings:
      - role: edit
        namespaces: [team-a, team-b]
    clusterRoleBindings:
      - clusterRole: view
"#;

fn at(hour: u32, min: u32, sec: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2030, 1, 1, hour, min, sec)
        .single()
        .expect("Should be a valid instant")
}

fn versions<K: kube::Resource>(objects: &[K]) -> Vec<(String, Option<String>)> {
    objects
        .iter()
        .map(|o| (o.name_any(), o.resource_version()))
        .collect()
}

fn ids(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|i| (*i).to_string()).collect()
}

#[tokio::test]
async fn test_first_pass_applies_everything_and_records_status() {
    let (store, ctx) = reconciler();
    let rule = create_rule(&store, "access", ACCESS).await;

    let action = reconcile(rule, ctx).await.expect("Should reconcile");
    assert_eq!(action, Action::await_change());

    let rule = fetch_rule(&store, "access").await.expect("Should still exist");
    assert!(rule.finalizers().iter().any(|f| f == RBAC_RULE_FINALIZER));

    let status = rule.status.expect("Should have a status");
    assert_eq!(status.phase, Some(RulePhase::Active));
    let ready = status.ready_condition().expect("Should have a Ready condition");
    assert_eq!(ready.status, "True");
    assert_eq!(
        status.role_bindings,
        ids(&["team-a/access-dev-rb-edit", "team-b/access-dev-rb-edit"])
    );
    assert_eq!(status.cluster_role_bindings, ids(&["access-dev-crb-view"]));

    assert_eq!(owned::<RoleBinding>(&store, "access").await.len(), 2);
    assert_eq!(owned::<ClusterRoleBinding>(&store, "access").await.len(), 1);
    assert_eq!(owned::<ServiceAccount>(&store, "access").await.len(), 2);

    let namespaces: Vec<String> = all::<Namespace>(&store)
        .await
        .iter()
        .map(ResourceExt::name_any)
        .collect();
    assert_eq!(namespaces, vec!["team-a", "team-b"]);
}

#[tokio::test]
async fn test_second_pass_changes_nothing() {
    let (store, ctx) = reconciler();
    let rule = create_rule(&store, "access", ACCESS).await;

    reconcile(rule.clone(), ctx.clone())
        .await
        .expect("Should reconcile");
    let rule_version = fetch_rule(&store, "access")
        .await
        .and_then(|r| r.resource_version());
    let bindings = versions(&all::<RoleBinding>(&store).await);
    let cluster_bindings = versions(&all::<ClusterRoleBinding>(&store).await);
    let accounts = versions(&all::<ServiceAccount>(&store).await);

    store.clear_journal();
    let action = reconcile(rule, ctx).await.expect("Should reconcile");
    assert_eq!(action, Action::await_change());

    assert_eq!(versions(&all::<RoleBinding>(&store).await), bindings);
    assert_eq!(versions(&all::<ClusterRoleBinding>(&store).await), cluster_bindings);
    assert_eq!(versions(&all::<ServiceAccount>(&store).await), accounts);
    assert_eq!(
        fetch_rule(&store, "access")
            .await
            .and_then(|r| r.resource_version()),
        rule_version
    );
    assert_eq!(store.calls(Operation::ReplaceStatus, "RBACRule"), 0);
    assert_eq!(store.calls(Operation::Create, "Namespace"), 0);
}

#[tokio::test]
async fn test_drifted_binding_is_restored() {
    let (store, ctx) = reconciler();
    let rule = create_rule(&store, "access", ACCESS).await;
    reconcile(rule.clone(), ctx.clone())
        .await
        .expect("Should reconcile");

    let mut drifted: RoleBinding = store
        .get(Some("team-a"), "access-dev-rb-edit")
        .await
        .expect("Should exist");
    drifted.subjects = None;
    drifted.labels_mut().insert("team".to_string(), "a".to_string());
    store.replace(&drifted).await.expect("Should replace");

    reconcile(rule, ctx).await.expect("Should reconcile");

    let restored: RoleBinding = store
        .get(Some("team-a"), "access-dev-rb-edit")
        .await
        .expect("Should exist");
    assert_eq!(restored.subjects.as_ref().map(|s| s.len()), Some(3));
    assert_eq!(restored.labels().get("team").map(String::as_str), Some("a"));
}

#[tokio::test]
async fn test_future_start_waits_without_applying() {
    let (store, ctx) = reconciler();
    let rule = create_rule(
        &store,
        "later",
        r#"
startTime: "2030-01-01T00:00:10Z"
bindings:
  - name: dev
    subjects:
      - kind: User
        name: alice
    roleBindings:
      - role: edit
        namespaces: [team-a]
"#,
    )
    .await;

    let action = reconcile_at(rule.clone(), ctx.clone(), at(0, 0, 0))
        .await
        .expect("Should reconcile");
    assert_eq!(action, Action::requeue(Duration::from_secs(10)));
    assert!(all::<RoleBinding>(&store).await.is_empty());
    let status = fetch_rule(&store, "later")
        .await
        .and_then(|r| r.status)
        .expect("Should have a status");
    assert_eq!(status.phase, Some(RulePhase::Pending));

    let action = reconcile_at(rule, ctx, at(0, 0, 10))
        .await
        .expect("Should reconcile");
    assert_eq!(action, Action::await_change());
    assert_eq!(owned::<RoleBinding>(&store, "later").await.len(), 1);
    let status = fetch_rule(&store, "later")
        .await
        .and_then(|r| r.status)
        .expect("Should have a status");
    assert_eq!(status.phase, Some(RulePhase::Active));
}

#[tokio::test]
async fn test_future_end_schedules_a_wake_up() {
    let (store, ctx) = reconciler();
    let rule = create_rule(
        &store,
        "temporary",
        r#"
endTime: "2030-01-01T01:00:00Z"
bindings:
  - name: dev
    subjects:
      - kind: User
        name: alice
    clusterRoleBindings:
      - clusterRole: view
"#,
    )
    .await;

    let action = reconcile_at(rule, ctx, at(0, 0, 0))
        .await
        .expect("Should reconcile");
    assert_eq!(action, Action::requeue(Duration::from_secs(3600)));
    assert_eq!(owned::<ClusterRoleBinding>(&store, "temporary").await.len(), 1);
    assert!(fetch_rule(&store, "temporary").await.is_some());
}

#[tokio::test]
async fn test_expired_rule_deletes_itself_and_its_objects() {
    let (store, ctx) = reconciler();
    let rule = create_rule(
        &store,
        "expired",
        r#"
endTime: "2030-01-01T00:00:00Z"
bindings:
  - name: dev
    subjects:
      - kind: User
        name: alice
    clusterRoleBindings:
      - clusterRole: view
"#,
    )
    .await;

    reconcile_at(rule.clone(), ctx.clone(), at(0, 0, 5))
        .await
        .expect("Should reconcile");
    assert!(all::<ClusterRoleBinding>(&store).await.is_empty());
    let pending = fetch_rule(&store, "expired")
        .await
        .expect("Should wait for its finalizer");
    assert!(pending.metadata.deletion_timestamp.is_some());

    let action = reconcile_at(rule, ctx, at(0, 0, 6))
        .await
        .expect("Should reconcile");
    assert_eq!(action, Action::await_change());
    assert!(fetch_rule(&store, "expired").await.is_none());
}

#[tokio::test]
async fn test_rule_without_end_is_never_deleted() {
    let (store, ctx) = reconciler();
    let rule = create_rule(&store, "access", ACCESS).await;

    let far_future = Utc
        .with_ymd_and_hms(2999, 1, 1, 0, 0, 0)
        .single()
        .expect("Should be a valid instant");
    let action = reconcile_at(rule, ctx, far_future)
        .await
        .expect("Should reconcile");
    assert_eq!(action, Action::await_change());
    let rule = fetch_rule(&store, "access").await.expect("Should still exist");
    assert!(rule.metadata.deletion_timestamp.is_none());
}

#[tokio::test]
async fn test_deletion_sweeps_every_owned_object() {
    let (store, ctx) = reconciler();
    let rule = create_rule(&store, "access", ACCESS).await;
    reconcile(rule.clone(), ctx.clone())
        .await
        .expect("Should reconcile");

    store
        .delete::<RBACRule>(None, "access")
        .await
        .expect("Should request deletion");
    let action = reconcile(rule, ctx).await.expect("Should clean up");
    assert_eq!(action, Action::await_change());

    assert!(fetch_rule(&store, "access").await.is_none());
    assert!(all::<RoleBinding>(&store).await.is_empty());
    assert!(all::<ClusterRoleBinding>(&store).await.is_empty());
    assert!(all::<ServiceAccount>(&store).await.is_empty());
    // created namespaces are left in place
    assert_eq!(all::<Namespace>(&store).await.len(), 2);
}

#[tokio::test]
async fn test_failed_delete_keeps_finalizer_and_resumes() {
    let (store, ctx) = reconciler();
    let rule = create_rule(
        &store,
        "access",
        r#"
bindings:
  - name: dev
    subjects:
      - kind: User
        name: alice
    roleBindings:
      - role: edit
        namespaces: [team-a]
      - role: view
        namespaces: [team-a]
    clusterRoleBindings:
      - clusterRole: auditor
"#,
    )
    .await;
    reconcile(rule.clone(), ctx.clone())
        .await
        .expect("Should reconcile");

    store
        .delete::<RBACRule>(None, "access")
        .await
        .expect("Should request deletion");
    store.fail_next(Operation::Delete, "RoleBinding", Some("access-dev-rb-view"), 1);

    let result = reconcile(rule.clone(), ctx.clone()).await;
    assert!(matches!(result, Err(ReconcilerError::Cleanup { .. })));

    let stuck = fetch_rule(&store, "access")
        .await
        .expect("Should be held by the finalizer");
    assert!(stuck.finalizers().iter().any(|f| f == RBAC_RULE_FINALIZER));
    let status = stuck.status.expect("Should have a status");
    assert_eq!(status.phase, Some(RulePhase::Terminating));
    // only the deleted binding left the inventory
    assert_eq!(status.role_bindings, ids(&["team-a/access-dev-rb-view"]));
    assert_eq!(status.cluster_role_bindings, ids(&["access-dev-crb-auditor"]));
    assert_eq!(owned::<RoleBinding>(&store, "access").await.len(), 1);

    reconcile(rule, ctx).await.expect("Should finish cleanup");
    assert!(fetch_rule(&store, "access").await.is_none());
    assert!(all::<RoleBinding>(&store).await.is_empty());
    assert!(all::<ClusterRoleBinding>(&store).await.is_empty());
}

#[tokio::test]
async fn test_bad_binding_does_not_block_others() {
    let (store, ctx) = reconciler();
    create_namespace(&store, "team-a", &[("env", "dev")]).await;
    let rule = create_rule(
        &store,
        "access",
        r#"
bindings:
  - name: broken
    subjects:
      - kind: User
        name: alice
    roleBindings:
      - role: edit
        namespaceMatchExpression: "env in (dev"
  - name: good
    subjects:
      - kind: User
        name: bob
    roleBindings:
      - role: view
        namespaceSelector:
          matchLabels:
            env: dev
"#,
    )
    .await;

    let action = reconcile(rule, ctx).await.expect("Should reconcile");
    assert_eq!(action, Action::await_change());

    let bindings = owned::<RoleBinding>(&store, "access").await;
    assert_eq!(bindings.len(), 1);
    assert_eq!(bindings[0].name_any(), "access-good-rb-view");

    let status = fetch_rule(&store, "access")
        .await
        .and_then(|r| r.status)
        .expect("Should have a status");
    assert_eq!(status.phase, Some(RulePhase::Active));
    let ready = status.ready_condition().expect("Should have a Ready condition");
    assert_eq!(ready.status, "False");
    assert_eq!(ready.reason.as_deref(), Some("PartiallyApplied"));
    assert!(ready
        .message
        .as_deref()
        .is_some_and(|m| m.contains("broken")));
}

#[tokio::test]
async fn test_object_write_failure_retries_shortly() {
    let (store, ctx) = reconciler();
    let rule = create_rule(&store, "access", ACCESS).await;
    store.fail_next(
        Operation::Create,
        "RoleBinding",
        Some("access-dev-rb-edit"),
        1,
    );

    let action = reconcile(rule.clone(), ctx.clone())
        .await
        .expect("Should not escalate");
    assert_eq!(action, Action::requeue(Duration::from_millis(500)));
    assert!(all::<ClusterRoleBinding>(&store).await.is_empty());

    let action = reconcile(rule, ctx).await.expect("Should reconcile");
    assert_eq!(action, Action::await_change());
    assert_eq!(owned::<RoleBinding>(&store, "access").await.len(), 2);
    assert_eq!(owned::<ClusterRoleBinding>(&store, "access").await.len(), 1);
}

#[tokio::test]
async fn test_partial_progress_is_recorded_before_a_failure() {
    let (store, ctx) = reconciler();
    let rule = create_rule(&store, "access", ACCESS).await;
    store.fail_next(Operation::Create, "ClusterRoleBinding", None, 1);

    let action = reconcile(rule, ctx).await.expect("Should not escalate");
    assert_eq!(action, Action::requeue(Duration::from_millis(500)));

    let status = fetch_rule(&store, "access")
        .await
        .and_then(|r| r.status)
        .expect("Should have a status");
    assert_eq!(
        status.role_bindings,
        ids(&["team-a/access-dev-rb-edit", "team-b/access-dev-rb-edit"])
    );
    assert!(status.cluster_role_bindings.is_empty());
}

#[tokio::test]
async fn test_invalid_spec_marks_rule_failed() {
    let (store, ctx) = reconciler();
    let rule = create_rule(
        &store,
        "invalid",
        r#"
bindings:
  - name: no-roles
    subjects:
      - kind: User
        name: alice
"#,
    )
    .await;

    let action = reconcile(rule, ctx).await.expect("Should reconcile");
    assert_eq!(action, Action::await_change());
    assert!(all::<RoleBinding>(&store).await.is_empty());

    let status = fetch_rule(&store, "invalid")
        .await
        .and_then(|r| r.status)
        .expect("Should have a status");
    assert_eq!(status.phase, Some(RulePhase::Failed));
    let ready = status.ready_condition().expect("Should have a Ready condition");
    assert_eq!(ready.status, "False");
    assert_eq!(ready.reason.as_deref(), Some("InvalidSpec"));
}

#[tokio::test]
async fn test_missing_rule_is_not_an_error() {
    let (_, ctx) = reconciler();
    let ghost = Arc::new(RBACRule::new("ghost", common::spec("bindings: []")));

    let action = reconcile(ghost, ctx).await.expect("Should reconcile");
    assert_eq!(action, Action::await_change());
}

#[tokio::test]
async fn test_rule_update_failure_goes_to_error_policy() {
    let (store, ctx) = reconciler();
    let rule = create_rule(&store, "access", ACCESS).await;
    store.fail_next(Operation::Replace, "RBACRule", Some("access"), 1);

    let result = reconcile(rule, ctx).await;
    assert!(matches!(result, Err(ReconcilerError::Update { .. })));
    assert!(all::<RoleBinding>(&store).await.is_empty());
}

#[tokio::test]
async fn test_service_accounts_can_be_left_to_the_user() {
    let (store, ctx) = reconciler();
    let rule = create_rule(
        &store,
        "bring-your-own",
        r#"
createSA: false
bindings:
  - name: dev
    subjects:
      - kind: ServiceAccount
        name: sa1
        namespaces: [ci]
    clusterRoleBindings:
      - clusterRole: view
"#,
    )
    .await;

    reconcile(rule, ctx).await.expect("Should reconcile");

    assert!(all::<ServiceAccount>(&store).await.is_empty());
    assert!(all::<Namespace>(&store).await.is_empty());
    let bindings = owned::<ClusterRoleBinding>(&store, "bring-your-own").await;
    let subjects = bindings[0].subjects.clone().unwrap_or_default();
    assert_eq!(subjects.len(), 1);
    assert_eq!(subjects[0].namespace.as_deref(), Some("ci"));
}

const SHARED: &str = r#"
bindings:
  - name: dev
    subjects:
      - kind: ServiceAccount
        name: shared
        namespaces: [team-a]
    roleBindings:
      - role: edit
        namespaces: [team-a]
"#;

fn owner_names(account: &ServiceAccount, controllers_only: bool) -> Vec<String> {
    account
        .owner_references()
        .iter()
        .filter(|r| !controllers_only || r.controller == Some(true))
        .map(|r| r.name.clone())
        .collect()
}

async fn shared_account(store: &InMemoryStore) -> ServiceAccount {
    store
        .get(Some("team-a"), "shared")
        .await
        .expect("Should have the shared ServiceAccount")
}

async fn two_rules_sharing_an_account() -> (
    InMemoryStore,
    Arc<Reconciler<InMemoryStore>>,
    Arc<RBACRule>,
    Arc<RBACRule>,
) {
    let (store, ctx) = reconciler();
    let first = create_rule(&store, "rule-a", SHARED).await;
    let second = create_rule(&store, "rule-b", SHARED).await;
    reconcile(first.clone(), ctx.clone())
        .await
        .expect("Should reconcile rule-a");
    let action = reconcile(second.clone(), ctx.clone())
        .await
        .expect("Should reconcile rule-b");
    assert_eq!(action, Action::await_change());
    (store, ctx, first, second)
}

#[tokio::test]
async fn test_shared_service_account_keeps_its_first_controller() {
    let (store, ctx, first, second) = two_rules_sharing_an_account().await;

    let account = shared_account(&store).await;
    assert_eq!(owner_names(&account, true), vec!["rule-a"]);
    assert_eq!(owner_names(&account, false), vec!["rule-a", "rule-b"]);
    assert_eq!(
        account.labels().get(OWNER_LABEL).map(String::as_str),
        Some("rule-a")
    );

    let status = fetch_rule(&store, "rule-b")
        .await
        .and_then(|r| r.status)
        .expect("Should have a status");
    assert_eq!(status.phase, Some(RulePhase::Active));
    let ready = status.ready_condition().expect("Should have a Ready condition");
    assert_eq!(ready.status, "True");

    // neither rule takes the account back on later passes
    reconcile(second, ctx.clone()).await.expect("Should reconcile");
    reconcile(first, ctx).await.expect("Should reconcile");
    assert_eq!(
        shared_account(&store).await.resource_version(),
        account.resource_version()
    );
}

#[tokio::test]
async fn test_deleting_a_sharing_rule_only_drops_its_reference() {
    let (store, ctx, _, second) = two_rules_sharing_an_account().await;

    store
        .delete::<RBACRule>(None, "rule-b")
        .await
        .expect("Should request deletion");
    reconcile(second, ctx).await.expect("Should clean up");

    assert!(fetch_rule(&store, "rule-b").await.is_none());
    let account = shared_account(&store).await;
    assert_eq!(owner_names(&account, false), vec!["rule-a"]);
    assert_eq!(owner_names(&account, true), vec!["rule-a"]);
    assert_eq!(
        account.labels().get(OWNER_LABEL).map(String::as_str),
        Some("rule-a")
    );
    assert_eq!(owned::<RoleBinding>(&store, "rule-a").await.len(), 1);
    assert!(owned::<RoleBinding>(&store, "rule-b").await.is_empty());
}

#[tokio::test]
async fn test_deleting_the_controlling_rule_hands_the_account_over() {
    let (store, ctx, first, second) = two_rules_sharing_an_account().await;

    store
        .delete::<RBACRule>(None, "rule-a")
        .await
        .expect("Should request deletion");
    reconcile(first, ctx.clone()).await.expect("Should clean up");
    assert!(fetch_rule(&store, "rule-a").await.is_none());

    let account = shared_account(&store).await;
    assert_eq!(owner_names(&account, false), vec!["rule-b"]);
    assert_eq!(owner_names(&account, true), vec!["rule-b"]);
    assert_eq!(
        account.labels().get(OWNER_LABEL).map(String::as_str),
        Some("rule-b")
    );

    reconcile(second.clone(), ctx.clone())
        .await
        .expect("Should reconcile");
    assert_eq!(
        shared_account(&store).await.resource_version(),
        account.resource_version()
    );

    store
        .delete::<RBACRule>(None, "rule-b")
        .await
        .expect("Should request deletion");
    reconcile(second, ctx).await.expect("Should clean up");
    assert!(all::<ServiceAccount>(&store).await.is_empty());
    assert!(all::<RoleBinding>(&store).await.is_empty());
}

#[tokio::test]
async fn test_concurrent_rule_update_fails_status_write_then_converges() {
    let (store, ctx) = reconciler();
    let rule = create_rule(&store, "access", ACCESS).await;
    store.write_concurrently_before(Operation::ReplaceStatus, "RBACRule", "access");

    let result = reconcile(rule.clone(), ctx.clone()).await;
    assert!(matches!(result, Err(ReconcilerError::Status { .. })));
    let stale = fetch_rule(&store, "access").await.expect("Should exist");
    assert!(stale.annotations().contains_key(CONCURRENT_WRITE_ANNOTATION));
    assert!(stale.status.is_none());

    let action = reconcile(rule, ctx).await.expect("Should reconcile");
    assert_eq!(action, Action::await_change());

    let status = fetch_rule(&store, "access")
        .await
        .and_then(|r| r.status)
        .expect("Should have a status");
    assert_eq!(status.phase, Some(RulePhase::Active));
    assert_eq!(
        status.role_bindings,
        ids(&["team-a/access-dev-rb-edit", "team-b/access-dev-rb-edit"])
    );
    assert_eq!(status.cluster_role_bindings, ids(&["access-dev-crb-view"]));
    assert_eq!(all::<RoleBinding>(&store).await.len(), 2);
    assert_eq!(all::<ClusterRoleBinding>(&store).await.len(), 1);
    assert_eq!(all::<ServiceAccount>(&store).await.len(), 2);
}

#[tokio::test]
async fn test_concurrent_object_update_retries_shortly() {
    let (store, ctx) = reconciler();
    let rule = create_rule(&store, "access", ACCESS).await;
    reconcile(rule.clone(), ctx.clone())
        .await
        .expect("Should reconcile");

    // lands between the read and the replace of the existing binding
    store.write_concurrently_before(Operation::Replace, "RoleBinding", "access-dev-rb-edit");
    let action = reconcile(rule.clone(), ctx.clone())
        .await
        .expect("Should reconcile");
    assert_eq!(action, Action::requeue(Duration::from_millis(500)));

    let action = reconcile(rule, ctx).await.expect("Should reconcile");
    assert_eq!(action, Action::await_change());

    let bindings = all::<RoleBinding>(&store).await;
    assert_eq!(bindings.len(), 2);
    assert!(bindings
        .iter()
        .all(|b| b.subjects.as_ref().is_some_and(|s| s.len() == 3)));
    let status = fetch_rule(&store, "access")
        .await
        .and_then(|r| r.status)
        .expect("Should have a status");
    assert_eq!(
        status.role_bindings,
        ids(&["team-a/access-dev-rb-edit", "team-b/access-dev-rb-edit"])
    );
}

#[tokio::test]
async fn test_concurrent_update_during_finalizer_attach_is_retried() {
    let (store, ctx) = reconciler();
    let rule = create_rule(&store, "access", ACCESS).await;
    store.write_concurrently_before(Operation::Replace, "RBACRule", "access");

    let result = reconcile(rule.clone(), ctx.clone()).await;
    assert!(matches!(
        result,
        Err(ReconcilerError::Update {
            source: StoreError::Conflict,
            ..
        })
    ));
    let untouched = fetch_rule(&store, "access").await.expect("Should exist");
    assert!(untouched.finalizers().is_empty());
    assert!(all::<RoleBinding>(&store).await.is_empty());

    reconcile(rule, ctx).await.expect("Should reconcile");
    let rule = fetch_rule(&store, "access").await.expect("Should exist");
    assert_eq!(rule.finalizers().to_vec(), vec![RBAC_RULE_FINALIZER.to_string()]);
    assert_eq!(all::<RoleBinding>(&store).await.len(), 2);
}

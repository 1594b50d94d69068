//! Shared fixtures for the integration tests.
//!
//! Everything runs against [`InMemoryStore`]; no cluster is needed.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use std::collections::BTreeMap;
use std::sync::{Arc, Once};

use k8s_openapi::api::core::v1::Namespace;
use kube::api::ObjectMeta;
use rbac_rule_controller::config::ControllerConfig;
use rbac_rule_controller::controller::parser::naming::owner_selector;
use rbac_rule_controller::controller::parser::selector::LabelQuery;
use rbac_rule_controller::controller::reconciler::Reconciler;
use rbac_rule_controller::controller::store::{InMemoryStore, ObjectStore, StoreObject};
use rbac_rule_controller::crd::{RBACRule, RBACRuleSpec};
use tracing_subscriber::EnvFilter;

static TRACING_INIT: Once = Once::new();

/// Route controller logs to the test harness
///
/// `RUST_LOG=rbac_rule_controller=debug cargo test` shows every pass.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("off")),
            )
            .try_init();
    });
}

/// Reconciler over a fresh in-memory store
pub fn reconciler() -> (InMemoryStore, Arc<Reconciler<InMemoryStore>>) {
    init_tracing();
    let store = InMemoryStore::new();
    let ctx = Arc::new(Reconciler::new(store.clone(), ControllerConfig::default()));
    (store, ctx)
}

/// Parse a rule spec from YAML
pub fn spec(yaml: &str) -> RBACRuleSpec {
    serde_yaml::from_str(yaml).expect("Should deserialize RBACRule spec")
}

/// Store a rule and return it as stored (uid and resourceVersion assigned)
pub async fn create_rule(store: &InMemoryStore, name: &str, yaml: &str) -> Arc<RBACRule> {
    let rule = RBACRule::new(name, spec(yaml));
    Arc::new(store.create(&rule).await.expect("Should create RBACRule"))
}

/// Store a namespace carrying `labels`
pub async fn create_namespace(store: &InMemoryStore, name: &str, labels: &[(&str, &str)]) {
    let labels: BTreeMap<String, String> = labels
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    let namespace = Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels),
            ..ObjectMeta::default()
        },
        ..Namespace::default()
    };
    store
        .create(&namespace)
        .await
        .expect("Should create namespace");
}

/// Current copy of a rule, `None` once it is gone
pub async fn fetch_rule(store: &InMemoryStore, name: &str) -> Option<RBACRule> {
    store.get::<RBACRule>(None, name).await.ok()
}

/// Objects of kind `K` carrying `rule`'s ownership label
pub async fn owned<K: StoreObject>(store: &InMemoryStore, rule: &str) -> Vec<K> {
    let selector = owner_selector(rule, None).expect("Should build owner selector");
    store
        .list::<K>(None, &selector)
        .await
        .expect("Should list owned objects")
}

/// Every object of kind `K`, labelled or not
pub async fn all<K: StoreObject>(store: &InMemoryStore) -> Vec<K> {
    store
        .list::<K>(None, &LabelQuery::default())
        .await
        .expect("Should list objects")
}

//! In-memory [`ObjectStore`] with API-server semantics.
//!
//! Objects are held as JSON keyed by kind, namespace and name. The store assigns
//! `uid`, `resourceVersion` and `creationTimestamp`, rejects stale writes and objects
//! with more than one controller reference, honours finalizers on delete, and
//! evaluates label queries. Failures can be injected per operation and kind to
//! exercise retry paths.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};

use super::{decode, encode, ObjectStore, StoreError, StoreObject};
use crate::controller::parser::selector::LabelQuery;

/// Store operation, used for failure injection and the call journal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Get,
    List,
    Create,
    Replace,
    ReplaceStatus,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct ObjectKey {
    kind: String,
    namespace: Option<String>,
    name: String,
}

#[derive(Debug, Clone)]
struct InjectedFailure {
    operation: Operation,
    kind: String,
    name: Option<String>,
    remaining: usize,
}

#[derive(Debug, Default)]
struct MemoryState {
    objects: BTreeMap<ObjectKey, Value>,
    last_version: u64,
    failures: Vec<InjectedFailure>,
    concurrent_writes: Vec<(Operation, String, String)>,
    journal: Vec<(Operation, String, String)>,
}

/// Annotation set by a simulated concurrent writer
pub const CONCURRENT_WRITE_ANNOTATION: &str = "example.io/concurrent-write";

/// Shared, cloneable in-memory object store
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next `times` matching calls fail with a 500 API error
    ///
    /// `name` narrows the failure to one object; `None` matches any object of `kind`.
    pub fn fail_next(&self, operation: Operation, kind: &str, name: Option<&str>, times: usize) {
        self.lock().failures.push(InjectedFailure {
            operation,
            kind: kind.to_string(),
            name: name.map(str::to_string),
            remaining: times,
        });
    }

    /// Let another writer modify `kind`/`name` right before the next `operation` on it
    ///
    /// The stored object gets [`CONCURRENT_WRITE_ANNOTATION`] and a new
    /// `resourceVersion`, so a write carrying the version read earlier conflicts.
    /// Objects of that name in every namespace are touched.
    pub fn write_concurrently_before(&self, operation: Operation, kind: &str, name: &str) {
        self.lock()
            .concurrent_writes
            .push((operation, kind.to_string(), name.to_string()));
    }

    /// Number of calls of `operation` made against `kind`
    #[must_use]
    pub fn calls(&self, operation: Operation, kind: &str) -> usize {
        self.lock()
            .journal
            .iter()
            .filter(|(op, k, _)| *op == operation && k == kind)
            .count()
    }

    pub fn clear_journal(&self) {
        self.lock().journal.clear();
    }

    /// Every stored object of kind `K`, ordered by namespace and name
    #[must_use]
    pub fn all<K: StoreObject>(&self) -> Vec<K> {
        let kind = K::kind(&()).into_owned();
        self.lock()
            .objects
            .iter()
            .filter(|(key, _)| key.kind == kind)
            .filter_map(|(_, value)| decode(value.clone()).ok())
            .collect()
    }

    fn key<K: StoreObject>(namespace: Option<&str>, name: &str) -> ObjectKey {
        ObjectKey {
            kind: K::kind(&()).into_owned(),
            namespace: namespace.map(str::to_string),
            name: name.to_string(),
        }
    }

    fn key_of<K: StoreObject>(value: &Value) -> Result<ObjectKey, StoreError> {
        let metadata = &value["metadata"];
        let name = metadata["name"]
            .as_str()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| StoreError::Api {
                code: 422,
                reason: "Invalid".to_string(),
                message: format!("{} without metadata.name", K::kind(&())),
            })?;
        Ok(Self::key::<K>(metadata["namespace"].as_str(), name))
    }
}

impl MemoryState {
    fn enter(&mut self, operation: Operation, kind: &str, name: &str) -> Result<(), StoreError> {
        self.journal
            .push((operation, kind.to_string(), name.to_string()));
        if let Some(index) = self
            .concurrent_writes
            .iter()
            .position(|(op, k, n)| *op == operation && k == kind && n == name)
        {
            self.concurrent_writes.remove(index);
            self.touch(kind, name);
        }
        let hit = self.failures.iter_mut().find(|f| {
            f.remaining > 0
                && f.operation == operation
                && f.kind == kind
                && f.name.as_deref().is_none_or(|n| n == name)
        });
        match hit {
            Some(failure) => {
                failure.remaining -= 1;
                Err(StoreError::Api {
                    code: 500,
                    reason: "InternalError".to_string(),
                    message: format!("injected {operation:?} failure for {kind} {name}"),
                })
            }
            None => Ok(()),
        }
    }

    fn touch(&mut self, kind: &str, name: &str) {
        let keys: Vec<ObjectKey> = self
            .objects
            .keys()
            .filter(|key| key.kind == kind && key.name == name)
            .cloned()
            .collect();
        for key in keys {
            let version = self.next_version();
            if let Some(value) = self.objects.get_mut(&key) {
                value["metadata"]["annotations"][CONCURRENT_WRITE_ANNOTATION] = json!(version);
                value["metadata"]["resourceVersion"] = json!(version);
            }
        }
    }

    fn next_version(&mut self) -> String {
        self.last_version += 1;
        self.last_version.to_string()
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn has_finalizers(value: &Value) -> bool {
    value["metadata"]["finalizers"]
        .as_array()
        .is_some_and(|f| !f.is_empty())
}

fn labels_of(value: &Value) -> BTreeMap<String, String> {
    value["metadata"]["labels"]
        .as_object()
        .map(|labels| {
            labels
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

/// Compare two stored objects ignoring `resourceVersion`
fn same_content(a: &Value, b: &Value) -> bool {
    let strip = |v: &Value| {
        let mut v = v.clone();
        if let Some(metadata) = v["metadata"].as_object_mut() {
            metadata.remove("resourceVersion");
        }
        v
    };
    strip(a) == strip(b)
}

/// At most one owner reference may be the controller
fn check_owner_references(kind: &str, value: &Value) -> Result<(), StoreError> {
    let controllers = value["metadata"]["ownerReferences"]
        .as_array()
        .map_or(0, |references| {
            references
                .iter()
                .filter(|r| r["controller"].as_bool() == Some(true))
                .count()
        });
    if controllers > 1 {
        return Err(StoreError::Api {
            code: 422,
            reason: "Invalid".to_string(),
            message: format!(
                "{kind}: metadata.ownerReferences: Only one reference can have Controller set to true"
            ),
        });
    }
    Ok(())
}

fn check_version(stored: &Value, incoming: &Value) -> Result<(), StoreError> {
    match incoming["metadata"]["resourceVersion"].as_str() {
        Some(version) if Some(version) != stored["metadata"]["resourceVersion"].as_str() => {
            Err(StoreError::Conflict)
        }
        _ => Ok(()),
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn get<K: StoreObject>(
        &self,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<K, StoreError> {
        let mut state = self.lock();
        let key = Self::key::<K>(namespace, name);
        state.enter(Operation::Get, &key.kind, name)?;
        let value = state.objects.get(&key).cloned().ok_or(StoreError::NotFound)?;
        drop(state);
        decode(value)
    }

    async fn list<K: StoreObject>(
        &self,
        namespace: Option<&str>,
        query: &LabelQuery,
    ) -> Result<Vec<K>, StoreError> {
        let kind = K::kind(&()).into_owned();
        let mut state = self.lock();
        state.enter(Operation::List, &kind, "")?;
        let matching: Vec<Value> = state
            .objects
            .iter()
            .filter(|(key, _)| key.kind == kind)
            .filter(|(key, _)| namespace.is_none() || key.namespace.as_deref() == namespace)
            .filter(|(_, value)| query.matches(&labels_of(value)))
            .map(|(_, value)| value.clone())
            .collect();
        drop(state);
        matching.into_iter().map(decode).collect()
    }

    async fn create<K: StoreObject>(&self, object: &K) -> Result<K, StoreError> {
        let mut value = encode(object)?;
        let key = Self::key_of::<K>(&value)?;
        let mut state = self.lock();
        state.enter(Operation::Create, &key.kind, &key.name)?;
        if state.objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists);
        }
        check_owner_references(&key.kind, &value)?;
        let version = state.next_version();
        let metadata = &mut value["metadata"];
        metadata["uid"] = json!(uuid::Uuid::new_v4().to_string());
        metadata["resourceVersion"] = json!(version);
        metadata["creationTimestamp"] = json!(now_rfc3339());
        metadata["generation"] = json!(1);
        if let Some(metadata) = metadata.as_object_mut() {
            metadata.remove("deletionTimestamp");
        }
        state.objects.insert(key, value.clone());
        drop(state);
        decode(value)
    }

    async fn replace<K: StoreObject>(&self, object: &K) -> Result<K, StoreError> {
        let mut value = encode(object)?;
        let key = Self::key_of::<K>(&value)?;
        let mut state = self.lock();
        state.enter(Operation::Replace, &key.kind, &key.name)?;
        let stored = state.objects.get(&key).cloned().ok_or(StoreError::NotFound)?;
        check_version(&stored, &value)?;
        check_owner_references(&key.kind, &value)?;

        // server-owned fields survive a replace; status has its own endpoint
        for field in ["uid", "creationTimestamp", "deletionTimestamp", "generation"] {
            match stored["metadata"].get(field) {
                Some(v) => value["metadata"][field] = v.clone(),
                None => {
                    if let Some(metadata) = value["metadata"].as_object_mut() {
                        metadata.remove(field);
                    }
                }
            }
        }
        match stored.get("status") {
            Some(status) => value["status"] = status.clone(),
            None => {
                if let Some(object) = value.as_object_mut() {
                    object.remove("status");
                }
            }
        }
        value["metadata"]["resourceVersion"] = stored["metadata"]["resourceVersion"].clone();

        if stored["metadata"].get("deletionTimestamp").is_some() && !has_finalizers(&value) {
            state.objects.remove(&key);
            drop(state);
            return decode(value);
        }
        if same_content(&stored, &value) {
            drop(state);
            return decode(stored);
        }
        if stored.get("spec") != value.get("spec") {
            let generation = stored["metadata"]["generation"].as_i64().unwrap_or(1) + 1;
            value["metadata"]["generation"] = json!(generation);
        }
        value["metadata"]["resourceVersion"] = json!(state.next_version());
        state.objects.insert(key, value.clone());
        drop(state);
        decode(value)
    }

    async fn replace_status<K: StoreObject>(&self, object: &K) -> Result<K, StoreError> {
        let incoming = encode(object)?;
        let key = Self::key_of::<K>(&incoming)?;
        let mut state = self.lock();
        state.enter(Operation::ReplaceStatus, &key.kind, &key.name)?;
        let mut stored = state.objects.get(&key).cloned().ok_or(StoreError::NotFound)?;
        check_version(&stored, &incoming)?;
        let status = incoming.get("status").cloned().unwrap_or(Value::Null);
        if stored.get("status") == Some(&status) {
            drop(state);
            return decode(stored);
        }
        stored["status"] = status;
        stored["metadata"]["resourceVersion"] = json!(state.next_version());
        state.objects.insert(key, stored.clone());
        drop(state);
        decode(stored)
    }

    async fn delete<K: StoreObject>(
        &self,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<(), StoreError> {
        let key = Self::key::<K>(namespace, name);
        let mut state = self.lock();
        state.enter(Operation::Delete, &key.kind, name)?;
        let mut stored = state.objects.get(&key).cloned().ok_or(StoreError::NotFound)?;
        if !has_finalizers(&stored) {
            state.objects.remove(&key);
            return Ok(());
        }
        if stored["metadata"].get("deletionTimestamp").is_none() {
            stored["metadata"]["deletionTimestamp"] = json!(now_rfc3339());
            stored["metadata"]["resourceVersion"] = json!(state.next_version());
            state.objects.insert(key, stored);
        }
        Ok(())
    }
}

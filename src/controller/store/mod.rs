//! # Object Store
//!
//! The reconciler's view of the cluster: typed get/list/create/replace/delete with
//! optimistic concurrency.
//!
//! - [`KubeStore`] talks to the API server through `kube::Client`
//! - `InMemoryStore` keeps objects in memory with API-server semantics, used by tests
//!   (behind the `test-util` feature)
//!
//! Writes carry `metadata.resourceVersion`; a stale version surfaces as
//! [`StoreError::Conflict`] and is retried by re-reading, never overwritten blindly.

mod kube_store;
#[cfg(any(test, feature = "test-util"))]
mod memory;

use std::fmt::Debug;

use async_trait::async_trait;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::controller::parser::selector::LabelQuery;

pub use kube_store::KubeStore;
#[cfg(any(test, feature = "test-util"))]
pub use memory::{InMemoryStore, Operation, CONCURRENT_WRITE_ANNOTATION};

/// Typed Kubernetes object the store can handle
pub trait StoreObject:
    Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<K> StoreObject for K where
    K: Resource<DynamicType = ()>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object not found")]
    NotFound,
    #[error("object already exists")]
    AlreadyExists,
    #[error("conflicting write: object was modified concurrently")]
    Conflict,
    #[error("API request failed ({code} {reason}): {message}")]
    Api {
        code: u16,
        reason: String,
        message: String,
    },
    #[error("API client error: {0}")]
    Client(#[source] kube::Error),
    /// The payload did not have the shape of the requested kind
    #[error("unexpected object payload for {kind}: {source}")]
    Decode {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    /// Whether retrying the same call later may succeed
    ///
    /// Decode failures mean the wrong kind of object reached a handler and are
    /// never retried silently. A write rejected as invalid (400, 422) is rejected
    /// the same way on every attempt.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        !matches!(
            self,
            StoreError::Decode { .. } | StoreError::Api { code: 400 | 422, .. }
        )
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound)
    }
}

impl From<kube::Error> for StoreError {
    fn from(error: kube::Error) -> Self {
        match error {
            kube::Error::Api(response) if response.code == 404 => StoreError::NotFound,
            kube::Error::Api(response) if response.code == 409 && response.reason == "AlreadyExists" => {
                StoreError::AlreadyExists
            }
            kube::Error::Api(response) if response.code == 409 => StoreError::Conflict,
            kube::Error::Api(response) => StoreError::Api {
                code: response.code,
                reason: response.reason,
                message: response.message,
            },
            other => StoreError::Client(other),
        }
    }
}

/// CRUD access to cluster objects
///
/// `namespace` is `None` for cluster-scoped kinds, and for `list` also means
/// "across all namespaces".
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    async fn get<K: StoreObject>(&self, namespace: Option<&str>, name: &str)
        -> Result<K, StoreError>;

    async fn list<K: StoreObject>(
        &self,
        namespace: Option<&str>,
        query: &LabelQuery,
    ) -> Result<Vec<K>, StoreError>;

    /// Create; fails with [`StoreError::AlreadyExists`] when the name is taken
    async fn create<K: StoreObject>(&self, object: &K) -> Result<K, StoreError>;

    /// Full replace of an existing object, guarded by its `resourceVersion`
    async fn replace<K: StoreObject>(&self, object: &K) -> Result<K, StoreError>;

    /// Replace the status subresource, guarded by `resourceVersion`
    async fn replace_status<K: StoreObject>(&self, object: &K) -> Result<K, StoreError>;

    /// Request deletion; objects with finalizers only get a deletion timestamp
    async fn delete<K: StoreObject>(&self, namespace: Option<&str>, name: &str)
        -> Result<(), StoreError>;
}

pub(crate) fn decode<K: StoreObject>(value: serde_json::Value) -> Result<K, StoreError> {
    serde_json::from_value(value).map_err(|source| StoreError::Decode {
        kind: K::kind(&()).into_owned(),
        source,
    })
}

pub(crate) fn encode<K: StoreObject>(object: &K) -> Result<serde_json::Value, StoreError> {
    serde_json::to_value(object).map_err(|source| StoreError::Decode {
        kind: K::kind(&()).into_owned(),
        source,
    })
}

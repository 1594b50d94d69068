//! API-server backed [`ObjectStore`].

use async_trait::async_trait;
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams,
};
use kube::{Client, ResourceExt};
use serde_json::json;
use tracing::trace;

use super::{decode, encode, ObjectStore, StoreError, StoreObject};
use crate::constants::FIELD_MANAGER;
use crate::controller::parser::selector::LabelQuery;

/// [`ObjectStore`] over a `kube::Client`
///
/// Objects go through `DynamicObject` so one code path serves namespaced and
/// cluster-scoped kinds alike.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl std::fmt::Debug for KubeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStore").finish_non_exhaustive()
    }
}

impl KubeStore {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }

    fn api<K: StoreObject>(&self, namespace: Option<&str>) -> Api<DynamicObject> {
        let resource = ApiResource::erase::<K>(&());
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &resource),
            None => Api::all_with(self.client.clone(), &resource),
        }
    }

    fn to_dynamic<K: StoreObject>(object: &K) -> Result<DynamicObject, StoreError> {
        serde_json::from_value(encode(object)?).map_err(|source| StoreError::Decode {
            kind: K::kind(&()).into_owned(),
            source,
        })
    }

    fn from_dynamic<K: StoreObject>(object: DynamicObject) -> Result<K, StoreError> {
        let value = serde_json::to_value(object).map_err(|source| StoreError::Decode {
            kind: K::kind(&()).into_owned(),
            source,
        })?;
        decode(value)
    }

    fn post_params() -> PostParams {
        PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..PostParams::default()
        }
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get<K: StoreObject>(
        &self,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<K, StoreError> {
        let object = self.api::<K>(namespace).get(name).await?;
        Self::from_dynamic(object)
    }

    async fn list<K: StoreObject>(
        &self,
        namespace: Option<&str>,
        query: &LabelQuery,
    ) -> Result<Vec<K>, StoreError> {
        let mut params = ListParams::default();
        if !query.is_empty() {
            params = params.labels(&query.to_string());
        }
        let list = self.api::<K>(namespace).list(&params).await?;
        trace!(kind = %K::kind(&()), selector = %query, count = list.items.len(), "Listed objects");
        list.items.into_iter().map(Self::from_dynamic).collect()
    }

    async fn create<K: StoreObject>(&self, object: &K) -> Result<K, StoreError> {
        let api = self.api::<K>(object.namespace().as_deref());
        let created = api
            .create(&Self::post_params(), &Self::to_dynamic(object)?)
            .await?;
        Self::from_dynamic(created)
    }

    async fn replace<K: StoreObject>(&self, object: &K) -> Result<K, StoreError> {
        let api = self.api::<K>(object.namespace().as_deref());
        let replaced = api
            .replace(
                &object.name_any(),
                &Self::post_params(),
                &Self::to_dynamic(object)?,
            )
            .await?;
        Self::from_dynamic(replaced)
    }

    async fn replace_status<K: StoreObject>(&self, object: &K) -> Result<K, StoreError> {
        let api = self.api::<K>(object.namespace().as_deref());
        let status = encode(object)?
            .get("status")
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        // resourceVersion in a merge patch turns it into a conditional update
        let patch = json!({
            "metadata": { "resourceVersion": object.resource_version() },
            "status": status,
        });
        let patched = api
            .patch_status(
                &object.name_any(),
                &PatchParams {
                    field_manager: Some(FIELD_MANAGER.to_string()),
                    ..PatchParams::default()
                },
                &Patch::Merge(&patch),
            )
            .await?;
        Self::from_dynamic(patched)
    }

    async fn delete<K: StoreObject>(
        &self,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<(), StoreError> {
        self.api::<K>(namespace)
            .delete(name, &DeleteParams::background())
            .await?;
        Ok(())
    }
}

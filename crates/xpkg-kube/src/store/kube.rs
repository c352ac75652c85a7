//! Kubernetes API server store
//!
//! Cluster-scoped objects through `Api::all`. The API server enforces
//! `resourceVersion` preconditions on replace and patch; a 409 surfaces as
//! [`KubeError::Conflict`].

use async_trait::async_trait;
use kube::Client;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::core::ClusterResourceScope;
use serde_json::json;
use std::marker::PhantomData;

use super::{ObjectStore, Selector, StoredObject};
use crate::error::{KubeError, Result};

/// Object store backed by the Kubernetes API
pub struct KubeStore<K> {
    client: Client,
    _kind: PhantomData<fn() -> K>,
}

impl<K> Clone for KubeStore<K> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            _kind: PhantomData,
        }
    }
}

impl<K> KubeStore<K>
where
    K: StoredObject + kube::Resource<Scope = ClusterResourceScope>,
{
    /// Create with an existing client
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _kind: PhantomData,
        }
    }

    fn api(&self) -> Api<K> {
        Api::all(self.client.clone())
    }

    /// Map API errors onto store errors for `name`
    fn map_error(&self, name: &str, resource_version: Option<&str>, e: kube::Error) -> KubeError {
        match &e {
            kube::Error::Api(resp) if resp.code == 404 => {
                KubeError::not_found(&K::kind(&()), name)
            }
            kube::Error::Api(resp) if resp.code == 409 && resp.reason == "AlreadyExists" => {
                KubeError::AlreadyExists {
                    kind: K::kind(&()).to_string(),
                    name: name.to_string(),
                }
            }
            kube::Error::Api(resp) if resp.code == 409 => KubeError::Conflict {
                kind: K::kind(&()).to_string(),
                name: name.to_string(),
                expected: resource_version.unwrap_or_default().to_string(),
            },
            _ => KubeError::Api(e),
        }
    }
}

fn name_of<K: StoredObject>(object: &K) -> Result<&str> {
    object
        .meta()
        .name
        .as_deref()
        .ok_or_else(|| KubeError::Storage(format!("{} without a name", K::kind(&()))))
}

#[async_trait]
impl<K> ObjectStore<K> for KubeStore<K>
where
    K: StoredObject + kube::Resource<Scope = ClusterResourceScope>,
{
    async fn get(&self, name: &str) -> Result<K> {
        self.api()
            .get(name)
            .await
            .map_err(|e| self.map_error(name, None, e))
    }

    async fn list(&self, selector: &Selector) -> Result<Vec<K>> {
        let lp = ListParams::default().labels(&selector.to_query());
        let mut items = self.api().list(&lp).await?.items;
        items.sort_by(|a, b| a.meta().name.cmp(&b.meta().name));
        Ok(items)
    }

    async fn create(&self, object: &K) -> Result<K> {
        let name = name_of(object)?;
        self.api()
            .create(&PostParams::default(), object)
            .await
            .map_err(|e| self.map_error(name, None, e))
    }

    async fn update(&self, object: &K) -> Result<K> {
        let name = name_of(object)?;
        let rv = object.meta().resource_version.as_deref();
        self.api()
            .replace(name, &PostParams::default(), object)
            .await
            .map_err(|e| self.map_error(name, rv, e))
    }

    async fn update_status(&self, object: &K) -> Result<K> {
        let name = name_of(object)?;
        let rv = object.meta().resource_version.as_deref();
        let value = serde_json::to_value(object)?;

        // resourceVersion in a merge patch acts as a precondition
        let patch = json!({
            "metadata": { "resourceVersion": rv },
            "status": value.get("status").cloned().unwrap_or_default(),
        });

        self.api()
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| self.map_error(name, rv, e))
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.api()
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| self.map_error(name, None, e))?;
        Ok(())
    }
}

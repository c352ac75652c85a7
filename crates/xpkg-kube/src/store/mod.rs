//! Object stores for packages and revisions
//!
//! Reconcilers persist nothing in memory between runs; every run reads the
//! store, computes, and writes back conditionally:
//! - **Kube**: the Kubernetes API server (production)
//! - **Mock**: an in-memory store with the same concurrency semantics (tests)
//!
//! Writes carry the object's `resourceVersion`. A stale version is rejected
//! with [`KubeError::Conflict`] and the reconcile restarts from a fresh read.

mod kube;
mod mock;

pub use self::kube::KubeStore;
pub use mock::{MockStore, Operation, OperationCounts, StoreEvent};

use ::kube::Resource;
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::Result;

/// Bounds every stored kind satisfies
pub trait StoredObject:
    Resource<DynamicType = ()> + Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<K> StoredObject for K where
    K: Resource<DynamicType = ()>
        + Clone
        + fmt::Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// Equality-based label selector
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    labels: BTreeMap<String, String>,
}

impl Selector {
    /// Select everything
    pub fn all() -> Self {
        Self::default()
    }

    /// Require `key=value`
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Whether a label set satisfies this selector
    pub fn matches(&self, labels: Option<&BTreeMap<String, String>>) -> bool {
        self.labels
            .iter()
            .all(|(k, v)| labels.and_then(|l| l.get(k)) == Some(v))
    }

    /// `k=v,k2=v2` form used in list queries
    pub fn to_query(&self) -> String {
        self.labels
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Store for one object kind
///
/// Implementations must be Send + Sync for use across async tasks.
#[async_trait]
pub trait ObjectStore<K: StoredObject>: Send + Sync {
    /// Get an object by name
    async fn get(&self, name: &str) -> Result<K>;

    /// List objects matching a selector, ordered by name
    async fn list(&self, selector: &Selector) -> Result<Vec<K>>;

    /// Create a new object
    async fn create(&self, object: &K) -> Result<K>;

    /// Replace spec and metadata. The stored status is kept.
    async fn update(&self, object: &K) -> Result<K>;

    /// Replace the status. Spec and metadata are kept.
    async fn update_status(&self, object: &K) -> Result<K>;

    /// Delete an object. Objects holding finalizers are only marked.
    async fn delete(&self, name: &str) -> Result<()>;

    /// Get an object, `None` when it does not exist
    async fn get_opt(&self, name: &str) -> Result<Option<K>> {
        match self.get(name).await {
            Ok(object) => Ok(Some(object)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

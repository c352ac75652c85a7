//! Mock object store for testing
//!
//! Stores objects in memory with the API server semantics the reconcilers
//! rely on: resource versions checked on every write, status kept apart from
//! spec, finalizers delaying deletion. Every change is broadcast so tests can
//! observe the event stream.

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast;

use super::{ObjectStore, Selector, StoredObject};
use crate::error::{KubeError, Result};

/// Capacity of the change broadcast channel
const EVENT_CAPACITY: usize = 256;

/// Change notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// Object created or modified
    Applied(String),
    /// Object removed
    Deleted(String),
}

/// Counts of operations performed for testing assertions
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OperationCounts {
    pub gets: usize,
    pub lists: usize,
    pub creates: usize,
    pub updates: usize,
    pub status_updates: usize,
    pub deletes: usize,
}

impl OperationCounts {
    /// Number of mutating operations
    pub fn writes(&self) -> usize {
        self.creates + self.updates + self.status_updates + self.deletes
    }
}

/// Mutating operation that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Operation {
    Create,
    Update,
    UpdateStatus,
    Delete,
}

#[derive(Debug)]
struct State<K> {
    objects: BTreeMap<String, K>,
    next_version: u64,
    counts: OperationCounts,
    failing: BTreeSet<Operation>,
}

impl<K> State<K> {
    fn check_failing(&self, operation: Operation) -> Result<()> {
        if self.failing.contains(&operation) {
            return Err(KubeError::Storage(format!("{:?} rejected", operation)));
        }
        Ok(())
    }
}

/// In-memory object store for testing
pub struct MockStore<K> {
    state: Arc<RwLock<State<K>>>,
    events: broadcast::Sender<StoreEvent>,
}

impl<K> Clone for MockStore<K> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            events: self.events.clone(),
        }
    }
}

impl<K: StoredObject> Default for MockStore<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: StoredObject> MockStore<K> {
    /// Create a new empty store
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: Arc::new(RwLock::new(State {
                objects: BTreeMap::new(),
                next_version: 1,
                counts: OperationCounts::default(),
                failing: BTreeSet::new(),
            })),
            events,
        }
    }

    /// Subscribe to change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// Get operation counts for assertions
    pub fn operation_counts(&self) -> OperationCounts {
        self.read(|s| s.counts.clone())
    }

    /// Reset operation counts
    pub fn reset_counts(&self) {
        self.write(|s| s.counts = OperationCounts::default());
    }

    /// Fail every `operation` until [`MockStore::clear_failures`]
    pub fn fail_operation(&self, operation: Operation) {
        self.write(|s| s.failing.insert(operation));
    }

    pub fn clear_failures(&self) {
        self.write(|s| s.failing.clear());
    }

    /// Every stored object, ordered by name
    pub fn all(&self) -> Vec<K> {
        self.read(|s| s.objects.values().cloned().collect())
    }

    /// Stored object by name, without counting a read
    pub fn peek(&self, name: &str) -> Option<K> {
        self.read(|s| s.objects.get(name).cloned())
    }

    /// Number of stored objects
    pub fn len(&self) -> usize {
        self.read(|s| s.objects.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read<T>(&self, f: impl FnOnce(&State<K>) -> T) -> T {
        f(&self.state.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn write<T>(&self, f: impl FnOnce(&mut State<K>) -> T) -> T {
        f(&mut self.state.write().unwrap_or_else(PoisonError::into_inner))
    }

    fn notify(&self, event: StoreEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

fn kind_of<K: StoredObject>() -> String {
    K::kind(&()).to_string()
}

fn name_of<K: StoredObject>(object: &K) -> Result<String> {
    object
        .meta()
        .name
        .clone()
        .filter(|n| !n.is_empty())
        .ok_or_else(|| KubeError::Storage(format!("{} without a name", kind_of::<K>())))
}

/// Reject a write whose resourceVersion does not match the stored one.
/// Writes without a resourceVersion are unconditional.
fn check_version<K: StoredObject>(incoming: &K, stored: &K, name: &str) -> Result<()> {
    match &incoming.meta().resource_version {
        Some(expected) if stored.meta().resource_version.as_ref() != Some(expected) => {
            Err(KubeError::Conflict {
                kind: kind_of::<K>(),
                name: name.to_string(),
                expected: expected.clone(),
            })
        }
        _ => Ok(()),
    }
}

/// Copy the `status` field of `from` onto `onto`
fn with_status_of<K: StoredObject>(onto: &K, from: &K) -> Result<K> {
    let mut target = serde_json::to_value(onto)?;
    let source = serde_json::to_value(from)?;
    if let Some(map) = target.as_object_mut() {
        match source.get("status") {
            Some(status) => map.insert("status".to_string(), status.clone()),
            None => map.remove("status"),
        };
    }
    Ok(serde_json::from_value(target)?)
}

#[async_trait]
impl<K: StoredObject> ObjectStore<K> for MockStore<K> {
    async fn get(&self, name: &str) -> Result<K> {
        self.write(|s| {
            s.counts.gets += 1;
            s.objects
                .get(name)
                .cloned()
                .ok_or_else(|| KubeError::not_found(&kind_of::<K>(), name))
        })
    }

    async fn list(&self, selector: &Selector) -> Result<Vec<K>> {
        Ok(self.write(|s| {
            s.counts.lists += 1;
            s.objects
                .values()
                .filter(|o| selector.matches(o.meta().labels.as_ref()))
                .cloned()
                .collect()
        }))
    }

    async fn create(&self, object: &K) -> Result<K> {
        let name = name_of(object)?;
        let created = self.write(|s| {
            s.counts.creates += 1;
            s.check_failing(Operation::Create)?;
            if s.objects.contains_key(&name) {
                return Err(KubeError::AlreadyExists {
                    kind: kind_of::<K>(),
                    name: name.clone(),
                });
            }

            let mut created = object.clone();
            let version = s.next_version;
            s.next_version += 1;
            let meta = created.meta_mut();
            meta.resource_version = Some(version.to_string());
            meta.uid = Some(format!("uid-{}-{}", name, version));
            meta.creation_timestamp = Some(Time(Utc::now()));
            meta.deletion_timestamp = None;

            s.objects.insert(name.clone(), created.clone());
            Ok(created)
        })?;

        self.notify(StoreEvent::Applied(name));
        Ok(created)
    }

    async fn update(&self, object: &K) -> Result<K> {
        let name = name_of(object)?;
        let (updated, removed) = self.write(|s| {
            s.counts.updates += 1;
            s.check_failing(Operation::Update)?;
            let stored = s
                .objects
                .get(&name)
                .ok_or_else(|| KubeError::not_found(&kind_of::<K>(), &name))?;
            check_version(object, stored, &name)?;

            let mut updated = with_status_of(object, stored)?;
            let stored_meta = stored.meta().clone();
            let version = s.next_version;
            s.next_version += 1;

            let meta = updated.meta_mut();
            meta.resource_version = Some(version.to_string());
            meta.uid = stored_meta.uid;
            meta.creation_timestamp = stored_meta.creation_timestamp;
            meta.deletion_timestamp = stored_meta.deletion_timestamp;

            // Deletion completes once the last finalizer is gone
            let finalizers_empty = meta.finalizers.as_ref().is_none_or(|f| f.is_empty());
            if meta.deletion_timestamp.is_some() && finalizers_empty {
                s.objects.remove(&name);
                return Ok((updated, true));
            }

            s.objects.insert(name.clone(), updated.clone());
            Ok::<_, KubeError>((updated, false))
        })?;

        if removed {
            self.notify(StoreEvent::Deleted(name));
        } else {
            self.notify(StoreEvent::Applied(name));
        }
        Ok(updated)
    }

    async fn update_status(&self, object: &K) -> Result<K> {
        let name = name_of(object)?;
        let updated = self.write(|s| {
            s.counts.status_updates += 1;
            s.check_failing(Operation::UpdateStatus)?;
            let stored = s
                .objects
                .get(&name)
                .ok_or_else(|| KubeError::not_found(&kind_of::<K>(), &name))?;
            check_version(object, stored, &name)?;

            let mut updated = with_status_of(stored, object)?;
            updated.meta_mut().resource_version = Some(s.next_version.to_string());
            s.next_version += 1;

            s.objects.insert(name.clone(), updated.clone());
            Ok::<_, KubeError>(updated)
        })?;

        self.notify(StoreEvent::Applied(name));
        Ok(updated)
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let removed = self.write(|s| {
            s.counts.deletes += 1;
            s.check_failing(Operation::Delete)?;
            let version = s.next_version;
            let stored = s
                .objects
                .get_mut(name)
                .ok_or_else(|| KubeError::not_found(&kind_of::<K>(), name))?;

            let has_finalizers = stored
                .meta()
                .finalizers
                .as_ref()
                .is_some_and(|f| !f.is_empty());

            if has_finalizers {
                let meta = stored.meta_mut();
                if meta.deletion_timestamp.is_none() {
                    meta.deletion_timestamp = Some(Time(Utc::now()));
                    meta.resource_version = Some(version.to_string());
                    s.next_version += 1;
                }
                return Ok(false);
            }

            s.objects.remove(name);
            Ok::<_, KubeError>(true)
        })?;

        if removed {
            self.notify(StoreEvent::Deleted(name.to_string()));
        } else {
            self.notify(StoreEvent::Applied(name.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apis::{
        Conditioned, PackageRevision, ProviderRevision, RevisionDesiredState, RevisionResource,
    };
    use crate::apis::{Condition, LABEL_PACKAGE};

    fn revision(name: &str, package: &str) -> ProviderRevision {
        let mut rev = ProviderRevision::new_revision(name);
        rev.metadata.labels = Some(BTreeMap::from([(
            LABEL_PACKAGE.to_string(),
            package.to_string(),
        )]));
        rev
    }

    #[tokio::test]
    async fn test_mock_create_and_get() {
        let store = MockStore::new();
        let created = store.create(&revision("aws-1", "aws")).await.unwrap();
        assert!(created.metadata.resource_version.is_some());
        assert!(created.metadata.uid.is_some());

        let fetched = store.get("aws-1").await.unwrap();
        assert_eq!(fetched.metadata.uid, created.metadata.uid);
    }

    #[tokio::test]
    async fn test_mock_create_duplicate_fails() {
        let store = MockStore::new();
        store.create(&revision("aws-1", "aws")).await.unwrap();
        let err = store.create(&revision("aws-1", "aws")).await.unwrap_err();
        assert!(matches!(err, KubeError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_mock_failing_operation() {
        let store = MockStore::new();
        store.create(&revision("aws-1", "aws")).await.unwrap();

        store.fail_operation(Operation::Delete);
        let err = store.delete("aws-1").await.unwrap_err();
        assert!(matches!(err, KubeError::Storage(_)));
        assert_eq!(store.len(), 1);

        // Other operations are unaffected
        store.create(&revision("aws-2", "aws")).await.unwrap();

        store.clear_failures();
        store.delete("aws-1").await.unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_mock_get_not_found() {
        let store: MockStore<ProviderRevision> = MockStore::new();
        let err = store.get("nope").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(store.get_opt("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mock_list_by_label() {
        let store = MockStore::new();
        store.create(&revision("aws-1", "aws")).await.unwrap();
        store.create(&revision("aws-2", "aws")).await.unwrap();
        store.create(&revision("gcp-1", "gcp")).await.unwrap();

        let aws = store
            .list(&Selector::all().with_label(LABEL_PACKAGE, "aws"))
            .await
            .unwrap();
        assert_eq!(aws.len(), 2);
        assert_eq!(store.list(&Selector::all()).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_mock_stale_write_conflicts() {
        let store = MockStore::new();
        let created = store.create(&revision("aws-1", "aws")).await.unwrap();

        let mut first = created.clone();
        first.set_desired_state(RevisionDesiredState::Active);
        store.update(&first).await.unwrap();

        let mut stale = created;
        stale.set_desired_state(RevisionDesiredState::Inactive);
        let err = store.update(&stale).await.unwrap_err();
        assert!(err.is_conflict());

        let stored = store.peek("aws-1").unwrap();
        assert_eq!(stored.desired_state(), RevisionDesiredState::Active);
    }

    #[tokio::test]
    async fn test_mock_update_keeps_status() {
        let store = MockStore::new();
        let mut created = store.create(&revision("aws-1", "aws")).await.unwrap();

        created.set_condition(Condition::healthy());
        let with_status = store.update_status(&created).await.unwrap();
        assert_eq!(with_status.conditions().len(), 1);

        // A spec update built from an object without status keeps the stored one
        let mut spec_only = with_status.clone();
        spec_only.status = None;
        spec_only.set_desired_state(RevisionDesiredState::Active);
        let updated = store.update(&spec_only).await.unwrap();
        assert_eq!(updated.conditions().len(), 1);
        assert!(updated.is_active());

        // A status update never touches `.spec`
        let mut status_only = updated.clone();
        status_only.set_desired_state(RevisionDesiredState::Inactive);
        status_only.set_revision(42);
        let after = store.update_status(&status_only).await.unwrap();
        assert!(after.is_active());
        assert_eq!(after.revision(), 0);
    }

    #[tokio::test]
    async fn test_mock_finalizers_delay_deletion() {
        let store = MockStore::new();
        let mut rev = revision("aws-1", "aws");
        rev.metadata.finalizers = Some(vec!["pkg.xpkg.io/revision-cleanup".to_string()]);
        store.create(&rev).await.unwrap();

        store.delete("aws-1").await.unwrap();
        let marked = store.peek("aws-1").unwrap();
        assert!(marked.metadata.deletion_timestamp.is_some());

        let mut released = marked;
        released.metadata.finalizers = Some(vec![]);
        store.update(&released).await.unwrap();
        assert!(store.peek("aws-1").is_none());
    }

    #[tokio::test]
    async fn test_mock_counts_and_events() {
        let store = MockStore::new();
        let mut events = store.subscribe();

        store.create(&revision("aws-1", "aws")).await.unwrap();
        store.get("aws-1").await.unwrap();
        store.delete("aws-1").await.unwrap();

        let counts = store.operation_counts();
        assert_eq!(counts.creates, 1);
        assert_eq!(counts.gets, 1);
        assert_eq!(counts.deletes, 1);
        assert_eq!(counts.writes(), 2);

        assert_eq!(
            events.recv().await.unwrap(),
            StoreEvent::Applied("aws-1".to_string())
        );
        assert_eq!(
            events.recv().await.unwrap(),
            StoreEvent::Deleted("aws-1".to_string())
        );

        store.reset_counts();
        assert_eq!(store.operation_counts(), OperationCounts::default());
    }
}

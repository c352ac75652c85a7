//! In-memory establisher for testing

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use xpkg_core::PackageObject;

use super::{
    Establisher, RevisionOwner, check_control, merge_versions, typed_reference, with_owner,
    without_owner,
};
use crate::apis::TypedReference;
use crate::error::Result;

/// An object as installed in the cluster
#[derive(Debug, Clone, PartialEq)]
pub struct InstalledObject {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub uid: String,
    pub labels: BTreeMap<String, String>,
    pub owner_references: Vec<OwnerReference>,
    pub body: Value,
}

impl InstalledObject {
    /// Name of the controlling owner
    pub fn controller(&self) -> Option<&str> {
        self.owner_references
            .iter()
            .find(|r| r.controller == Some(true))
            .map(|r| r.name.as_str())
    }

    /// Names of every owner
    pub fn owners(&self) -> Vec<&str> {
        self.owner_references.iter().map(|r| r.name.as_str()).collect()
    }
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<String, InstalledObject>,
    next_uid: u64,
    writes: usize,
}

/// Establisher keeping installed objects in a map keyed by `kind/name`
#[derive(Debug, Clone, Default)]
pub struct InMemoryEstablisher {
    state: Arc<RwLock<State>>,
}

fn key(kind: &str, name: &str) -> String {
    format!("{}/{}", kind, name)
}

impl InMemoryEstablisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installed object by kind and name
    pub fn get(&self, kind: &str, name: &str) -> Option<InstalledObject> {
        self.read(|s| s.objects.get(&key(kind, name)).cloned())
    }

    /// Every installed object
    pub fn all(&self) -> Vec<InstalledObject> {
        self.read(|s| s.objects.values().cloned().collect())
    }

    /// Install an object directly, bypassing ownership checks
    pub fn insert(&self, object: InstalledObject) {
        self.write(|s| {
            s.objects.insert(key(&object.kind, &object.name), object);
        });
    }

    /// Number of object changes made through [`Establisher`]
    pub fn writes(&self) -> usize {
        self.read(|s| s.writes)
    }

    fn read<T>(&self, f: impl FnOnce(&State) -> T) -> T {
        f(&self.state.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn write<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        f(&mut self.state.write().unwrap_or_else(PoisonError::into_inner))
    }
}

#[async_trait]
impl Establisher for InMemoryEstablisher {
    async fn establish(
        &self,
        owner: &RevisionOwner,
        objects: &[PackageObject],
        control: bool,
    ) -> Result<Vec<TypedReference>> {
        self.write(|s| {
            // Check everything before touching anything
            for object in objects {
                if let Some(existing) = s.objects.get(&key(&object.kind, &object.name)) {
                    check_control(
                        owner,
                        &object.key(),
                        Some(&existing.labels),
                        &existing.owner_references,
                    )?;
                }
            }

            let mut refs = Vec::with_capacity(objects.len());
            for object in objects {
                let k = key(&object.kind, &object.name);
                let next = match s.objects.get(&k) {
                    Some(existing) => {
                        let mut next = existing.clone();
                        next.owner_references =
                            with_owner(&existing.owner_references, owner, control);
                        if control {
                            next.body = merge_versions(&existing.body, &object.body);
                            next.labels.extend(owner.ownership_labels());
                        }
                        next
                    }
                    None => {
                        s.next_uid += 1;
                        InstalledObject {
                            api_version: object.api_version.clone(),
                            kind: object.kind.clone(),
                            name: object.name.clone(),
                            uid: format!("obj-{}", s.next_uid),
                            labels: owner.ownership_labels(),
                            owner_references: vec![owner.owner_reference(control)],
                            body: object.body.clone(),
                        }
                    }
                };

                refs.push(typed_reference(object, Some(next.uid.clone())));
                if s.objects.get(&k) != Some(&next) {
                    s.writes += 1;
                    s.objects.insert(k, next);
                }
            }
            Ok(refs)
        })
    }

    async fn relinquish(&self, owner: &RevisionOwner, refs: &[TypedReference]) -> Result<()> {
        self.write(|s| {
            for r in refs {
                let k = key(&r.kind, &r.name);
                let Some(existing) = s.objects.get_mut(&k) else {
                    continue;
                };
                let remaining = without_owner(&existing.owner_references, owner);
                if remaining.len() == existing.owner_references.len() {
                    continue;
                }
                s.writes += 1;
                if remaining.is_empty() {
                    s.objects.remove(&k);
                } else {
                    existing.owner_references = remaining;
                }
            }
        });
        Ok(())
    }
}

//! Objects installed by revisions
//!
//! A revision establishes the objects its package carries (extension
//! schemas, compositions) and records them in `objectRefs`. Ownership is
//! tracked with owner references on the installed object:
//!
//! - **Control**: the Active revision holds the controller reference and may
//!   change the object. Inactive revisions only add a plain owner reference.
//! - **Sharing**: revisions of the same package, or of packages in the same
//!   provider family, may own the same object. Changes are monotonic: served
//!   versions are only ever added.
//! - **Release**: deleting a revision removes its owner reference; the object
//!   is deleted once no owner remains.
//!
//! An object controlled by a revision outside the package and its family is
//! a conflict and is never touched.

mod kube;
mod memory;

pub use self::kube::KubeEstablisher;
pub use memory::{InMemoryEstablisher, InstalledObject};

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use serde_json::Value;
use std::collections::BTreeMap;
use xpkg_core::PackageObject;

use crate::apis::{LABEL_PACKAGE, LABEL_PROVIDER_FAMILY, Object, RevisionResource, TypedReference};
use crate::error::{KubeError, Result};

/// The revision establishing objects
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionOwner {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub uid: String,
    /// Package the revision belongs to
    pub package: String,
    /// Provider family of the package, if any
    pub family: Option<String>,
}

impl RevisionOwner {
    /// Owner for a stored revision
    pub fn of<R: RevisionResource>(revision: &R, family: Option<&str>) -> Self {
        Self {
            api_version: R::api_version(&()).to_string(),
            kind: R::kind(&()).to_string(),
            name: revision.object_name().to_string(),
            uid: revision.object_meta().uid.clone().unwrap_or_default(),
            package: revision.parent_package().unwrap_or_default().to_string(),
            family: family.map(str::to_string),
        }
    }

    /// Owner reference to this revision
    pub fn owner_reference(&self, controller: bool) -> OwnerReference {
        OwnerReference {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            name: self.name.clone(),
            uid: self.uid.clone(),
            controller: Some(controller),
            block_owner_deletion: Some(true),
        }
    }

    /// Whether an object labelled `labels` belongs to this revision's
    /// package or its provider family
    pub fn shares_lineage(&self, labels: Option<&BTreeMap<String, String>>) -> bool {
        let label = |key: &str| labels.and_then(|l| l.get(key)).map(String::as_str);

        if label(LABEL_PACKAGE) == Some(self.package.as_str()) {
            return true;
        }
        matches!(
            (self.family.as_deref(), label(LABEL_PROVIDER_FAMILY)),
            (Some(ours), Some(theirs)) if ours == theirs
        )
    }

    /// Labels marking objects controlled by this revision
    pub fn ownership_labels(&self) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::from([(LABEL_PACKAGE.to_string(), self.package.clone())]);
        if let Some(family) = &self.family {
            labels.insert(LABEL_PROVIDER_FAMILY.to_string(), family.clone());
        }
        labels
    }
}

/// Installs and releases revision objects
#[async_trait]
pub trait Establisher: Send + Sync {
    /// Create or update `objects` on behalf of `owner`.
    ///
    /// Nothing is changed when any object is in conflict.
    async fn establish(
        &self,
        owner: &RevisionOwner,
        objects: &[PackageObject],
        control: bool,
    ) -> Result<Vec<TypedReference>>;

    /// Drop `owner` from the referenced objects, deleting those left without
    /// an owner
    async fn relinquish(&self, owner: &RevisionOwner, refs: &[TypedReference]) -> Result<()>;
}

/// Fail when the object is controlled by a revision outside the owner's lineage
pub fn check_control(
    owner: &RevisionOwner,
    object: &str,
    labels: Option<&BTreeMap<String, String>>,
    refs: &[OwnerReference],
) -> Result<()> {
    let controller = refs.iter().find(|r| r.controller == Some(true));
    match controller {
        Some(c) if c.name != owner.name && !owner.shares_lineage(labels) => {
            Err(KubeError::ObjectConflict {
                object: object.to_string(),
                owner: c.name.clone(),
            })
        }
        _ => Ok(()),
    }
}

/// Owner references after `owner` establishes the object.
///
/// Taking control demotes every other controller reference.
pub fn with_owner(refs: &[OwnerReference], owner: &RevisionOwner, control: bool) -> Vec<OwnerReference> {
    let mut out: Vec<OwnerReference> = refs
        .iter()
        .map(|r| {
            if r.name == owner.name {
                owner.owner_reference(control)
            } else if control && r.controller == Some(true) {
                OwnerReference {
                    controller: Some(false),
                    ..r.clone()
                }
            } else {
                r.clone()
            }
        })
        .collect();

    if !refs.iter().any(|r| r.name == owner.name) {
        out.push(owner.owner_reference(control));
    }
    out
}

/// Owner references without `owner`
pub fn without_owner(refs: &[OwnerReference], owner: &RevisionOwner) -> Vec<OwnerReference> {
    refs.iter()
        .filter(|r| r.name != owner.name)
        .cloned()
        .collect()
}

/// Merge an incoming object body over an existing one.
///
/// The incoming body wins, but served versions only grow: versions present
/// on the existing object and missing from the incoming one are kept.
pub fn merge_versions(existing: &Value, incoming: &Value) -> Value {
    let mut merged = incoming.clone();

    let existing_versions = existing
        .pointer("/spec/versions")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    if existing_versions.is_empty() {
        return merged;
    }

    if let Some(versions) = merged
        .pointer_mut("/spec/versions")
        .and_then(Value::as_array_mut)
    {
        let name = |v: &Value| v.get("name").and_then(Value::as_str).map(str::to_string);
        for version in existing_versions {
            let present = versions.iter().any(|v| name(v) == name(&version));
            if !present {
                versions.push(version);
            }
        }
    }
    merged
}

/// Reference to an established object
pub fn typed_reference(object: &PackageObject, uid: Option<String>) -> TypedReference {
    TypedReference {
        api_version: object.api_version.clone(),
        kind: object.kind.clone(),
        name: object.name.clone(),
        uid,
    }
}

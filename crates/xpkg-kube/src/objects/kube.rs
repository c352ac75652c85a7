//! Establisher backed by the Kubernetes API
//!
//! Package objects are cluster scoped. Controlling revisions apply them with
//! Server-Side Apply; other revisions only patch their owner reference in.

use async_trait::async_trait;
use kube::{
    Client,
    api::{Api, DeleteParams, DynamicObject, Patch, PatchParams},
    core::GroupVersionKind,
    discovery::ApiResource,
};
use serde_json::json;
use xpkg_core::PackageObject;

use super::{
    Establisher, RevisionOwner, check_control, merge_versions, typed_reference, with_owner,
    without_owner,
};
use crate::apis::TypedReference;
use crate::error::{KubeError, Result};

/// Field manager for applied package objects
pub const FIELD_MANAGER: &str = "xpkg-revision";

/// Establishes objects in a cluster
#[derive(Clone)]
pub struct KubeEstablisher {
    client: Client,
}

impl KubeEstablisher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, api_version: &str, kind: &str) -> Api<DynamicObject> {
        let (group, version) = match api_version.split_once('/') {
            Some((group, version)) => (group, version),
            None => ("", api_version),
        };
        let gvk = GroupVersionKind::gvk(group, version, kind);
        Api::all_with(self.client.clone(), &ApiResource::from_gvk(&gvk))
    }
}

#[async_trait]
impl Establisher for KubeEstablisher {
    async fn establish(
        &self,
        owner: &RevisionOwner,
        objects: &[PackageObject],
        control: bool,
    ) -> Result<Vec<TypedReference>> {
        if owner.uid.is_empty() {
            return Err(KubeError::Storage(format!(
                "revision {} has no uid yet",
                owner.name
            )));
        }

        // Check everything before touching anything
        let mut existing = Vec::with_capacity(objects.len());
        for object in objects {
            let api = self.api(&object.api_version, &object.kind);
            let current = api.get_opt(&object.name).await?;
            if let Some(current) = &current {
                check_control(
                    owner,
                    &object.key(),
                    current.metadata.labels.as_ref(),
                    current.metadata.owner_references.as_deref().unwrap_or_default(),
                )?;
            }
            existing.push(current);
        }

        let mut refs = Vec::with_capacity(objects.len());
        for (object, current) in objects.iter().zip(existing) {
            let api = self.api(&object.api_version, &object.kind);
            let current_refs = current
                .as_ref()
                .and_then(|c| c.metadata.owner_references.clone())
                .unwrap_or_default();
            let owner_references = with_owner(&current_refs, owner, control);

            let applied = match current {
                Some(current) if !control => {
                    if owner_references == current_refs {
                        current
                    } else {
                        let patch = json!({
                            "metadata": {
                                "resourceVersion": current.metadata.resource_version,
                                "ownerReferences": owner_references,
                            }
                        });
                        api.patch(&object.name, &PatchParams::default(), &Patch::Merge(&patch))
                            .await?
                    }
                }
                current => {
                    let body = match &current {
                        Some(c) => merge_versions(&serde_json::to_value(c)?, &object.body),
                        None => object.body.clone(),
                    };
                    let mut desired: DynamicObject = serde_json::from_value(body)?;
                    desired.metadata.name = Some(object.name.clone());
                    desired.metadata.resource_version = None;
                    desired.metadata.managed_fields = None;
                    desired.metadata.owner_references = Some(owner_references);
                    desired
                        .metadata
                        .labels
                        .get_or_insert_with(Default::default)
                        .extend(owner.ownership_labels());

                    let params = PatchParams::apply(FIELD_MANAGER).force();
                    api.patch(&object.name, &params, &Patch::Apply(&desired))
                        .await?
                }
            };

            tracing::debug!(object = %object.key(), owner = %owner.name, control, "established");
            refs.push(typed_reference(object, applied.metadata.uid.clone()));
        }

        Ok(refs)
    }

    async fn relinquish(&self, owner: &RevisionOwner, refs: &[TypedReference]) -> Result<()> {
        for r in refs {
            let api = self.api(&r.api_version, &r.kind);
            let Some(current) = api.get_opt(&r.name).await? else {
                continue;
            };

            let current_refs = current.metadata.owner_references.clone().unwrap_or_default();
            let remaining = without_owner(&current_refs, owner);
            if remaining.len() == current_refs.len() {
                continue;
            }

            if remaining.is_empty() {
                tracing::info!(object = %r.key(), "deleting object without owners");
                match api.delete(&r.name, &DeleteParams::default()).await {
                    Ok(_) => {}
                    Err(kube::Error::Api(resp)) if resp.code == 404 => {}
                    Err(e) => return Err(e.into()),
                }
            } else {
                let patch = json!({
                    "metadata": {
                        "resourceVersion": current.metadata.resource_version,
                        "ownerReferences": remaining,
                    }
                });
                api.patch(&r.name, &PatchParams::default(), &Patch::Merge(&patch))
                    .await?;
            }
        }
        Ok(())
    }
}

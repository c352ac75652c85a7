//! Deployments as controller workloads

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, LocalObjectReference, PodSpec, PodTemplateSpec, SecretVolumeSource, Volume,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::Client;
use kube::api::{Api, DeleteParams, Patch, PatchParams};
use std::collections::BTreeMap;

use super::{LABEL_REVISION, WorkloadManager, WorkloadRequest, WorkloadStatus, replicas_ready};
use crate::error::Result;

/// Field manager for controller deployments
const FIELD_MANAGER: &str = "xpkg-workload";

/// Directory TLS secrets are mounted under
const TLS_MOUNT_ROOT: &str = "/tls";

/// Runs controllers as Deployments
#[derive(Clone)]
pub struct KubeWorkloads {
    client: Client,
}

impl KubeWorkloads {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn build(request: &WorkloadRequest) -> Deployment {
        let mut labels = request.labels.clone();
        labels.insert(LABEL_REVISION.to_string(), request.name.clone());
        let selector = BTreeMap::from([(LABEL_REVISION.to_string(), request.name.clone())]);

        let tls = request.tls_volumes();
        let volumes: Vec<Volume> = tls
            .iter()
            .map(|(volume, secret)| Volume {
                name: volume.to_string(),
                secret: Some(SecretVolumeSource {
                    secret_name: Some(secret.to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            })
            .collect();
        let mounts: Vec<VolumeMount> = tls
            .iter()
            .map(|(volume, _)| VolumeMount {
                name: volume.to_string(),
                mount_path: format!("{}/{}", TLS_MOUNT_ROOT, volume),
                read_only: Some(true),
                ..Default::default()
            })
            .collect();

        Deployment {
            metadata: ObjectMeta {
                name: Some(request.name.clone()),
                namespace: Some(request.namespace.clone()),
                labels: Some(labels.clone()),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(request.replicas),
                selector: LabelSelector {
                    match_labels: Some(selector),
                    ..Default::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(labels),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        containers: vec![Container {
                            name: "package-runtime".to_string(),
                            image: Some(request.image.clone()),
                            volume_mounts: (!mounts.is_empty()).then_some(mounts),
                            ..Default::default()
                        }],
                        image_pull_secrets: (!request.pull_secrets.is_empty()).then(|| {
                            request
                                .pull_secrets
                                .iter()
                                .map(|name| LocalObjectReference { name: name.clone() })
                                .collect()
                        }),
                        volumes: (!volumes.is_empty()).then_some(volumes),
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

#[async_trait]
impl WorkloadManager for KubeWorkloads {
    async fn ensure(&self, request: &WorkloadRequest) -> Result<WorkloadStatus> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), &request.namespace);
        let desired = Self::build(request);

        let params = PatchParams::apply(FIELD_MANAGER).force();
        let deployment = api
            .patch(&request.name, &params, &Patch::Apply(&desired))
            .await?;

        let status = deployment.status.as_ref();
        let desired = request.replicas;
        let ready = status.and_then(|s| s.ready_replicas).unwrap_or(0);
        let updated = status.and_then(|s| s.updated_replicas).unwrap_or(0);
        let available = status.and_then(|s| s.available_replicas).unwrap_or(0);

        let healthy = replicas_ready(desired, ready, updated, available);
        let message = (!healthy).then(|| {
            format!(
                "Waiting: {}/{} ready, {}/{} updated, {}/{} available",
                ready, desired, updated, desired, available, desired
            )
        });

        Ok(WorkloadStatus {
            name: request.name.clone(),
            ready: healthy,
            message,
        })
    }

    async fn remove(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_deployment() {
        let request = WorkloadRequest {
            name: "aws-abc".to_string(),
            namespace: "xpkg-system".to_string(),
            image: "xpkg.io/acme/aws:v1".to_string(),
            replicas: 1,
            pull_secrets: vec!["regcred".to_string()],
            tls_server_secret: Some("aws-tls-server".to_string()),
            ..Default::default()
        };

        let deployment = KubeWorkloads::build(&request);
        let spec = deployment.spec.unwrap();
        assert_eq!(spec.replicas, Some(1));
        assert_eq!(
            spec.selector.match_labels.unwrap().get(LABEL_REVISION),
            Some(&"aws-abc".to_string())
        );

        let pod = spec.template.spec.unwrap();
        assert_eq!(pod.containers[0].image.as_deref(), Some("xpkg.io/acme/aws:v1"));
        assert_eq!(pod.volumes.unwrap().len(), 1);
        assert_eq!(pod.image_pull_secrets.unwrap()[0].name, "regcred");
    }
}

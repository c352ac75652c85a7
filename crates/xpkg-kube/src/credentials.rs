//! Registry credentials from package pull secrets

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::Client;
use kube::api::Api;
use xpkg_core::SourceRef;
use xpkg_repo::oci::DEFAULT_REGISTRY;
use xpkg_repo::{DockerConfig, RegistryCredentials};

use crate::apis::LocalObjectReference;
use crate::error::Result;

/// Secret key holding a Docker config document
pub const DOCKER_CONFIG_KEY: &str = ".dockerconfigjson";

/// Looks up credentials for a source from its pull secrets
#[async_trait]
pub trait CredentialsSource: Send + Sync {
    /// Credentials for the registry of `source`, `None` for anonymous access
    async fn credentials(
        &self,
        source: &SourceRef,
        pull_secrets: &[LocalObjectReference],
    ) -> Result<Option<RegistryCredentials>>;
}

/// Anonymous access only
#[derive(Debug, Clone, Copy, Default)]
pub struct Anonymous;

#[async_trait]
impl CredentialsSource for Anonymous {
    async fn credentials(
        &self,
        _source: &SourceRef,
        _pull_secrets: &[LocalObjectReference],
    ) -> Result<Option<RegistryCredentials>> {
        Ok(None)
    }
}

/// Reads `.dockerconfigjson` pull secrets from one namespace
pub struct SecretCredentials {
    client: Client,
    namespace: String,
}

impl SecretCredentials {
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }
}

#[async_trait]
impl CredentialsSource for SecretCredentials {
    async fn credentials(
        &self,
        source: &SourceRef,
        pull_secrets: &[LocalObjectReference],
    ) -> Result<Option<RegistryCredentials>> {
        let registry = source.registry.as_deref().unwrap_or(DEFAULT_REGISTRY);
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &self.namespace);

        // First secret with an entry for the registry wins
        for secret_ref in pull_secrets {
            let Some(secret) = api.get_opt(&secret_ref.name).await? else {
                tracing::warn!(secret = %secret_ref.name, "pull secret not found");
                continue;
            };

            let Some(data) = secret.data.as_ref().and_then(|d| d.get(DOCKER_CONFIG_KEY)) else {
                continue;
            };

            let config = DockerConfig::from_slice(&data.0)?;
            if let Some(credentials) = config.credentials_for(registry)? {
                return Ok(Some(credentials));
            }
        }

        Ok(None)
    }
}

//! Control loops against a cluster
//!
//! One `kube::runtime::Controller` per kind. The runtime serializes reconciles
//! per object; each run is bounded by the configured deadline and failures
//! are requeued with [`backoff_for`].

use futures::StreamExt;
use kube::runtime::{Controller, controller::Action, watcher};
use kube::{Api, Client, Resource, ResourceExt};
use std::sync::Arc;
use xpkg_repo::OciRegistry;

use crate::apis::{
    Configuration, ConfigurationRevision, PackageResource, Provider, ProviderRevision,
    RevisionResource,
};
use crate::config::ReconcilerConfig;
use crate::credentials::{CredentialsSource, SecretCredentials};
use crate::dependency::DependencyManager;
use crate::error::{KubeError, Result};
use crate::objects::KubeEstablisher;
use crate::package::PackageReconciler;
use crate::revision::RevisionReconciler;
use crate::runtime::{Reconciler, backoff_for, with_deadline};
use crate::store::KubeStore;
use crate::workload::KubeWorkloads;

/// Shared state of one control loop
pub struct Context {
    reconciler: Arc<dyn Reconciler>,
    config: ReconcilerConfig,
}

async fn reconcile<K: Resource>(object: Arc<K>, ctx: Arc<Context>) -> Result<Action> {
    let name = object.name_any();
    let outcome = with_deadline(
        ctx.config.reconcile_deadline,
        ctx.reconciler.reconcile(&name),
    )
    .await?;
    Ok(outcome.into())
}

fn error_policy<K: Resource>(object: Arc<K>, error: &KubeError, ctx: Arc<Context>) -> Action {
    let backoff = backoff_for(error, ctx.config.error_backoff, ctx.config.invalid_backoff);
    tracing::warn!(
        kind = ctx.reconciler.kind(),
        name = %object.name_any(),
        error = %error,
        ?backoff,
        "reconcile failed"
    );
    Action::requeue(backoff)
}

/// Runs every package and revision controller
pub struct ControllerManager {
    client: Client,
    config: ReconcilerConfig,
    registry: Arc<OciRegistry>,
}

impl ControllerManager {
    pub fn new(client: Client, config: ReconcilerConfig) -> Self {
        Self {
            client,
            config,
            registry: Arc::new(OciRegistry::new()),
        }
    }

    /// Use a registry client other than the default
    pub fn with_registry(mut self, registry: OciRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    /// Run until a termination signal is received
    pub async fn run(self) -> Result<()> {
        self.config.validate()?;
        let client = self.client;
        let config = self.config;

        let providers = Arc::new(KubeStore::<Provider>::new(client.clone()));
        let configurations = Arc::new(KubeStore::<Configuration>::new(client.clone()));
        let provider_revisions = Arc::new(KubeStore::<ProviderRevision>::new(client.clone()));
        let configuration_revisions =
            Arc::new(KubeStore::<ConfigurationRevision>::new(client.clone()));

        let credentials: Arc<dyn CredentialsSource> = Arc::new(SecretCredentials::new(
            client.clone(),
            config.workload_namespace.clone(),
        ));
        let establisher = Arc::new(KubeEstablisher::new(client.clone()));
        let workloads = Arc::new(KubeWorkloads::new(client.clone()));
        let dependencies = DependencyManager::new(
            providers.clone(),
            configurations.clone(),
            self.registry.clone(),
            config.install_missing_dependencies,
        );

        let provider_packages = PackageReconciler::<Provider>::new(
            providers,
            provider_revisions.clone(),
            self.registry.clone(),
            credentials.clone(),
            config.clone(),
        );
        let configuration_packages = PackageReconciler::<Configuration>::new(
            configurations,
            configuration_revisions.clone(),
            self.registry.clone(),
            credentials.clone(),
            config.clone(),
        );
        let provider_revisions = RevisionReconciler::<ProviderRevision>::new(
            provider_revisions,
            self.registry.clone(),
            establisher.clone(),
            workloads.clone(),
            dependencies.clone(),
            config.clone(),
        )
        .with_credentials(credentials.clone());
        let configuration_revisions = RevisionReconciler::<ConfigurationRevision>::new(
            configuration_revisions,
            self.registry.clone(),
            establisher,
            workloads,
            dependencies,
            config.clone(),
        )
        .with_credentials(credentials);

        tracing::info!(
            platform = %config.platform_version,
            namespace = %config.workload_namespace,
            "starting package controllers"
        );

        futures::join!(
            package_loop::<Provider>(client.clone(), Arc::new(provider_packages), config.clone()),
            package_loop::<Configuration>(
                client.clone(),
                Arc::new(configuration_packages),
                config.clone()
            ),
            revision_loop::<ProviderRevision>(
                client.clone(),
                Arc::new(provider_revisions),
                config.clone()
            ),
            revision_loop::<ConfigurationRevision>(
                client,
                Arc::new(configuration_revisions),
                config
            ),
        );

        tracing::info!("package controllers stopped");
        Ok(())
    }
}

/// Packages are also woken by changes to the revisions they own
async fn package_loop<P: PackageResource>(
    client: Client,
    reconciler: Arc<dyn Reconciler>,
    config: ReconcilerConfig,
) {
    let ctx = Arc::new(Context { reconciler, config });
    Controller::new(
        Api::<P>::all(client.clone()),
        watcher::Config::default().any_semantic(),
    )
    .owns(Api::<P::Revision>::all(client), watcher::Config::default())
    .shutdown_on_signal()
    .run(reconcile::<P>, error_policy::<P>, ctx)
    .for_each(|result| async move {
        match result {
            Ok((object, _)) => tracing::trace!(name = %object.name, "reconciled"),
            Err(e) => tracing::debug!(error = %e, "controller error"),
        }
    })
    .await;
}

async fn revision_loop<R: RevisionResource>(
    client: Client,
    reconciler: Arc<dyn Reconciler>,
    config: ReconcilerConfig,
) {
    let ctx = Arc::new(Context { reconciler, config });
    Controller::new(
        Api::<R>::all(client),
        watcher::Config::default().any_semantic(),
    )
    .shutdown_on_signal()
    .run(reconcile::<R>, error_policy::<R>, ctx)
    .for_each(|result| async move {
        match result {
            Ok((object, _)) => tracing::trace!(name = %object.name, "reconciled"),
            Err(e) => tracing::debug!(error = %e, "controller error"),
        }
    })
    .await;
}

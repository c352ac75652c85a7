//! Revision reconciler
//!
//! Drives one revision through its lifecycle:
//!
//! ```text
//! Pending -> Installing -> ActiveHealthy | InactiveParked
//!                 \-> Failed (invalid contents, conflicts)
//! any -> Deleting (deletion timestamp set)
//! ```
//!
//! Each run fetches the package contents, establishes the objects they carry,
//! runs the controller workload when the revision is Active and resolves the
//! revision's dependencies. Siblings are never consulted.

use async_trait::async_trait;
use kube::Resource;
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::Instrument;
use xpkg_core::{PackageContents, SourceRef};
use xpkg_repo::{FetchRequest, PackageFetcher};

use crate::apis::{
    Condition, Conditioned, ControllerReference, LABEL_PACKAGE, LABEL_PROVIDER_FAMILY, Object,
    PackageRevision, REVISION_FINALIZER, RevisionPhase, RevisionResource, TlsSecretNames,
    reasons, ref_names,
};
use crate::config::ReconcilerConfig;
use crate::credentials::{Anonymous, CredentialsSource};
use crate::dependency::{DependencyManager, DependencyReport};
use crate::error::{ErrorClass, KubeError, Result};
use crate::objects::{Establisher, RevisionOwner};
use crate::runtime::{ReconcileOutcome, Reconciler};
use crate::store::ObjectStore;
use crate::tls::{PackageScopedNames, TlsRequirements, TlsSecretNamer};
use crate::workload::{WorkloadManager, WorkloadRequest, WorkloadStatus};

/// Reconciles revisions of kind `R`
pub struct RevisionReconciler<R: RevisionResource> {
    revisions: Arc<dyn ObjectStore<R>>,
    fetcher: Arc<dyn PackageFetcher>,
    establisher: Arc<dyn Establisher>,
    workloads: Arc<dyn WorkloadManager>,
    dependencies: DependencyManager,
    credentials: Arc<dyn CredentialsSource>,
    tls: Arc<dyn TlsSecretNamer>,
    config: ReconcilerConfig,
    _kind: PhantomData<fn() -> R>,
}

impl<R: RevisionResource> RevisionReconciler<R> {
    pub fn new(
        revisions: Arc<dyn ObjectStore<R>>,
        fetcher: Arc<dyn PackageFetcher>,
        establisher: Arc<dyn Establisher>,
        workloads: Arc<dyn WorkloadManager>,
        dependencies: DependencyManager,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            revisions,
            fetcher,
            establisher,
            workloads,
            dependencies,
            credentials: Arc::new(Anonymous),
            tls: Arc::new(PackageScopedNames),
            config,
            _kind: PhantomData,
        }
    }

    /// Look up pull credentials through `credentials`
    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialsSource>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Name TLS secrets through `namer`
    pub fn with_tls_namer(mut self, namer: Arc<dyn TlsSecretNamer>) -> Self {
        self.tls = namer;
        self
    }

    async fn run(&self, name: &str) -> Result<ReconcileOutcome> {
        let Some(mut revision) = self.revisions.get_opt(name).await? else {
            return Ok(ReconcileOutcome::done());
        };

        if revision.is_deleting() {
            return self.finalize(revision).await;
        }

        if !has_finalizer(&revision) {
            revision
                .object_meta_mut()
                .finalizers
                .get_or_insert_with(Vec::new)
                .push(REVISION_FINALIZER.to_string());
            revision = self.revisions.update(&revision).await?;
        }

        let before = status_of(&revision)?;
        if revision.phase().is_none() {
            revision.set_phase(Some(RevisionPhase::Pending));
        }

        let contents = match self.fetch(&revision).await {
            Ok(contents) => contents,
            Err(e) if e.class() == ErrorClass::ContentInvalid => {
                return self
                    .fail(revision, &before, reasons::INVALID_PACKAGE_CONTENTS, &e)
                    .await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot fetch package contents");
                self.write_status(&revision, &before).await?;
                return Err(e);
            }
        };

        if !revision.ignore_crossplane_constraints().unwrap_or(false) {
            if let Err(e) = contents.check_platform(&self.config.platform_version) {
                let e = KubeError::from(e);
                return self
                    .fail(revision, &before, reasons::INCOMPATIBLE_PLATFORM_VERSION, &e)
                    .await;
            }
        }

        revision = self.update_spec(revision, &contents).await?;
        revision.set_phase(Some(RevisionPhase::Installing));

        let active = revision.is_active();
        let owner = RevisionOwner::of(&revision, contents.meta.family());
        match self
            .establisher
            .establish(&owner, &contents.objects, active)
            .await
        {
            Ok(refs) => revision.set_object_refs(refs),
            Err(e @ KubeError::ObjectConflict { .. }) => {
                return self
                    .fail(revision, &before, reasons::OBJECT_CONFLICT, &e)
                    .await;
            }
            Err(e) => return Err(e),
        }

        let workload = self.ensure_workload(&mut revision, &contents).await?;
        revision.set_permission_requests(contents.permission_requests().to_vec());

        let dependencies = if revision.skip_dependency_resolution().unwrap_or(false) {
            Some(DependencyReport::skipped())
        } else if active {
            Some(self.dependencies.resolve(&contents.dependencies).await?)
        } else {
            // Inactive revisions keep their last counters
            None
        };
        if let Some(report) = dependencies {
            if !report.created.is_empty() {
                tracing::info!(created = ?report.created, "installing missing dependencies");
            }
            revision.set_dependency_status(report.status);
            revision.set_condition(report.condition);
        }

        let healthy = match &workload {
            Some(w) if active && !w.ready => Condition::unhealthy(
                reasons::AWAITING_CONTROLLER,
                w.message.clone().unwrap_or_default(),
            ),
            _ => Condition::healthy(),
        };
        let is_healthy = healthy.is_true();
        revision.set_condition(healthy);

        let phase = if !active {
            RevisionPhase::InactiveParked
        } else if is_healthy && revision.dependency_status().all_installed() {
            RevisionPhase::ActiveHealthy
        } else {
            RevisionPhase::Installing
        };
        revision.set_phase(Some(phase));

        self.write_status(&revision, &before).await?;
        tracing::debug!(%phase, active, "revision reconciled");

        Ok(match phase {
            RevisionPhase::ActiveHealthy | RevisionPhase::InactiveParked => {
                ReconcileOutcome::requeue(self.config.resync_interval)
            }
            _ => ReconcileOutcome::requeue(self.config.short_requeue),
        })
    }

    async fn fetch(&self, revision: &R) -> Result<PackageContents> {
        let source = SourceRef::parse(revision.source())?;
        let credentials = self
            .credentials
            .credentials(&source, revision.package_pull_secrets())
            .await?;
        let request = FetchRequest::new(source).with_credentials(credentials);
        let contents = self.fetcher.fetch(&request).await?;
        contents.ensure_kind(revision.package_kind())?;
        Ok(contents)
    }

    /// Assign TLS secret names and the family label
    async fn update_spec(&self, mut revision: R, contents: &PackageContents) -> Result<R> {
        let controller = contents.meta.controller.as_ref();
        let requirements = TlsRequirements {
            controller: controller.is_some(),
            webhooks: controller.is_some_and(|c| c.webhooks),
            ess: self.config.ess_enabled,
        };
        let package = revision
            .parent_package()
            .unwrap_or_else(|| revision.object_name())
            .to_string();

        let mut changed = self.tls.assign(&package, requirements, &mut revision);

        if let Some(family) = contents.meta.family() {
            if revision.label(LABEL_PROVIDER_FAMILY) != Some(family) {
                revision
                    .object_meta_mut()
                    .labels
                    .get_or_insert_with(BTreeMap::new)
                    .insert(LABEL_PROVIDER_FAMILY.to_string(), family.to_string());
                changed = true;
            }
        }

        if !changed {
            return Ok(revision);
        }
        tracing::debug!("assigned TLS secret names and labels");
        self.revisions.update(&revision).await
    }

    async fn ensure_workload(
        &self,
        revision: &mut R,
        contents: &PackageContents,
    ) -> Result<Option<WorkloadStatus>> {
        let Some(controller) = &contents.meta.controller else {
            return Ok(None);
        };

        let mut labels = revision.common_labels().clone();
        if let Some(package) = revision.parent_package() {
            labels.insert(LABEL_PACKAGE.to_string(), package.to_string());
        }

        let request = WorkloadRequest {
            name: revision.object_name().to_string(),
            namespace: self.config.workload_namespace.clone(),
            image: controller
                .image
                .clone()
                .unwrap_or_else(|| revision.source().to_string()),
            replicas: if revision.is_active() { 1 } else { 0 },
            labels,
            pull_secrets: ref_names(revision.package_pull_secrets()),
            tls_server_secret: revision.tls_server_secret_name().map(str::to_string),
            tls_client_secret: revision.tls_client_secret_name().map(str::to_string),
            webhook_tls_secret: revision.webhook_tls_secret_name().map(str::to_string),
        };

        let status = self.workloads.ensure(&request).await?;
        revision.set_controller_reference(Some(ControllerReference {
            name: status.name.clone(),
        }));
        Ok(Some(status))
    }

    /// Report a terminal failure and back off
    async fn fail(
        &self,
        mut revision: R,
        before: &serde_json::Value,
        reason: &str,
        error: &KubeError,
    ) -> Result<ReconcileOutcome> {
        tracing::warn!(error = %error, reason, "revision failed");
        revision.set_condition(Condition::unhealthy(reason, error.to_string()));
        revision.set_phase(Some(RevisionPhase::Failed));
        self.write_status(&revision, before).await?;
        Ok(ReconcileOutcome::requeue(self.config.invalid_backoff))
    }

    /// Release owned objects and the workload, then drop the finalizer
    async fn finalize(&self, mut revision: R) -> Result<ReconcileOutcome> {
        if !has_finalizer(&revision) {
            return Ok(ReconcileOutcome::done());
        }

        if revision.phase() != Some(RevisionPhase::Deleting) {
            revision.set_phase(Some(RevisionPhase::Deleting));
            revision = self.revisions.update_status(&revision).await?;
        }

        let owner = RevisionOwner::of(&revision, revision.label(LABEL_PROVIDER_FAMILY));
        self.establisher
            .relinquish(&owner, revision.object_refs())
            .await?;

        if revision.controller_reference().is_some() {
            self.workloads
                .remove(&self.config.workload_namespace, revision.object_name())
                .await?;
        }

        if let Some(finalizers) = revision.object_meta_mut().finalizers.as_mut() {
            finalizers.retain(|f| f != REVISION_FINALIZER);
        }
        match self.revisions.update(&revision).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        tracing::info!(objects = revision.object_refs().len(), "released revision");
        Ok(ReconcileOutcome::done())
    }

    async fn write_status(&self, revision: &R, before: &serde_json::Value) -> Result<()> {
        if status_of(revision)? == *before {
            return Ok(());
        }
        self.revisions.update_status(revision).await?;
        Ok(())
    }
}

#[async_trait]
impl<R: RevisionResource> Reconciler for RevisionReconciler<R> {
    fn kind(&self) -> &'static str {
        match R::kind(&()).as_ref() {
            "ProviderRevision" => "ProviderRevision",
            "ConfigurationRevision" => "ConfigurationRevision",
            _ => "PackageRevision",
        }
    }

    async fn reconcile(&self, name: &str) -> Result<ReconcileOutcome> {
        let span = tracing::info_span!("reconcile", kind = self.kind(), revision = %name);
        self.run(name).instrument(span).await
    }
}

fn has_finalizer(revision: &dyn PackageRevision) -> bool {
    revision
        .object_meta()
        .finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|f| f == REVISION_FINALIZER))
}

/// Serialized status, compared to skip no-op writes
fn status_of<R: RevisionResource>(revision: &R) -> Result<serde_json::Value> {
    let value = serde_json::to_value(revision)?;
    Ok(value.get("status").cloned().unwrap_or_default())
}

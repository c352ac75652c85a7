//! Package reconciler
//!
//! Owns the revisions of one package. Each run resolves the package source to
//! an identifier, plans the revision mutations with [`plan_revisions`] and
//! applies them in order: create, then activation and propagation updates,
//! then retention deletes. The package status mirrors the current revision.

pub mod plan;

pub use plan::{
    CurrentRevision, NewRevision, RevisionPlan, RevisionUpdate, plan_revisions, propagate,
    propagated_matches,
};

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::Resource;
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::Instrument;
use xpkg_core::SourceRef;
use xpkg_repo::{FetchRequest, IdentifierResolver};

use crate::apis::{
    ANNOTATION_IDENTIFIER, Condition, ConditionStatus, Conditioned, LABEL_PACKAGE, Object,
    Package, PackageResource, PackageRevision, PackageRevisionList, RevisionResource,
    TYPE_HEALTHY, reasons,
};
use crate::config::ReconcilerConfig;
use crate::credentials::CredentialsSource;
use crate::error::{KubeError, Result};
use crate::runtime::{ReconcileOutcome, Reconciler};
use crate::store::{ObjectStore, Selector};
use crate::tls::carry_forward;

/// Status fields the package reconciler writes
#[derive(Debug, Clone, PartialEq)]
struct StatusSnapshot {
    current_revision: Option<String>,
    current_identifier: Option<String>,
    last_revision: Option<i64>,
    conditions: Vec<Condition>,
}

impl StatusSnapshot {
    fn of(package: &dyn Package) -> Self {
        Self {
            current_revision: package.current_revision().map(str::to_string),
            current_identifier: package.current_identifier().map(str::to_string),
            last_revision: package.last_revision(),
            conditions: package.conditions().to_vec(),
        }
    }
}

/// Reconciles packages of kind `P`
pub struct PackageReconciler<P: PackageResource> {
    packages: Arc<dyn ObjectStore<P>>,
    revisions: Arc<dyn ObjectStore<P::Revision>>,
    resolver: Arc<dyn IdentifierResolver>,
    credentials: Arc<dyn CredentialsSource>,
    config: ReconcilerConfig,
    _kind: PhantomData<fn() -> P>,
}

impl<P: PackageResource> PackageReconciler<P> {
    pub fn new(
        packages: Arc<dyn ObjectStore<P>>,
        revisions: Arc<dyn ObjectStore<P::Revision>>,
        resolver: Arc<dyn IdentifierResolver>,
        credentials: Arc<dyn CredentialsSource>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            packages,
            revisions,
            resolver,
            credentials,
            config,
            _kind: PhantomData,
        }
    }

    async fn run(&self, name: &str) -> Result<ReconcileOutcome> {
        let Some(mut package) = self.packages.get_opt(name).await? else {
            self.delete_orphans(name).await?;
            return Ok(ReconcileOutcome::done());
        };
        if package.is_deleting() {
            // Revisions are collected through their owner references
            return Ok(ReconcileOutcome::done());
        }
        let before = StatusSnapshot::of(&package);

        let identifier = match self.resolve_identifier(&package).await {
            Ok(identifier) => identifier,
            Err(e) => {
                tracing::warn!(error = %e, "cannot resolve package source");
                package.set_condition(Condition::unhealthy(
                    reasons::SOURCE_RESOLUTION_FAILED,
                    e.to_string(),
                ));
                self.write_status(&package, &before).await?;
                return Err(e);
            }
        };

        let owned = self
            .revisions
            .list(&Selector::all().with_label(LABEL_PACKAGE, name))
            .await?;
        let views = P::RevisionList::from(owned.clone()).get_revisions();
        let plan = plan_revisions(&package, &views, &identifier);

        if plan.is_noop() {
            tracing::debug!(%identifier, target = %plan.target, "revisions up to date");
        }

        if let Err(e) = self.apply(&package, &owned, &plan).await {
            let reason = match &e {
                Failure::Create(_) => reasons::REVISION_CREATION_FAILED,
                Failure::Update(_) => reasons::REVISION_UPDATE_FAILED,
                Failure::Delete(_) => reasons::REVISION_DELETION_FAILED,
            };
            if !matches!(e, Failure::Create(_)) {
                package.set_last_revision(Some(plan.last_revision));
            }
            let e = e.into_inner();
            tracing::warn!(error = %e, reason, "revision mutation failed");
            package.set_condition(Condition::unhealthy(reason, e.to_string()));
            self.write_status(&package, &before).await?;
            return Err(e);
        }

        package.set_last_revision(Some(plan.last_revision));
        match &plan.current {
            Some(current) => {
                package.set_current_revision(Some(current.name.clone()));
                package.set_current_identifier(current.identifier.clone());
                package.set_condition(mirror_health(&current.healthy));
            }
            None if package.current_revision().is_none() => {
                package.set_condition(awaiting_revision());
            }
            None => {}
        }

        self.write_status(&package, &before).await?;

        Ok(if plan.settled {
            ReconcileOutcome::requeue(self.config.resync_interval)
        } else {
            ReconcileOutcome::requeue(self.config.short_requeue)
        })
    }

    async fn resolve_identifier(&self, package: &P) -> Result<String> {
        let source = SourceRef::parse(package.source())?;
        let credentials = self
            .credentials
            .credentials(&source, package.package_pull_secrets())
            .await?;
        let request = FetchRequest::new(source).with_credentials(credentials);
        Ok(self.resolver.resolve(&request).await?)
    }

    async fn apply(
        &self,
        package: &P,
        owned: &[P::Revision],
        plan: &RevisionPlan,
    ) -> std::result::Result<(), Failure> {
        if let Some(new) = &plan.create {
            let revision = self.build_revision(package, owned, new);
            self.revisions
                .create(&revision)
                .await
                .map_err(Failure::Create)?;
            tracing::info!(
                revision = %new.name,
                number = new.revision,
                identifier = %new.identifier,
                state = %new.desired_state,
                "created revision"
            );
        }

        for update in &plan.updates {
            let Some(existing) = owned.iter().find(|r| r.object_name() == update.name) else {
                continue;
            };
            let mut revision = existing.clone();
            if let Some(state) = update.desired_state {
                revision.set_desired_state(state);
            }
            if update.propagate {
                propagate(package, &mut revision);
            }
            self.revisions
                .update(&revision)
                .await
                .map_err(Failure::Update)?;
            tracing::info!(
                revision = %update.name,
                state = %revision.desired_state(),
                propagated = update.propagate,
                "updated revision"
            );
        }

        for name in &plan.deletes {
            match self.revisions.delete(name).await {
                Ok(()) => tracing::info!(revision = %name, "deleted revision beyond history limit"),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(Failure::Delete(e)),
            }
        }

        Ok(())
    }

    fn build_revision(&self, package: &P, owned: &[P::Revision], new: &NewRevision) -> P::Revision {
        let mut revision = <P::Revision as RevisionResource>::new_revision(&new.name);

        let mut labels: BTreeMap<String, String> = package.common_labels().clone();
        labels.insert(LABEL_PACKAGE.to_string(), package.object_name().to_string());
        let meta = revision.object_meta_mut();
        meta.labels = Some(labels);
        meta.annotations = Some(BTreeMap::from([(
            ANNOTATION_IDENTIFIER.to_string(),
            new.identifier.clone(),
        )]));
        meta.owner_references = package.object_meta().uid.clone().map(|uid| {
            vec![OwnerReference {
                api_version: P::api_version(&()).to_string(),
                kind: P::kind(&()).to_string(),
                name: package.object_name().to_string(),
                uid,
                controller: Some(true),
                block_owner_deletion: Some(true),
            }]
        });

        revision.set_source(package.source().to_string());
        revision.set_revision(new.revision);
        revision.set_desired_state(new.desired_state);
        propagate(package, &mut revision);

        let current = package
            .current_revision()
            .and_then(|name| owned.iter().find(|r| r.object_name() == name));
        if let Some(current) = current {
            carry_forward(current, &mut revision);
        }

        revision
    }

    async fn write_status(&self, package: &P, before: &StatusSnapshot) -> Result<()> {
        if StatusSnapshot::of(package) == *before {
            return Ok(());
        }
        self.packages.update_status(package).await?;
        Ok(())
    }

    async fn delete_orphans(&self, name: &str) -> Result<()> {
        let orphans = self
            .revisions
            .list(&Selector::all().with_label(LABEL_PACKAGE, name))
            .await?;
        for revision in orphans {
            if revision.is_deleting() {
                continue;
            }
            match self.revisions.delete(revision.object_name()).await {
                Ok(()) => {
                    tracing::info!(revision = revision.object_name(), "deleted revision of removed package")
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<P: PackageResource> Reconciler for PackageReconciler<P> {
    fn kind(&self) -> &'static str {
        package_kind_name::<P>()
    }

    async fn reconcile(&self, name: &str) -> Result<ReconcileOutcome> {
        let span = tracing::info_span!("reconcile", kind = self.kind(), package = %name);
        self.run(name).instrument(span).await
    }
}

fn package_kind_name<P: PackageResource>() -> &'static str {
    match P::kind(&()).as_ref() {
        "Provider" => "Provider",
        "Configuration" => "Configuration",
        _ => "Package",
    }
}

/// Which mutation step failed
enum Failure {
    Create(KubeError),
    Update(KubeError),
    Delete(KubeError),
}

impl Failure {
    fn into_inner(self) -> KubeError {
        match self {
            Failure::Create(e) | Failure::Update(e) | Failure::Delete(e) => e,
        }
    }
}

/// Package health mirroring a revision's `Healthy` condition
fn mirror_health(revision: &Condition) -> Condition {
    if revision.status == ConditionStatus::Unknown {
        return awaiting_revision();
    }
    Condition::new(TYPE_HEALTHY, revision.status, &revision.reason).with_message(&revision.message)
}

fn awaiting_revision() -> Condition {
    Condition::new(
        TYPE_HEALTHY,
        ConditionStatus::Unknown,
        reasons::AWAITING_REVISION,
    )
}

//! Dependency status tracking
//!
//! Folds the resolver's per-dependency outcomes into the three counters and
//! the `DependenciesSatisfied` condition of a revision. Missing dependencies
//! are installed on demand by creating a package for the highest tag that
//! satisfies the constraint; the new package counts as found but pending
//! until a later pass sees it installed.

use std::sync::Arc;
use xpkg_core::{Dependency, PackageKind, SourceRef};
use xpkg_repo::{
    DependencyOutcome, DependencyResolver, FetchRequest, InstalledPackage, TagLister,
    select_install_source,
};

use crate::apis::{
    Condition, ConditionStatus, Configuration, DependencyStatus, Package, PackageResource,
    Provider, TYPE_DEPENDENCIES_SATISFIED, reasons,
};
use crate::error::{KubeError, Result};
use crate::store::{ObjectStore, Selector};

/// Dependency counters and condition for one revision
#[derive(Debug, Clone, PartialEq)]
pub struct DependencyReport {
    pub status: DependencyStatus,
    pub condition: Condition,
    /// Packages created for missing dependencies during this pass
    pub created: Vec<String>,
}

impl DependencyReport {
    /// Report for a revision that skips resolution
    pub fn skipped() -> Self {
        Self {
            status: DependencyStatus::default(),
            condition: Condition::new(
                TYPE_DEPENDENCIES_SATISFIED,
                ConditionStatus::True,
                reasons::DEPENDENCY_RESOLUTION_SKIPPED,
            ),
            created: Vec::new(),
        }
    }

    fn from_tally(tally: Tally, created: Vec<String>) -> Self {
        let status = DependencyStatus::new(tally.found, tally.installed, tally.invalid);
        let condition = if status.invalid > 0 {
            Condition::new(
                TYPE_DEPENDENCIES_SATISFIED,
                ConditionStatus::False,
                reasons::DEPENDENCIES_INVALID,
            )
            .with_message(tally.problems.join("; "))
        } else if status.installed < status.found {
            Condition::new(
                TYPE_DEPENDENCIES_SATISFIED,
                ConditionStatus::False,
                reasons::DEPENDENCIES_PENDING,
            )
            .with_message(format!(
                "{} of {} dependencies installed",
                status.installed, status.found
            ))
        } else {
            Condition::new(
                TYPE_DEPENDENCIES_SATISFIED,
                ConditionStatus::True,
                reasons::DEPENDENCIES_INSTALLED,
            )
        };
        Self {
            status,
            condition,
            created,
        }
    }
}

#[derive(Debug, Default)]
struct Tally {
    found: i64,
    installed: i64,
    invalid: i64,
    problems: Vec<String>,
}

/// Result of installing a missing dependency
enum Install {
    Created(String),
    /// A matching package appeared concurrently
    Pending,
    Invalid(String),
}

/// Resolves revision dependencies against the installed packages
#[derive(Clone)]
pub struct DependencyManager {
    providers: Arc<dyn ObjectStore<Provider>>,
    configurations: Arc<dyn ObjectStore<Configuration>>,
    tags: Arc<dyn TagLister>,
    install_missing: bool,
}

impl DependencyManager {
    pub fn new(
        providers: Arc<dyn ObjectStore<Provider>>,
        configurations: Arc<dyn ObjectStore<Configuration>>,
        tags: Arc<dyn TagLister>,
        install_missing: bool,
    ) -> Self {
        Self {
            providers,
            configurations,
            tags,
            install_missing,
        }
    }

    /// Snapshot of every installed package
    async fn installed(&self) -> Result<Vec<InstalledPackage>> {
        let mut installed = Vec::new();
        for p in self.providers.list(&Selector::all()).await? {
            installed.extend(installed_view(&p));
        }
        for c in self.configurations.list(&Selector::all()).await? {
            installed.extend(installed_view(&c));
        }
        Ok(installed)
    }

    /// Resolve the direct dependencies of one revision
    pub async fn resolve(&self, dependencies: &[Dependency]) -> Result<DependencyReport> {
        let installed = self.installed().await?;
        let resolutions = DependencyResolver::from_installed(&installed).resolve(dependencies);

        let mut tally = Tally::default();
        let mut created = Vec::new();

        for resolved in resolutions {
            tally.found += 1;
            let dependency = &resolved.dependency;

            match resolved.outcome {
                DependencyOutcome::Installed { package } => {
                    tracing::debug!(dependency = %dependency, %package, "dependency installed");
                    tally.installed += 1;
                }
                DependencyOutcome::Invalid { reason } => {
                    tracing::info!(dependency = %dependency, %reason, "dependency invalid");
                    tally.invalid += 1;
                    tally.problems.push(reason);
                }
                DependencyOutcome::Missing if !self.install_missing => {
                    tracing::debug!(dependency = %dependency, "dependency missing, installation disabled");
                }
                DependencyOutcome::Missing => match self.install(dependency).await? {
                    Install::Created(name) => created.push(name),
                    Install::Pending => {}
                    Install::Invalid(reason) => {
                        tally.invalid += 1;
                        tally.problems.push(reason);
                    }
                },
            }
        }

        Ok(DependencyReport::from_tally(tally, created))
    }

    async fn install(&self, dependency: &Dependency) -> Result<Install> {
        let request = FetchRequest::new(dependency.source.clone());
        let tags = match self.tags.list_tags(&request).await {
            Ok(tags) => tags,
            Err(e) => {
                // Counted as pending; the next pass retries
                tracing::warn!(dependency = %dependency, error = %e, "cannot list tags");
                return Ok(Install::Pending);
            }
        };

        let Some(source) = select_install_source(dependency, &tags) else {
            return Ok(Install::Invalid(format!(
                "no version of {} satisfies {}",
                dependency.source.repository_key(),
                dependency.constraint
            )));
        };

        match dependency.kind {
            PackageKind::Provider => install_package(self.providers.as_ref(), &source).await,
            PackageKind::Configuration => {
                install_package(self.configurations.as_ref(), &source).await
            }
        }
    }
}

fn installed_view(package: &dyn Package) -> Option<InstalledPackage> {
    match SourceRef::parse(package.source()) {
        Ok(source) => Some(InstalledPackage {
            kind: package.package_kind(),
            name: package.object_name().to_string(),
            source,
            identifier: package.current_identifier().map(str::to_string),
        }),
        Err(e) => {
            tracing::debug!(package = package.object_name(), error = %e, "skipping package with unparsable source");
            None
        }
    }
}

async fn install_package<P: PackageResource>(
    store: &dyn ObjectStore<P>,
    source: &SourceRef,
) -> Result<Install> {
    let name = source.package_name();
    let package = P::new_package(&name, &source.to_string());

    match store.create(&package).await {
        Ok(_) => {
            tracing::info!(package = %name, source = %source, "installed missing dependency");
            Ok(Install::Created(name))
        }
        Err(KubeError::AlreadyExists { .. }) => {
            let existing = store.get(&name).await?;
            let same_repository = SourceRef::parse(existing.source())
                .map(|s| s.repository_key() == source.repository_key())
                .unwrap_or(false);
            if same_repository {
                Ok(Install::Pending)
            } else {
                Ok(Install::Invalid(format!(
                    "package {} already exists with source {}",
                    name,
                    existing.source()
                )))
            }
        }
        Err(e) => Err(e),
    }
}

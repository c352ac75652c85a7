//! Dependency resolution against installed packages
//!
//! Key properties:
//! - **Direct dependencies only**: each package resolves what it declares;
//!   deeper chains converge as every package reconciles in turn, so cycles
//!   are harmless
//! - **No automatic downgrade**: an installed package that violates a
//!   constraint is reported, never changed
//! - **Lookup by repository**: a dependency matches an installed package of
//!   the same kind from the same repository, whatever its tag

use semver::Version;
use std::fmt;
use xpkg_core::{Constraint, Dependency, PackageKind, SourceRef, parse_version};

/// View of an installed package used during resolution
#[derive(Debug, Clone, PartialEq)]
pub struct InstalledPackage {
    pub kind: PackageKind,
    pub name: String,
    pub source: SourceRef,
    /// Identifier of the package's current revision, once known
    pub identifier: Option<String>,
}

impl InstalledPackage {
    /// Version derived from the source tag
    pub fn version(&self) -> Option<Version> {
        self.source.tag.as_deref().and_then(parse_version)
    }
}

/// Outcome of resolving one dependency
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyOutcome {
    /// A matching package is installed and satisfies the constraint
    Installed { package: String },
    /// No package of that kind is installed from the repository
    Missing,
    /// An installed package conflicts with the constraint
    Invalid { reason: String },
}

impl fmt::Display for DependencyOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Installed { package } => write!(f, "installed as {}", package),
            Self::Missing => write!(f, "missing"),
            Self::Invalid { reason } => write!(f, "invalid: {}", reason),
        }
    }
}

/// A dependency paired with its outcome
#[derive(Debug, Clone)]
pub struct ResolvedDependency {
    pub dependency: Dependency,
    pub outcome: DependencyOutcome,
}

/// Type alias for the installed package lookup function
type InstalledLookup<'a> = Box<dyn Fn(PackageKind, &str) -> Option<InstalledPackage> + 'a>;

/// Dependency resolver
pub struct DependencyResolver<'a> {
    /// Function to find an installed package by kind and repository key
    lookup: InstalledLookup<'a>,
}

impl<'a> DependencyResolver<'a> {
    /// Create a resolver with a custom lookup
    pub fn new<F>(lookup: F) -> Self
    where
        F: Fn(PackageKind, &str) -> Option<InstalledPackage> + 'a,
    {
        Self {
            lookup: Box::new(lookup),
        }
    }

    /// Create a resolver over a snapshot of installed packages
    pub fn from_installed(installed: &'a [InstalledPackage]) -> Self {
        Self::new(move |kind, key| {
            installed
                .iter()
                .find(|p| p.kind == kind && p.source.repository_key() == key)
                .cloned()
        })
    }

    /// Resolve every declared dependency
    pub fn resolve(&self, dependencies: &[Dependency]) -> Vec<ResolvedDependency> {
        dependencies
            .iter()
            .map(|dep| ResolvedDependency {
                dependency: dep.clone(),
                outcome: self.resolve_one(dep),
            })
            .collect()
    }

    /// Resolve one dependency
    pub fn resolve_one(&self, dependency: &Dependency) -> DependencyOutcome {
        let key = dependency.source.repository_key();
        match (self.lookup)(dependency.kind, &key) {
            None => DependencyOutcome::Missing,
            Some(installed) => check_installed(&installed, &dependency.constraint),
        }
    }
}

fn check_installed(installed: &InstalledPackage, constraint: &Constraint) -> DependencyOutcome {
    let satisfied = |package: &InstalledPackage| DependencyOutcome::Installed {
        package: package.name.clone(),
    };

    match constraint {
        Constraint::Digest(_) => {
            let candidates = [
                installed.source.pinned_digest(),
                installed.identifier.as_deref(),
            ];
            if candidates.iter().flatten().any(|d| constraint.matches_digest(d)) {
                satisfied(installed)
            } else {
                DependencyOutcome::Invalid {
                    reason: format!(
                        "installed package {} is not at digest {}",
                        installed.name, constraint
                    ),
                }
            }
        }
        Constraint::Range(_) => match installed.version() {
            Some(version) if constraint.matches_version(&version) => satisfied(installed),
            Some(version) => DependencyOutcome::Invalid {
                reason: format!(
                    "installed package {} at version {} does not satisfy {}",
                    installed.name, version, constraint
                ),
            },
            None => DependencyOutcome::Invalid {
                reason: format!(
                    "cannot determine the version of installed package {}",
                    installed.name
                ),
            },
        },
    }
}

/// Choose the source to install for a missing dependency.
///
/// Picks the highest available tag satisfying the constraint, or the pinned
/// digest for digest constraints. `None` when nothing satisfies it.
pub fn select_install_source(dependency: &Dependency, tags: &[String]) -> Option<SourceRef> {
    match &dependency.constraint {
        Constraint::Digest(digest) => Some(SourceRef {
            registry: dependency.source.registry.clone(),
            repository: dependency.source.repository.clone(),
            tag: None,
            digest: Some(digest.clone()),
        }),
        constraint @ Constraint::Range(_) => constraint
            .highest_satisfying(tags)
            .map(|tag| dependency.source.with_tag(tag)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dep(kind: PackageKind, source: &str, version: &str) -> Dependency {
        Dependency {
            kind,
            source: SourceRef::parse(source).unwrap(),
            constraint: Constraint::parse(version).unwrap(),
        }
    }

    fn installed(kind: PackageKind, name: &str, source: &str) -> InstalledPackage {
        InstalledPackage {
            kind,
            name: name.to_string(),
            source: SourceRef::parse(source).unwrap(),
            identifier: None,
        }
    }

    #[test]
    fn test_missing_dependency() {
        let resolver = DependencyResolver::from_installed(&[]);
        let outcome = resolver.resolve_one(&dep(
            PackageKind::Provider,
            "xpkg.io/acme/provider-aws",
            ">=v1.0.0",
        ));
        assert_eq!(outcome, DependencyOutcome::Missing);
    }

    #[test]
    fn test_installed_and_satisfied() {
        let packages = vec![installed(
            PackageKind::Provider,
            "acme-provider-aws",
            "xpkg.io/acme/provider-aws:v1.2.0",
        )];
        let resolver = DependencyResolver::from_installed(&packages);

        let outcome = resolver.resolve_one(&dep(
            PackageKind::Provider,
            "xpkg.io/acme/provider-aws:v1.0.0",
            ">=v1.0.0",
        ));
        assert_eq!(
            outcome,
            DependencyOutcome::Installed {
                package: "acme-provider-aws".to_string()
            }
        );
    }

    #[test]
    fn test_installed_but_conflicting_is_invalid() {
        let packages = vec![installed(
            PackageKind::Provider,
            "acme-provider-aws",
            "xpkg.io/acme/provider-aws:v1.2.0",
        )];
        let resolver = DependencyResolver::from_installed(&packages);

        let outcome =
            resolver.resolve_one(&dep(PackageKind::Provider, "xpkg.io/acme/provider-aws", ">=v2.0.0"));
        match outcome {
            DependencyOutcome::Invalid { reason } => {
                assert!(reason.contains("1.2.0"));
                assert!(reason.contains(">=2.0.0"));
            }
            other => panic!("expected invalid, got {:?}", other),
        }
    }

    #[test]
    fn test_kind_must_match() {
        let packages = vec![installed(
            PackageKind::Configuration,
            "acme-thing",
            "xpkg.io/acme/thing:v1.0.0",
        )];
        let resolver = DependencyResolver::from_installed(&packages);
        let outcome = resolver.resolve_one(&dep(PackageKind::Provider, "xpkg.io/acme/thing", ""));
        assert_eq!(outcome, DependencyOutcome::Missing);
    }

    #[test]
    fn test_unversioned_install_is_invalid() {
        let packages = vec![installed(
            PackageKind::Provider,
            "acme-p",
            "xpkg.io/acme/p:latest",
        )];
        let resolver = DependencyResolver::from_installed(&packages);
        let outcome = resolver.resolve_one(&dep(PackageKind::Provider, "xpkg.io/acme/p", ">=v1.0.0"));
        assert!(matches!(outcome, DependencyOutcome::Invalid { .. }));
    }

    #[test]
    fn test_digest_constraint() {
        let mut pkg = installed(PackageKind::Provider, "acme-p", "xpkg.io/acme/p:v1.0.0");
        pkg.identifier = Some("sha256:abc123".to_string());
        let packages = vec![pkg];
        let resolver = DependencyResolver::from_installed(&packages);

        let ok = resolver.resolve_one(&dep(PackageKind::Provider, "xpkg.io/acme/p", "sha256:abc123"));
        assert!(matches!(ok, DependencyOutcome::Installed { .. }));

        let bad = resolver.resolve_one(&dep(PackageKind::Provider, "xpkg.io/acme/p", "sha256:ffff"));
        assert!(matches!(bad, DependencyOutcome::Invalid { .. }));
    }

    #[test]
    fn test_resolve_all_with_custom_lookup() {
        let resolver = DependencyResolver::new(|kind, key| {
            (kind == PackageKind::Provider && key == "xpkg.io/acme/a")
                .then(|| installed(PackageKind::Provider, "acme-a", "xpkg.io/acme/a:v1.0.0"))
        });

        let results = resolver.resolve(&[
            dep(PackageKind::Provider, "xpkg.io/acme/a", ">=v1.0.0"),
            dep(PackageKind::Provider, "xpkg.io/acme/b", ">=v1.0.0"),
        ]);
        assert_eq!(results.len(), 2);
        assert!(matches!(results[0].outcome, DependencyOutcome::Installed { .. }));
        assert_eq!(results[1].outcome, DependencyOutcome::Missing);
    }

    #[test]
    fn test_select_install_source() {
        let tags: Vec<String> = ["v0.9.0", "v1.0.0", "v1.5.0", "v2.0.0"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let d = dep(PackageKind::Provider, "xpkg.io/acme/p", ">=v1.0.0, <v2.0.0");
        let source = select_install_source(&d, &tags).unwrap();
        assert_eq!(source.to_string(), "xpkg.io/acme/p:v1.5.0");

        let d = dep(PackageKind::Provider, "xpkg.io/acme/p", ">=v3.0.0");
        assert!(select_install_source(&d, &tags).is_none());

        let d = dep(PackageKind::Provider, "xpkg.io/acme/p", "sha256:abc");
        let source = select_install_source(&d, &[]).unwrap();
        assert_eq!(source.to_string(), "xpkg.io/acme/p@sha256:abc");
    }
}

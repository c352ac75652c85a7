//! xpkg Kube - the package control plane
//!
//! This crate provides:
//! - **API types**: Provider, Configuration and their revisions, conditions, and the
//!   capability traits reconcilers are written against
//! - **Package reconciler**: revision numbering, activation policy, retention and
//!   status aggregation
//! - **Revision reconciler**: content fetch and validation, object establishment,
//!   controller workloads, TLS secret naming and dependency tracking
//! - **Object stores**: the Kubernetes API, or an in-memory store with the same
//!   optimistic concurrency semantics for tests
//! - **Controllers**: `kube::runtime` control loops with per-run deadlines and
//!   classified backoff

pub mod apis;
pub mod config;
pub mod controller;
pub mod credentials;
pub mod dependency;
pub mod error;
pub mod objects;
pub mod package;
pub mod revision;
pub mod runtime;
pub mod store;
pub mod tls;
pub mod workload;

pub use apis::{
    ActivationPolicy, Condition, ConditionStatus, Conditioned, Configuration,
    ConfigurationRevision, DependencyStatus, Object, Package, PackageResource, PackageRevision,
    PackageRevisionList, Provider, ProviderRevision, RevisionDesiredState, RevisionPhase,
    RevisionResource,
};
pub use config::ReconcilerConfig;
pub use controller::ControllerManager;
pub use credentials::{Anonymous, CredentialsSource, SecretCredentials};
pub use dependency::{DependencyManager, DependencyReport};
pub use error::{ErrorClass, KubeError, Result};
pub use objects::{Establisher, InMemoryEstablisher, KubeEstablisher, RevisionOwner};
pub use package::{PackageReconciler, RevisionPlan, plan_revisions};
pub use revision::RevisionReconciler;
pub use runtime::{KeyGuard, KeyedSerializer, ReconcileOutcome, Reconciler, run_once};
pub use store::{KubeStore, MockStore, ObjectStore, OperationCounts, Selector};
pub use tls::{PackageScopedNames, TlsRequirements, TlsSecretNamer};
pub use workload::{InMemoryWorkloads, KubeWorkloads, WorkloadManager, WorkloadRequest};

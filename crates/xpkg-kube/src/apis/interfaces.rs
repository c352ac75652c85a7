//! Capability traits over package and revision kinds
//!
//! Reconcilers are written against [`Package`] and [`PackageRevision`] only.
//! [`PackageResource`] and [`RevisionResource`] bind a concrete kind to the
//! store and to its revision kind.

use k8s_openapi::api::rbac::v1::PolicyRule;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Resource;
use kube::core::ClusterResourceScope;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt;
use xpkg_core::PackageKind;

use super::condition::{Condition, find_condition, set_condition};
use super::types::*;

/// Access to object metadata
pub trait Object: Send + Sync + fmt::Debug {
    fn object_meta(&self) -> &ObjectMeta;
    fn object_meta_mut(&mut self) -> &mut ObjectMeta;

    /// Name of the object, empty when unset
    fn object_name(&self) -> &str {
        self.object_meta().name.as_deref().unwrap_or_default()
    }

    fn label(&self, key: &str) -> Option<&str> {
        self.object_meta()
            .labels
            .as_ref()
            .and_then(|l| l.get(key))
            .map(String::as_str)
    }

    fn annotation(&self, key: &str) -> Option<&str> {
        self.object_meta()
            .annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .map(String::as_str)
    }

    fn is_deleting(&self) -> bool {
        self.object_meta().deletion_timestamp.is_some()
    }
}

/// An object carrying status conditions
pub trait Conditioned {
    fn conditions(&self) -> &[Condition];

    /// Set a condition; returns whether it changed
    fn set_condition(&mut self, condition: Condition) -> bool;

    /// Condition of a type, `Unknown` when never reported
    fn condition(&self, type_: &str) -> Condition {
        find_condition(self.conditions(), type_)
            .cloned()
            .unwrap_or_else(|| Condition::unknown(type_))
    }
}

/// Per-revision TLS secret names.
///
/// Certificates are currently scoped to a revision; these names are carried
/// from revision to revision so the secrets survive a rollover.
pub trait TlsSecretNames {
    fn webhook_tls_secret_name(&self) -> Option<&str>;
    fn set_webhook_tls_secret_name(&mut self, name: Option<String>);
    fn ess_tls_secret_name(&self) -> Option<&str>;
    fn set_ess_tls_secret_name(&mut self, name: Option<String>);
    fn tls_server_secret_name(&self) -> Option<&str>;
    fn set_tls_server_secret_name(&mut self, name: Option<String>);
    fn tls_client_secret_name(&self) -> Option<&str>;
    fn set_tls_client_secret_name(&mut self, name: Option<String>);
}

/// A package of any kind
pub trait Package: Object + Conditioned {
    fn package_kind(&self) -> PackageKind;

    fn source(&self) -> &str;
    fn set_source(&mut self, source: String);

    fn activation_policy(&self) -> Option<ActivationPolicy>;
    fn set_activation_policy(&mut self, policy: Option<ActivationPolicy>);

    fn package_pull_secrets(&self) -> &[LocalObjectReference];
    fn set_package_pull_secrets(&mut self, secrets: Vec<LocalObjectReference>);

    fn package_pull_policy(&self) -> Option<PullPolicy>;
    fn set_package_pull_policy(&mut self, policy: Option<PullPolicy>);

    fn revision_history_limit(&self) -> Option<i64>;
    fn set_revision_history_limit(&mut self, limit: Option<i64>);

    fn ignore_crossplane_constraints(&self) -> Option<bool>;
    fn set_ignore_crossplane_constraints(&mut self, ignore: Option<bool>);

    fn controller_config_ref(&self) -> Option<&ControllerConfigReference>;
    fn set_controller_config_ref(&mut self, reference: Option<ControllerConfigReference>);

    fn current_revision(&self) -> Option<&str>;
    fn set_current_revision(&mut self, name: Option<String>);

    fn current_identifier(&self) -> Option<&str>;
    fn set_current_identifier(&mut self, identifier: Option<String>);

    /// Highest revision number this package has handed out
    fn last_revision(&self) -> Option<i64>;
    fn set_last_revision(&mut self, revision: Option<i64>);

    fn skip_dependency_resolution(&self) -> Option<bool>;
    fn set_skip_dependency_resolution(&mut self, skip: Option<bool>);

    fn common_labels(&self) -> &BTreeMap<String, String>;
    fn set_common_labels(&mut self, labels: BTreeMap<String, String>);

    /// Activation policy with its default applied
    fn effective_activation_policy(&self) -> ActivationPolicy {
        self.activation_policy().unwrap_or_default()
    }
}

/// A package revision of any kind
pub trait PackageRevision: Object + Conditioned + TlsSecretNames {
    fn package_kind(&self) -> PackageKind;

    fn object_refs(&self) -> &[TypedReference];
    fn set_object_refs(&mut self, refs: Vec<TypedReference>);

    fn controller_reference(&self) -> Option<&ControllerReference>;
    fn set_controller_reference(&mut self, reference: Option<ControllerReference>);

    fn source(&self) -> &str;
    fn set_source(&mut self, source: String);

    fn package_pull_secrets(&self) -> &[LocalObjectReference];
    fn set_package_pull_secrets(&mut self, secrets: Vec<LocalObjectReference>);

    fn package_pull_policy(&self) -> Option<PullPolicy>;
    fn set_package_pull_policy(&mut self, policy: Option<PullPolicy>);

    fn desired_state(&self) -> RevisionDesiredState;
    fn set_desired_state(&mut self, state: RevisionDesiredState);

    fn ignore_crossplane_constraints(&self) -> Option<bool>;
    fn set_ignore_crossplane_constraints(&mut self, ignore: Option<bool>);

    fn controller_config_ref(&self) -> Option<&ControllerConfigReference>;
    fn set_controller_config_ref(&mut self, reference: Option<ControllerConfigReference>);

    fn revision(&self) -> i64;
    fn set_revision(&mut self, revision: i64);

    fn skip_dependency_resolution(&self) -> Option<bool>;
    fn set_skip_dependency_resolution(&mut self, skip: Option<bool>);

    fn dependency_status(&self) -> DependencyStatus;
    fn set_dependency_status(&mut self, status: DependencyStatus);

    fn common_labels(&self) -> &BTreeMap<String, String>;
    fn set_common_labels(&mut self, labels: BTreeMap<String, String>);

    fn permission_requests(&self) -> &[PolicyRule];
    fn set_permission_requests(&mut self, rules: Vec<PolicyRule>);

    fn phase(&self) -> Option<RevisionPhase>;
    fn set_phase(&mut self, phase: Option<RevisionPhase>);

    /// Package this revision belongs to
    fn parent_package(&self) -> Option<&str> {
        self.label(LABEL_PACKAGE)
    }

    /// Identifier this revision was created for
    fn identifier(&self) -> Option<&str> {
        self.annotation(ANNOTATION_IDENTIFIER)
    }

    fn is_active(&self) -> bool {
        self.desired_state() == RevisionDesiredState::Active
    }
}

/// A homogeneous view of every revision owned by one package
pub trait PackageRevisionList {
    /// Owned copies of every revision, as the common interface
    fn get_revisions(&self) -> Vec<Box<dyn PackageRevision>>;
}

/// A package kind stored in the cluster
pub trait PackageResource:
    Package
    + Resource<DynamicType = (), Scope = ClusterResourceScope>
    + Clone
    + Serialize
    + DeserializeOwned
    + 'static
{
    type Revision: RevisionResource;
    type RevisionList: PackageRevisionList + From<Vec<Self::Revision>>;

    /// A new package installing `source`
    fn new_package(name: &str, source: &str) -> Self;
}

/// A revision kind stored in the cluster
pub trait RevisionResource:
    PackageRevision
    + Resource<DynamicType = (), Scope = ClusterResourceScope>
    + Clone
    + Serialize
    + DeserializeOwned
    + 'static
{
    /// An empty revision named `name`
    fn new_revision(name: &str) -> Self;
}

/// Controller config slot of a package spec; configurations have none
trait ControllerConfigSlot {
    fn controller_config(&self) -> Option<&ControllerConfigReference>;
    fn set_controller_config(&mut self, reference: Option<ControllerConfigReference>);
}

impl ControllerConfigSlot for ProviderSpec {
    fn controller_config(&self) -> Option<&ControllerConfigReference> {
        self.controller_config_ref.as_ref()
    }

    fn set_controller_config(&mut self, reference: Option<ControllerConfigReference>) {
        self.controller_config_ref = reference;
    }
}

impl ControllerConfigSlot for ConfigurationSpec {
    fn controller_config(&self) -> Option<&ControllerConfigReference> {
        None
    }

    fn set_controller_config(&mut self, _reference: Option<ControllerConfigReference>) {}
}

macro_rules! impl_object {
    ($($ty:ty),*) => {$(
        impl Object for $ty {
            fn object_meta(&self) -> &ObjectMeta {
                &self.metadata
            }

            fn object_meta_mut(&mut self) -> &mut ObjectMeta {
                &mut self.metadata
            }
        }
    )*};
}

impl_object!(Provider, Configuration, ProviderRevision, ConfigurationRevision);

macro_rules! impl_package {
    ($ty:ty, $kind:expr, $revision:ty, $list:ty) => {
        impl Conditioned for $ty {
            fn conditions(&self) -> &[Condition] {
                self.status
                    .as_ref()
                    .map(|s| s.conditions.as_slice())
                    .unwrap_or(&[])
            }

            fn set_condition(&mut self, condition: Condition) -> bool {
                let status = self.status.get_or_insert_with(Default::default);
                set_condition(&mut status.conditions, condition)
            }
        }

        impl Package for $ty {
            fn package_kind(&self) -> PackageKind {
                $kind
            }

            fn source(&self) -> &str {
                &self.spec.base.package
            }

            fn set_source(&mut self, source: String) {
                self.spec.base.package = source;
            }

            fn activation_policy(&self) -> Option<ActivationPolicy> {
                self.spec.base.revision_activation_policy
            }

            fn set_activation_policy(&mut self, policy: Option<ActivationPolicy>) {
                self.spec.base.revision_activation_policy = policy;
            }

            fn package_pull_secrets(&self) -> &[LocalObjectReference] {
                &self.spec.base.package_pull_secrets
            }

            fn set_package_pull_secrets(&mut self, secrets: Vec<LocalObjectReference>) {
                self.spec.base.package_pull_secrets = secrets;
            }

            fn package_pull_policy(&self) -> Option<PullPolicy> {
                self.spec.base.package_pull_policy
            }

            fn set_package_pull_policy(&mut self, policy: Option<PullPolicy>) {
                self.spec.base.package_pull_policy = policy;
            }

            fn revision_history_limit(&self) -> Option<i64> {
                self.spec.base.revision_history_limit
            }

            fn set_revision_history_limit(&mut self, limit: Option<i64>) {
                self.spec.base.revision_history_limit = limit;
            }

            fn ignore_crossplane_constraints(&self) -> Option<bool> {
                self.spec.base.ignore_crossplane_constraints
            }

            fn set_ignore_crossplane_constraints(&mut self, ignore: Option<bool>) {
                self.spec.base.ignore_crossplane_constraints = ignore;
            }

            fn controller_config_ref(&self) -> Option<&ControllerConfigReference> {
                self.spec.controller_config()
            }

            fn set_controller_config_ref(&mut self, reference: Option<ControllerConfigReference>) {
                self.spec.set_controller_config(reference);
            }

            fn current_revision(&self) -> Option<&str> {
                self.status.as_ref().and_then(|s| s.current_revision.as_deref())
            }

            fn set_current_revision(&mut self, name: Option<String>) {
                self.status.get_or_insert_with(Default::default).current_revision = name;
            }

            fn current_identifier(&self) -> Option<&str> {
                self.status.as_ref().and_then(|s| s.current_identifier.as_deref())
            }

            fn set_current_identifier(&mut self, identifier: Option<String>) {
                self.status.get_or_insert_with(Default::default).current_identifier = identifier;
            }

            fn last_revision(&self) -> Option<i64> {
                self.status.as_ref().and_then(|s| s.last_revision)
            }

            fn set_last_revision(&mut self, revision: Option<i64>) {
                self.status.get_or_insert_with(Default::default).last_revision = revision;
            }

            fn skip_dependency_resolution(&self) -> Option<bool> {
                self.spec.base.skip_dependency_resolution
            }

            fn set_skip_dependency_resolution(&mut self, skip: Option<bool>) {
                self.spec.base.skip_dependency_resolution = skip;
            }

            fn common_labels(&self) -> &BTreeMap<String, String> {
                &self.spec.base.common_labels
            }

            fn set_common_labels(&mut self, labels: BTreeMap<String, String>) {
                self.spec.base.common_labels = labels;
            }
        }

        impl PackageResource for $ty {
            type Revision = $revision;
            type RevisionList = $list;

            fn new_package(name: &str, source: &str) -> Self {
                let mut package = <$ty>::default();
                package.metadata.name = Some(name.to_string());
                package.spec.base.package = source.to_string();
                package
            }
        }
    };
}

impl_package!(
    Provider,
    PackageKind::Provider,
    ProviderRevision,
    ProviderRevisionList
);
impl_package!(
    Configuration,
    PackageKind::Configuration,
    ConfigurationRevision,
    ConfigurationRevisionList
);

macro_rules! impl_revision {
    ($ty:ty, $kind:expr, $list:ty) => {
        impl Conditioned for $ty {
            fn conditions(&self) -> &[Condition] {
                self.status
                    .as_ref()
                    .map(|s| s.conditions.as_slice())
                    .unwrap_or(&[])
            }

            fn set_condition(&mut self, condition: Condition) -> bool {
                let status = self.status.get_or_insert_with(Default::default);
                set_condition(&mut status.conditions, condition)
            }
        }

        impl TlsSecretNames for $ty {
            fn webhook_tls_secret_name(&self) -> Option<&str> {
                self.spec.base.webhook_tls_secret_name.as_deref()
            }

            fn set_webhook_tls_secret_name(&mut self, name: Option<String>) {
                self.spec.base.webhook_tls_secret_name = name;
            }

            fn ess_tls_secret_name(&self) -> Option<&str> {
                self.spec.base.ess_tls_secret_name.as_deref()
            }

            fn set_ess_tls_secret_name(&mut self, name: Option<String>) {
                self.spec.base.ess_tls_secret_name = name;
            }

            fn tls_server_secret_name(&self) -> Option<&str> {
                self.spec.base.tls_server_secret_name.as_deref()
            }

            fn set_tls_server_secret_name(&mut self, name: Option<String>) {
                self.spec.base.tls_server_secret_name = name;
            }

            fn tls_client_secret_name(&self) -> Option<&str> {
                self.spec.base.tls_client_secret_name.as_deref()
            }

            fn set_tls_client_secret_name(&mut self, name: Option<String>) {
                self.spec.base.tls_client_secret_name = name;
            }
        }

        impl PackageRevision for $ty {
            fn package_kind(&self) -> PackageKind {
                $kind
            }

            fn object_refs(&self) -> &[TypedReference] {
                self.status
                    .as_ref()
                    .map(|s| s.object_refs.as_slice())
                    .unwrap_or(&[])
            }

            fn set_object_refs(&mut self, refs: Vec<TypedReference>) {
                self.status.get_or_insert_with(Default::default).object_refs = refs;
            }

            fn controller_reference(&self) -> Option<&ControllerReference> {
                self.status.as_ref().and_then(|s| s.controller_ref.as_ref())
            }

            fn set_controller_reference(&mut self, reference: Option<ControllerReference>) {
                self.status.get_or_insert_with(Default::default).controller_ref = reference;
            }

            fn source(&self) -> &str {
                &self.spec.base.image
            }

            fn set_source(&mut self, source: String) {
                self.spec.base.image = source;
            }

            fn package_pull_secrets(&self) -> &[LocalObjectReference] {
                &self.spec.base.package_pull_secrets
            }

            fn set_package_pull_secrets(&mut self, secrets: Vec<LocalObjectReference>) {
                self.spec.base.package_pull_secrets = secrets;
            }

            fn package_pull_policy(&self) -> Option<PullPolicy> {
                self.spec.base.package_pull_policy
            }

            fn set_package_pull_policy(&mut self, policy: Option<PullPolicy>) {
                self.spec.base.package_pull_policy = policy;
            }

            fn desired_state(&self) -> RevisionDesiredState {
                self.spec.base.desired_state
            }

            fn set_desired_state(&mut self, state: RevisionDesiredState) {
                self.spec.base.desired_state = state;
            }

            fn ignore_crossplane_constraints(&self) -> Option<bool> {
                self.spec.base.ignore_crossplane_constraints
            }

            fn set_ignore_crossplane_constraints(&mut self, ignore: Option<bool>) {
                self.spec.base.ignore_crossplane_constraints = ignore;
            }

            fn controller_config_ref(&self) -> Option<&ControllerConfigReference> {
                self.spec.base.controller_config_ref.as_ref()
            }

            fn set_controller_config_ref(&mut self, reference: Option<ControllerConfigReference>) {
                self.spec.base.controller_config_ref = reference;
            }

            fn revision(&self) -> i64 {
                self.spec.base.revision
            }

            fn set_revision(&mut self, revision: i64) {
                self.spec.base.revision = revision;
            }

            fn skip_dependency_resolution(&self) -> Option<bool> {
                self.spec.base.skip_dependency_resolution
            }

            fn set_skip_dependency_resolution(&mut self, skip: Option<bool>) {
                self.spec.base.skip_dependency_resolution = skip;
            }

            fn dependency_status(&self) -> DependencyStatus {
                self.status
                    .as_ref()
                    .map(|s| {
                        DependencyStatus::new(
                            s.found_dependencies,
                            s.installed_dependencies,
                            s.invalid_dependencies,
                        )
                    })
                    .unwrap_or_default()
            }

            fn set_dependency_status(&mut self, deps: DependencyStatus) {
                let deps = DependencyStatus::new(deps.found, deps.installed, deps.invalid);
                let status = self.status.get_or_insert_with(Default::default);
                status.found_dependencies = deps.found;
                status.installed_dependencies = deps.installed;
                status.invalid_dependencies = deps.invalid;
            }

            fn common_labels(&self) -> &BTreeMap<String, String> {
                &self.spec.base.common_labels
            }

            fn set_common_labels(&mut self, labels: BTreeMap<String, String>) {
                self.spec.base.common_labels = labels;
            }

            fn permission_requests(&self) -> &[PolicyRule] {
                self.status
                    .as_ref()
                    .map(|s| s.permission_requests.as_slice())
                    .unwrap_or(&[])
            }

            fn set_permission_requests(&mut self, rules: Vec<PolicyRule>) {
                self.status.get_or_insert_with(Default::default).permission_requests = rules;
            }

            fn phase(&self) -> Option<RevisionPhase> {
                self.status.as_ref().and_then(|s| s.phase)
            }

            fn set_phase(&mut self, phase: Option<RevisionPhase>) {
                self.status.get_or_insert_with(Default::default).phase = phase;
            }
        }

        impl RevisionResource for $ty {
            fn new_revision(name: &str) -> Self {
                let mut revision = <$ty>::default();
                revision.metadata.name = Some(name.to_string());
                revision
            }
        }

        impl PackageRevisionList for $list {
            fn get_revisions(&self) -> Vec<Box<dyn PackageRevision>> {
                self.items
                    .iter()
                    .map(|r| Box::new(r.clone()) as Box<dyn PackageRevision>)
                    .collect()
            }
        }
    };
}

impl_revision!(
    ProviderRevision,
    PackageKind::Provider,
    ProviderRevisionList
);
impl_revision!(
    ConfigurationRevision,
    PackageKind::Configuration,
    ConfigurationRevisionList
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apis::condition::{ConditionStatus, TYPE_HEALTHY};

    #[test]
    fn test_configuration_has_no_controller_config() {
        let mut cfg = Configuration::new_package("platform", "xpkg.io/acme/platform:v1");
        cfg.set_controller_config_ref(Some(ControllerConfigReference {
            name: "debug".to_string(),
        }));
        assert!(Package::controller_config_ref(&cfg).is_none());

        let mut provider = Provider::new_package("aws", "xpkg.io/acme/aws:v1");
        provider.set_controller_config_ref(Some(ControllerConfigReference {
            name: "debug".to_string(),
        }));
        assert_eq!(
            Package::controller_config_ref(&provider).map(|r| r.name.as_str()),
            Some("debug")
        );
    }

    #[test]
    fn test_package_accessors_through_trait_object() {
        let mut provider = Provider::new_package("aws", "xpkg.io/acme/aws:v1");
        let package: &mut dyn Package = &mut provider;

        assert_eq!(package.object_name(), "aws");
        assert_eq!(package.source(), "xpkg.io/acme/aws:v1");
        assert_eq!(package.effective_activation_policy(), ActivationPolicy::Automatic);
        assert!(package.current_revision().is_none());

        package.set_current_revision(Some("aws-abc".to_string()));
        package.set_revision_history_limit(Some(1));
        package.set_last_revision(Some(3));
        assert_eq!(package.current_revision(), Some("aws-abc"));
        assert_eq!(package.last_revision(), Some(3));
        assert_eq!(package.revision_history_limit(), Some(1));
        assert_eq!(package.condition(TYPE_HEALTHY).status, ConditionStatus::Unknown);
    }

    #[test]
    fn test_get_revisions_returns_copies() {
        let mut rev = ProviderRevision::new_revision("aws-1");
        rev.set_revision(1);
        let list = ProviderRevisionList::from(vec![rev]);

        let mut views = list.get_revisions();
        views[0].set_desired_state(RevisionDesiredState::Active);
        views[0].set_revision(99);

        assert_eq!(list.items[0].spec.base.desired_state, RevisionDesiredState::Inactive);
        assert_eq!(list.items[0].spec.base.revision, 1);
    }

    #[test]
    fn test_dependency_status_is_clamped_on_set() {
        let mut rev = ConfigurationRevision::new_revision("platform-1");
        rev.set_dependency_status(DependencyStatus {
            found: 1,
            installed: 3,
            invalid: 2,
        });
        let status = rev.status.as_ref().unwrap();
        assert_eq!(status.found_dependencies, 1);
        assert_eq!(status.installed_dependencies, 1);
        assert_eq!(status.invalid_dependencies, 1);
    }

    #[test]
    fn test_revision_labels_and_annotations() {
        let mut rev = ProviderRevision::new_revision("aws-1");
        rev.metadata.labels = Some(BTreeMap::from([(
            LABEL_PACKAGE.to_string(),
            "aws".to_string(),
        )]));
        rev.metadata.annotations = Some(BTreeMap::from([(
            ANNOTATION_IDENTIFIER.to_string(),
            "sha256:abc".to_string(),
        )]));
        assert_eq!(rev.parent_package(), Some("aws"));
        assert_eq!(rev.identifier(), Some("sha256:abc"));
        assert!(!rev.is_active());
    }
}

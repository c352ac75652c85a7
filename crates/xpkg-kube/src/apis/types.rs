//! Package and revision API types
//!
//! All four kinds are cluster scoped and live in `pkg.xpkg.io/v1`.

use k8s_openapi::api::rbac::v1::PolicyRule;
use kube::CustomResource;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::condition::Condition;

/// API group of packages and revisions
pub const GROUP: &str = "pkg.xpkg.io";

/// Label naming the package that owns a revision
pub const LABEL_PACKAGE: &str = "pkg.xpkg.io/package";

pub use xpkg_core::LABEL_PROVIDER_FAMILY;

/// Annotation carrying the identifier a revision was created for
pub const ANNOTATION_IDENTIFIER: &str = "pkg.xpkg.io/identifier";

/// Finalizer held by revisions until their objects are released
pub const REVISION_FINALIZER: &str = "pkg.xpkg.io/revision-cleanup";

/// How revisions of a package are activated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ActivationPolicy {
    /// The revision matching the package source is activated
    #[default]
    Automatic,
    /// Revisions are activated by hand
    Manual,
}

impl fmt::Display for ActivationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Automatic => write!(f, "Automatic"),
            Self::Manual => write!(f, "Manual"),
        }
    }
}

/// Image pull policy for package images
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PullPolicy {
    Always,
    IfNotPresent,
    Never,
}

impl fmt::Display for PullPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Always => write!(f, "Always"),
            Self::IfNotPresent => write!(f, "IfNotPresent"),
            Self::Never => write!(f, "Never"),
        }
    }
}

/// Desired state of a revision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RevisionDesiredState {
    Active,
    #[default]
    Inactive,
}

impl fmt::Display for RevisionDesiredState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "Active"),
            Self::Inactive => write!(f, "Inactive"),
        }
    }
}

/// Observable lifecycle phase of a revision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RevisionPhase {
    /// Contents not yet fetched and validated
    Pending,
    /// Objects, controller or dependencies still converging
    Installing,
    /// Active, established, controller ready, dependencies installed
    ActiveHealthy,
    /// Inactive; objects kept, controller scaled down
    InactiveParked,
    /// Releasing owned objects before removal
    Deleting,
    /// Contents invalid or objects conflicting
    Failed,
}

impl fmt::Display for RevisionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "Pending",
            Self::Installing => "Installing",
            Self::ActiveHealthy => "ActiveHealthy",
            Self::InactiveParked => "InactiveParked",
            Self::Deleting => "Deleting",
            Self::Failed => "Failed",
        };
        write!(f, "{}", s)
    }
}

/// Reference to an object in the same scope
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalObjectReference {
    pub name: String,
}

/// Reference to a controller configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfigReference {
    pub name: String,
}

/// Reference to the controller workload of a revision
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerReference {
    pub name: String,
}

/// Typed reference to an object owned by a revision
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypedReference {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

impl TypedReference {
    /// `kind/name` key
    pub fn key(&self) -> String {
        format!("{}/{}", self.kind, self.name)
    }
}

/// Names of the pull secrets
pub fn ref_names(refs: &[LocalObjectReference]) -> Vec<String> {
    refs.iter().map(|r| r.name.clone()).collect()
}

/// Dependency resolution summary of a revision
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DependencyStatus {
    pub found: i64,
    pub installed: i64,
    pub invalid: i64,
}

impl DependencyStatus {
    /// Build a status, clamping counters into `0 <= installed, invalid <= found`
    pub fn new(found: i64, installed: i64, invalid: i64) -> Self {
        let found = found.max(0);
        Self {
            found,
            installed: installed.clamp(0, found),
            invalid: invalid.clamp(0, found),
        }
    }

    /// Every declared dependency is installed
    pub fn all_installed(&self) -> bool {
        self.installed == self.found && self.invalid == 0
    }
}

/// Fields shared by every package kind
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageSpec {
    /// Package image reference
    pub package: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision_activation_policy: Option<ActivationPolicy>,

    /// Number of inactive revisions to keep; unlimited when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision_history_limit: Option<i64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub package_pull_secrets: Vec<LocalObjectReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_pull_policy: Option<PullPolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_crossplane_constraints: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_dependency_resolution: Option<bool>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub common_labels: BTreeMap<String, String>,
}

/// Observed state of a package
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_revision: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_identifier: Option<String>,

    /// Highest revision number ever assigned, kept across garbage collection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_revision: Option<i64>,
}

/// A provider package
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[kube(
    group = "pkg.xpkg.io",
    version = "v1",
    kind = "Provider",
    status = "PackageStatus",
    derive = "Default",
    schema = "disabled",
    printcolumn = r#"{"name":"PACKAGE","type":"string","jsonPath":".spec.package"}"#,
    printcolumn = r#"{"name":"HEALTHY","type":"string","jsonPath":".status.conditions[?(@.type=='Healthy')].status"}"#,
    printcolumn = r#"{"name":"AGE","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSpec {
    #[serde(flatten)]
    pub base: PackageSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller_config_ref: Option<ControllerConfigReference>,
}

/// A configuration package
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[kube(
    group = "pkg.xpkg.io",
    version = "v1",
    kind = "Configuration",
    status = "PackageStatus",
    derive = "Default",
    schema = "disabled",
    printcolumn = r#"{"name":"PACKAGE","type":"string","jsonPath":".spec.package"}"#,
    printcolumn = r#"{"name":"HEALTHY","type":"string","jsonPath":".status.conditions[?(@.type=='Healthy')].status"}"#,
    printcolumn = r#"{"name":"AGE","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationSpec {
    #[serde(flatten)]
    pub base: PackageSpec,
}

/// Fields shared by every revision kind
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageRevisionSpec {
    /// Package image; immutable after creation
    pub image: String,

    /// Sequence number within the package; immutable after creation
    pub revision: i64,

    pub desired_state: RevisionDesiredState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_pull_policy: Option<PullPolicy>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub package_pull_secrets: Vec<LocalObjectReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_dependency_resolution: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_crossplane_constraints: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller_config_ref: Option<ControllerConfigReference>,

    #[serde(
        rename = "webhookTLSSecretName",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub webhook_tls_secret_name: Option<String>,

    #[serde(
        rename = "essTLSSecretName",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub ess_tls_secret_name: Option<String>,

    #[serde(
        rename = "tlsServerSecretName",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub tls_server_secret_name: Option<String>,

    #[serde(
        rename = "tlsClientSecretName",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub tls_client_secret_name: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub common_labels: BTreeMap<String, String>,
}

/// Observed state of a revision
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageRevisionStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<RevisionPhase>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller_ref: Option<ControllerReference>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub object_refs: Vec<TypedReference>,

    #[serde(default)]
    pub found_dependencies: i64,

    #[serde(default)]
    pub installed_dependencies: i64,

    #[serde(default)]
    pub invalid_dependencies: i64,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permission_requests: Vec<PolicyRule>,
}

/// A provider revision
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[kube(
    group = "pkg.xpkg.io",
    version = "v1",
    kind = "ProviderRevision",
    status = "PackageRevisionStatus",
    derive = "Default",
    schema = "disabled",
    printcolumn = r#"{"name":"REVISION","type":"integer","jsonPath":".spec.revision"}"#,
    printcolumn = r#"{"name":"IMAGE","type":"string","jsonPath":".spec.image"}"#,
    printcolumn = r#"{"name":"STATE","type":"string","jsonPath":".spec.desiredState"}"#,
    printcolumn = r#"{"name":"DEP-FOUND","type":"integer","jsonPath":".status.foundDependencies"}"#,
    printcolumn = r#"{"name":"DEP-INSTALLED","type":"integer","jsonPath":".status.installedDependencies"}"#,
    printcolumn = r#"{"name":"HEALTHY","type":"string","jsonPath":".status.conditions[?(@.type=='Healthy')].status"}"#,
    printcolumn = r#"{"name":"AGE","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
pub struct ProviderRevisionSpec {
    #[serde(flatten)]
    pub base: PackageRevisionSpec,
}

/// A configuration revision
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[kube(
    group = "pkg.xpkg.io",
    version = "v1",
    kind = "ConfigurationRevision",
    status = "PackageRevisionStatus",
    derive = "Default",
    schema = "disabled",
    printcolumn = r#"{"name":"REVISION","type":"integer","jsonPath":".spec.revision"}"#,
    printcolumn = r#"{"name":"IMAGE","type":"string","jsonPath":".spec.image"}"#,
    printcolumn = r#"{"name":"STATE","type":"string","jsonPath":".spec.desiredState"}"#,
    printcolumn = r#"{"name":"DEP-FOUND","type":"integer","jsonPath":".status.foundDependencies"}"#,
    printcolumn = r#"{"name":"DEP-INSTALLED","type":"integer","jsonPath":".status.installedDependencies"}"#,
    printcolumn = r#"{"name":"HEALTHY","type":"string","jsonPath":".status.conditions[?(@.type=='Healthy')].status"}"#,
    printcolumn = r#"{"name":"AGE","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
pub struct ConfigurationRevisionSpec {
    #[serde(flatten)]
    pub base: PackageRevisionSpec,
}

/// All revisions of one provider
#[derive(Debug, Clone, Default)]
pub struct ProviderRevisionList {
    pub items: Vec<ProviderRevision>,
}

/// All revisions of one configuration
#[derive(Debug, Clone, Default)]
pub struct ConfigurationRevisionList {
    pub items: Vec<ConfigurationRevision>,
}

impl From<Vec<ProviderRevision>> for ProviderRevisionList {
    fn from(items: Vec<ProviderRevision>) -> Self {
        Self { items }
    }
}

impl From<Vec<ConfigurationRevision>> for ConfigurationRevisionList {
    fn from(items: Vec<ConfigurationRevision>) -> Self {
        Self { items }
    }
}

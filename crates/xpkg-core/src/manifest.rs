//! Package contents: the metadata document plus installable objects

use k8s_openapi::api::rbac::v1::PolicyRule;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, Result};
use crate::source::SourceRef;
use crate::version::Constraint;

/// API version of the package metadata document
pub const META_API_VERSION: &str = "meta.pkg.xpkg.io/v1";

/// Metadata label marking providers whose extension schemas may be shared
pub const LABEL_PROVIDER_FAMILY: &str = "pkg.xpkg.io/provider-family";

/// Object kinds a Provider package may install
const PROVIDER_OBJECT_KINDS: &[&str] = &["CustomResourceDefinition"];

/// Object kinds a Configuration package may install
const CONFIGURATION_OBJECT_KINDS: &[&str] = &["CompositeResourceDefinition", "Composition"];

/// Package type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PackageKind {
    Provider,
    Configuration,
}

impl PackageKind {
    /// Whether packages of this type may install objects of `kind`
    pub fn allows_object(&self, kind: &str) -> bool {
        let allowed = match self {
            PackageKind::Provider => PROVIDER_OBJECT_KINDS,
            PackageKind::Configuration => CONFIGURATION_OBJECT_KINDS,
        };
        allowed.contains(&kind)
    }
}

impl fmt::Display for PackageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackageKind::Provider => write!(f, "Provider"),
            PackageKind::Configuration => write!(f, "Configuration"),
        }
    }
}

impl FromStr for PackageKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "provider" => Ok(Self::Provider),
            "configuration" => Ok(Self::Configuration),
            _ => Err(format!("unknown package kind: {}", s)),
        }
    }
}

/// Controller workload requested by a Provider package
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerSpec {
    /// Controller image; the package image itself when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// RBAC rules the controller asks to be granted
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permission_requests: Vec<PolicyRule>,

    /// Whether the controller serves webhooks
    #[serde(default)]
    pub webhooks: bool,
}

/// Validated package metadata
#[derive(Debug, Clone, PartialEq)]
pub struct PackageMeta {
    pub kind: PackageKind,
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub platform_version: Option<String>,
    pub controller: Option<ControllerSpec>,
}

impl PackageMeta {
    /// Provider family this package belongs to, if any
    pub fn family(&self) -> Option<&str> {
        self.labels.get(LABEL_PROVIDER_FAMILY).map(String::as_str)
    }
}

/// A declared dependency on another package
#[derive(Debug, Clone, PartialEq)]
pub struct Dependency {
    pub kind: PackageKind,
    pub source: SourceRef,
    pub constraint: Constraint,
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.kind, self.source, self.constraint)
    }
}

/// An object a package installs
#[derive(Debug, Clone, PartialEq)]
pub struct PackageObject {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub body: serde_json::Value,
}

impl PackageObject {
    /// `kind/name` key, unique within a package
    pub fn key(&self) -> String {
        format!("{}/{}", self.kind, self.name)
    }
}

/// Parsed and validated package contents
#[derive(Debug, Clone, PartialEq)]
pub struct PackageContents {
    pub meta: PackageMeta,
    pub dependencies: Vec<Dependency>,
    pub objects: Vec<PackageObject>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMeta {
    kind: String,
    #[serde(default)]
    metadata: RawObjectMeta,
    #[serde(default)]
    spec: RawMetaSpec,
}

#[derive(Default, Deserialize)]
struct RawObjectMeta {
    #[serde(default)]
    name: String,
    #[serde(default)]
    labels: BTreeMap<String, String>,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMetaSpec {
    #[serde(default)]
    platform_version: Option<String>,
    #[serde(default)]
    depends_on: Vec<RawDependency>,
    #[serde(default)]
    controller: Option<ControllerSpec>,
}

#[derive(Deserialize)]
struct RawDependency {
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    configuration: Option<String>,
    #[serde(default)]
    version: String,
}

impl PackageContents {
    /// Parse a multi-document YAML stream
    pub fn parse(text: &str) -> Result<Self> {
        let mut meta = None;
        let mut objects = Vec::new();

        for document in serde_yaml::Deserializer::from_str(text) {
            let value = serde_yaml::Value::deserialize(document)?;
            if value.is_null() {
                continue;
            }
            let json = serde_json::to_value(&value)?;

            let api_version = json
                .get("apiVersion")
                .and_then(|v| v.as_str())
                .unwrap_or_default();

            if api_version == META_API_VERSION {
                if meta.is_some() {
                    return Err(CoreError::invalid("more than one package metadata document"));
                }
                meta = Some(parse_meta(json)?);
            } else {
                objects.push(parse_object(json)?);
            }
        }

        let (meta, dependencies) =
            meta.ok_or_else(|| CoreError::invalid("missing package metadata document"))?;

        validate_objects(meta.kind, &objects)?;

        Ok(Self {
            meta,
            dependencies,
            objects,
        })
    }

    /// Fail when the contents describe a different package type
    pub fn ensure_kind(&self, expected: PackageKind) -> Result<()> {
        if self.meta.kind != expected {
            return Err(CoreError::invalid(format!(
                "package metadata is of kind {}, expected {}",
                self.meta.kind, expected
            )));
        }
        Ok(())
    }

    /// Check the running platform version against the package's constraint
    pub fn check_platform(&self, platform: &Version) -> Result<()> {
        let Some(required) = &self.meta.platform_version else {
            return Ok(());
        };
        let constraint = Constraint::parse(required)?;
        if constraint.matches_version(platform) {
            Ok(())
        } else {
            Err(CoreError::IncompatiblePlatform {
                required: required.clone(),
                actual: platform.to_string(),
            })
        }
    }

    /// Permission requests of the controller, empty without a controller
    pub fn permission_requests(&self) -> &[PolicyRule] {
        self.meta
            .controller
            .as_ref()
            .map(|c| c.permission_requests.as_slice())
            .unwrap_or(&[])
    }
}

fn parse_meta(json: serde_json::Value) -> Result<(PackageMeta, Vec<Dependency>)> {
    let raw: RawMeta = serde_json::from_value(json)?;

    let kind: PackageKind = raw.kind.parse().map_err(CoreError::invalid)?;

    if raw.metadata.name.is_empty() {
        return Err(CoreError::invalid("package metadata has no name"));
    }

    if raw.spec.controller.is_some() && kind != PackageKind::Provider {
        return Err(CoreError::invalid(format!(
            "{} packages cannot declare a controller",
            kind
        )));
    }

    if let Some(platform) = &raw.spec.platform_version {
        Constraint::parse(platform)?;
    }

    let dependencies = raw
        .spec
        .depends_on
        .into_iter()
        .map(parse_dependency)
        .collect::<Result<Vec<_>>>()?;

    let meta = PackageMeta {
        kind,
        name: raw.metadata.name,
        labels: raw.metadata.labels,
        platform_version: raw.spec.platform_version,
        controller: raw.spec.controller,
    };

    Ok((meta, dependencies))
}

fn parse_dependency(raw: RawDependency) -> Result<Dependency> {
    let (kind, source) = match (raw.provider, raw.configuration) {
        (Some(p), None) => (PackageKind::Provider, p),
        (None, Some(c)) => (PackageKind::Configuration, c),
        _ => {
            return Err(CoreError::invalid(
                "dependency must name exactly one of provider or configuration",
            ));
        }
    };

    Ok(Dependency {
        kind,
        source: SourceRef::parse(&source)?,
        constraint: Constraint::parse(&raw.version)?,
    })
}

fn parse_object(json: serde_json::Value) -> Result<PackageObject> {
    let field = |name: &str| {
        json.get(name)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    };

    let api_version = field("apiVersion");
    let kind = field("kind");
    let name = json
        .pointer("/metadata/name")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    if api_version.is_empty() || kind.is_empty() {
        return Err(CoreError::invalid("object without apiVersion or kind"));
    }
    if name.is_empty() {
        return Err(CoreError::invalid(format!("{} without metadata.name", kind)));
    }

    Ok(PackageObject {
        api_version,
        kind,
        name,
        body: json,
    })
}

fn validate_objects(kind: PackageKind, objects: &[PackageObject]) -> Result<()> {
    let mut seen = HashSet::new();

    for object in objects {
        if !kind.allows_object(&object.kind) {
            return Err(CoreError::invalid(format!(
                "{} packages cannot install objects of kind {}",
                kind, object.kind
            )));
        }
        if !seen.insert(object.key()) {
            return Err(CoreError::invalid(format!(
                "duplicate object {}",
                object.key()
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROVIDER: &str = r#"
apiVersion: meta.pkg.xpkg.io/v1
kind: Provider
metadata:
  name: provider-aws
  labels:
    pkg.xpkg.io/provider-family: aws
spec:
  platformVersion: ">=v1.14.0"
  controller:
    image: xpkg.io/acme/provider-aws-controller:v1.0.0
    webhooks: true
    permissionRequests:
      - apiGroups: [""]
        resources: ["secrets"]
        verbs: ["get", "list"]
  dependsOn:
    - provider: xpkg.io/acme/provider-family-aws
      version: ">=v1.0.0"
---
apiVersion: apiextensions.k8s.io/v1
kind: CustomResourceDefinition
metadata:
  name: buckets.s3.aws.acme.io
spec:
  group: s3.aws.acme.io
  versions:
    - name: v1beta1
      served: true
      storage: true
"#;

    #[test]
    fn test_parse_provider() {
        let contents = PackageContents::parse(PROVIDER).unwrap();
        assert_eq!(contents.meta.kind, PackageKind::Provider);
        assert_eq!(contents.meta.name, "provider-aws");
        assert_eq!(contents.meta.family(), Some("aws"));

        let controller = contents.meta.controller.as_ref().unwrap();
        assert!(controller.webhooks);
        assert_eq!(contents.permission_requests().len(), 1);

        assert_eq!(contents.dependencies.len(), 1);
        assert_eq!(contents.dependencies[0].kind, PackageKind::Provider);
        assert_eq!(
            contents.dependencies[0].source.repository_key(),
            "xpkg.io/acme/provider-family-aws"
        );

        assert_eq!(contents.objects.len(), 1);
        assert_eq!(contents.objects[0].key(), "CustomResourceDefinition/buckets.s3.aws.acme.io");
    }

    #[test]
    fn test_platform_check() {
        let contents = PackageContents::parse(PROVIDER).unwrap();
        assert!(contents.check_platform(&Version::new(1, 14, 2)).is_ok());

        let err = contents.check_platform(&Version::new(1, 13, 0)).unwrap_err();
        assert!(matches!(err, CoreError::IncompatiblePlatform { .. }));
        assert!(err.is_content_invalid());
    }

    #[test]
    fn test_ensure_kind() {
        let contents = PackageContents::parse(PROVIDER).unwrap();
        assert!(contents.ensure_kind(PackageKind::Provider).is_ok());
        assert!(contents.ensure_kind(PackageKind::Configuration).is_err());
    }

    #[test]
    fn test_configuration_rejects_crds() {
        let text = r#"
apiVersion: meta.pkg.xpkg.io/v1
kind: Configuration
metadata:
  name: platform
---
apiVersion: apiextensions.k8s.io/v1
kind: CustomResourceDefinition
metadata:
  name: things.acme.io
"#;
        let err = PackageContents::parse(text).unwrap_err();
        assert!(err.to_string().contains("cannot install objects"));
    }

    #[test]
    fn test_configuration_rejects_controller() {
        let text = r#"
apiVersion: meta.pkg.xpkg.io/v1
kind: Configuration
metadata:
  name: platform
spec:
  controller:
    image: nope
"#;
        assert!(PackageContents::parse(text).is_err());
    }

    #[test]
    fn test_missing_and_duplicate_meta() {
        let objects_only = r#"
apiVersion: apiextensions.xpkg.io/v1
kind: Composition
metadata:
  name: c
"#;
        let err = PackageContents::parse(objects_only).unwrap_err();
        assert!(err.to_string().contains("missing package metadata"));

        let twice = r#"
apiVersion: meta.pkg.xpkg.io/v1
kind: Configuration
metadata:
  name: a
---
apiVersion: meta.pkg.xpkg.io/v1
kind: Configuration
metadata:
  name: b
"#;
        let err = PackageContents::parse(twice).unwrap_err();
        assert!(err.to_string().contains("more than one"));
    }

    #[test]
    fn test_duplicate_objects_rejected() {
        let text = r#"
apiVersion: meta.pkg.xpkg.io/v1
kind: Configuration
metadata:
  name: platform
---
apiVersion: apiextensions.xpkg.io/v1
kind: Composition
metadata:
  name: db
---
apiVersion: apiextensions.xpkg.io/v1
kind: Composition
metadata:
  name: db
"#;
        let err = PackageContents::parse(text).unwrap_err();
        assert!(err.to_string().contains("duplicate object Composition/db"));
    }

    #[test]
    fn test_bad_dependency() {
        let text = r#"
apiVersion: meta.pkg.xpkg.io/v1
kind: Configuration
metadata:
  name: platform
spec:
  dependsOn:
    - provider: xpkg.io/acme/p
      configuration: xpkg.io/acme/c
      version: ">=v1.0.0"
"#;
        assert!(PackageContents::parse(text).is_err());

        let text = r#"
apiVersion: meta.pkg.xpkg.io/v1
kind: Configuration
metadata:
  name: platform
spec:
  dependsOn:
    - provider: xpkg.io/acme/p
      version: "not a version"
"#;
        let err = PackageContents::parse(text).unwrap_err();
        assert!(err.is_content_invalid());
    }

    #[test]
    fn test_garbage_is_content_invalid() {
        let err = PackageContents::parse("{ this is: [not yaml").unwrap_err();
        assert!(err.is_content_invalid());
    }
}

//! Reconciler configuration

use semver::Version;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{KubeError, Result};

/// Settings shared by the package and revision reconcilers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconcilerConfig {
    /// Version of the running control plane, checked against `platformVersion`
    pub platform_version: Version,

    /// Create packages for dependencies that are not installed
    pub install_missing_dependencies: bool,

    /// Issue external secret store TLS secret names
    pub ess_enabled: bool,

    /// Namespace controller workloads run in
    pub workload_namespace: String,

    /// Steady-state resync interval
    #[serde(with = "humantime_serde")]
    pub resync_interval: Duration,

    /// Requeue while waiting for health or dependencies
    #[serde(with = "humantime_serde")]
    pub short_requeue: Duration,

    /// Requeue after a transient error
    #[serde(with = "humantime_serde")]
    pub error_backoff: Duration,

    /// Requeue after invalid package contents
    #[serde(with = "humantime_serde")]
    pub invalid_backoff: Duration,

    /// Overall deadline of one reconcile run
    #[serde(with = "humantime_serde")]
    pub reconcile_deadline: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            platform_version: Version::new(1, 20, 0),
            install_missing_dependencies: true,
            ess_enabled: false,
            workload_namespace: "xpkg-system".to_string(),
            resync_interval: Duration::from_secs(600),
            short_requeue: Duration::from_secs(30),
            error_backoff: Duration::from_secs(15),
            invalid_backoff: Duration::from_secs(300),
            reconcile_deadline: Duration::from_secs(180),
        }
    }
}

impl ReconcilerConfig {
    /// Load from a YAML file; missing keys keep their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse from YAML; missing keys keep their defaults
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the control loop cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.workload_namespace.is_empty() {
            return Err(KubeError::InvalidConfig(
                "workloadNamespace must not be empty".to_string(),
            ));
        }
        if self.reconcile_deadline.is_zero() {
            return Err(KubeError::InvalidConfig(
                "reconcileDeadline must be positive".to_string(),
            ));
        }
        if self.short_requeue.is_zero() || self.error_backoff.is_zero() {
            return Err(KubeError::InvalidConfig(
                "requeue intervals must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_platform_version(mut self, version: Version) -> Self {
        self.platform_version = version;
        self
    }

    pub fn with_install_missing_dependencies(mut self, enabled: bool) -> Self {
        self.install_missing_dependencies = enabled;
        self
    }

    pub fn with_ess(mut self, enabled: bool) -> Self {
        self.ess_enabled = enabled;
        self
    }

    pub fn with_workload_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.workload_namespace = namespace.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(ReconcilerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_from_yaml_partial() {
        let config = ReconcilerConfig::from_yaml(
            r#"
platformVersion: 1.14.3
installMissingDependencies: false
shortRequeue: 5s
reconcileDeadline: 1m
"#,
        )
        .unwrap();

        assert_eq!(config.platform_version, Version::new(1, 14, 3));
        assert!(!config.install_missing_dependencies);
        assert_eq!(config.short_requeue, Duration::from_secs(5));
        assert_eq!(config.reconcile_deadline, Duration::from_secs(60));
        assert_eq!(config.workload_namespace, "xpkg-system");
    }

    #[test]
    fn test_from_yaml_rejects_invalid() {
        assert!(ReconcilerConfig::from_yaml("workloadNamespace: \"\"").is_err());
        assert!(ReconcilerConfig::from_yaml("reconcileDeadline: 0s").is_err());
        assert!(ReconcilerConfig::from_yaml("platformVersion: banana").is_err());
    }

    #[test]
    fn test_builders() {
        let config = ReconcilerConfig::default()
            .with_ess(true)
            .with_install_missing_dependencies(false)
            .with_workload_namespace("pkgs");
        assert!(config.ess_enabled);
        assert!(!config.install_missing_dependencies);
        assert_eq!(config.workload_namespace, "pkgs");
    }
}

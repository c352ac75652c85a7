//! Controller command - run the package controllers against the current cluster

use clap::Args;
use semver::Version;
use std::path::PathBuf;
use xpkg_kube::{ControllerManager, ReconcilerConfig};
use xpkg_repo::OciRegistry;

use crate::error::{CliError, Result};

#[derive(Debug, Clone, Default, Args)]
pub struct ControllerArgs {
    /// YAML file with reconciler settings; flags override it
    #[arg(long, env = "XPKG_CONFIG")]
    pub config: Option<PathBuf>,

    /// Control plane version checked against package platform constraints
    #[arg(long, env = "XPKG_PLATFORM_VERSION")]
    pub platform_version: Option<String>,

    /// Namespace controller workloads run in
    #[arg(long, env = "XPKG_NAMESPACE")]
    pub namespace: Option<String>,

    /// Create packages for missing dependencies
    #[arg(long, env = "XPKG_INSTALL_MISSING_DEPENDENCIES")]
    pub install_missing_dependencies: Option<bool>,

    /// Issue external secret store TLS secret names
    #[arg(long, env = "XPKG_ENABLE_ESS")]
    pub enable_ess: Option<bool>,

    /// Registry used for sources without a registry host
    #[arg(long, env = "XPKG_DEFAULT_REGISTRY")]
    pub default_registry: Option<String>,
}

/// Settings from the config file (or defaults) with flag overrides applied
pub fn build_config(args: &ControllerArgs) -> Result<ReconcilerConfig> {
    let mut config = match &args.config {
        Some(path) => ReconcilerConfig::from_file(path)?,
        None => ReconcilerConfig::default(),
    };

    if let Some(version) = &args.platform_version {
        let version = Version::parse(version.trim_start_matches('v')).map_err(|e| {
            CliError::config_with_help(
                format!("invalid platform version '{}': {}", version, e),
                "use a semantic version such as 1.20.0",
            )
        })?;
        config = config.with_platform_version(version);
    }
    if let Some(namespace) = &args.namespace {
        config = config.with_workload_namespace(namespace.clone());
    }
    if let Some(install) = args.install_missing_dependencies {
        config = config.with_install_missing_dependencies(install);
    }
    if let Some(ess) = args.enable_ess {
        config = config.with_ess(ess);
    }

    config.validate()?;
    Ok(config)
}

pub async fn run(args: ControllerArgs) -> Result<()> {
    let config = build_config(&args)?;
    let client = kube::Client::try_default().await.map_err(|e| {
        CliError::cluster(format!("cannot create a cluster client: {}", e))
    })?;

    let mut manager = ControllerManager::new(client, config);
    if let Some(registry) = &args.default_registry {
        manager = manager.with_registry(OciRegistry::with_default_registry(registry.clone()));
    }
    manager.run().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_defaults_without_flags() {
        let config = build_config(&ControllerArgs::default()).unwrap();
        assert_eq!(config, ReconcilerConfig::default());
    }

    #[test]
    fn test_flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("xpkg.yaml");
        std::fs::write(
            &path,
            "workloadNamespace: from-file\nresyncInterval: 2m\ninstallMissingDependencies: false\n",
        )
        .unwrap();

        let args = ControllerArgs {
            config: Some(path),
            platform_version: Some("v1.21.3".to_string()),
            install_missing_dependencies: Some(true),
            ..Default::default()
        };
        let config = build_config(&args).unwrap();

        assert_eq!(config.workload_namespace, "from-file");
        assert_eq!(config.resync_interval, Duration::from_secs(120));
        assert_eq!(config.platform_version, Version::new(1, 21, 3));
        assert!(config.install_missing_dependencies);
    }

    #[test]
    fn test_invalid_platform_version() {
        let args = ControllerArgs {
            platform_version: Some("one-twenty".to_string()),
            ..Default::default()
        };
        let err = build_config(&args).unwrap_err();
        assert!(matches!(err, CliError::Config { .. }));
    }

    #[test]
    fn test_empty_namespace_is_rejected() {
        let args = ControllerArgs {
            namespace: Some(String::new()),
            ..Default::default()
        };
        assert!(matches!(
            build_config(&args).unwrap_err(),
            CliError::Config { .. }
        ));
    }
}

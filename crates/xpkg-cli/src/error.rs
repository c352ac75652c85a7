//! CLI error types with exit code handling
//!
//! Every command returns [`CliError`]; `main` renders it through miette and
//! exits with [`CliError::exit_code`].

use miette::Diagnostic;
use thiserror::Error;
use xpkg_core::CoreError;
use xpkg_kube::KubeError;

use crate::exit_codes;

/// CLI-specific error type that includes exit code information
#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    /// Package contents failed to parse or validate
    #[error("Invalid package: {message}")]
    #[diagnostic(code(xpkg::cli::package))]
    InvalidPackage {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Bad flags, environment or config file
    #[error("Configuration error: {message}")]
    #[diagnostic(code(xpkg::cli::config))]
    Config {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Talking to the cluster failed
    #[error("Cluster error: {message}")]
    #[diagnostic(code(xpkg::cli::cluster))]
    Cluster { message: String },

    /// IO error (file not found, permissions, etc.)
    #[error("IO error: {message}")]
    #[diagnostic(code(xpkg::cli::io))]
    Io { message: String },

    /// Internal error (runtime, unexpected failure)
    #[error("Internal error: {message}")]
    #[diagnostic(code(xpkg::cli::internal))]
    Internal { message: String },
}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::InvalidPackage { .. } => exit_codes::INVALID_PACKAGE,
            CliError::Config { .. } => exit_codes::CONFIG_ERROR,
            CliError::Cluster { .. } => exit_codes::CLUSTER_ERROR,
            CliError::Io { .. } => exit_codes::IO_ERROR,
            CliError::Internal { .. } => exit_codes::ERROR,
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            help: None,
        }
    }

    /// Create a configuration error with help text
    pub fn config_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            help: Some(help.into()),
        }
    }

    /// Create a cluster error
    pub fn cluster(message: impl Into<String>) -> Self {
        Self::Cluster {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::Io {
            message: err.to_string(),
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        let help = match &err {
            CoreError::IncompatiblePlatform { .. } => {
                Some("pass --platform-version to check against another control plane".to_string())
            }
            CoreError::YamlParse(_) => {
                Some("the stream must hold one meta.pkg.xpkg.io/v1 document".to_string())
            }
            _ => None,
        };
        CliError::InvalidPackage {
            message: err.to_string(),
            help,
        }
    }
}

impl From<KubeError> for CliError {
    fn from(err: KubeError) -> Self {
        match err {
            KubeError::InvalidConfig(message) => CliError::Config {
                message,
                help: None,
            },
            KubeError::Serialization(message) => CliError::Config {
                message,
                help: Some("config keys are camelCase, durations look like 30s or 10m".to_string()),
            },
            KubeError::Io(e) => CliError::Io {
                message: e.to_string(),
            },
            other => CliError::Cluster {
                message: other.to_string(),
            },
        }
    }
}

impl From<kube::Error> for CliError {
    fn from(err: kube::Error) -> Self {
        CliError::Cluster {
            message: err.to_string(),
        }
    }
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

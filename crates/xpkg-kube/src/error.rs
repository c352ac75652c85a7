//! Error types for xpkg-kube

use thiserror::Error;

/// Result type for xpkg-kube operations
pub type Result<T> = std::result::Result<T, KubeError>;

/// How a failure should be handled by the control loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Store conflicts, registry hiccups, timeouts. Retried with backoff.
    Transient,
    /// Malformed or incompatible package contents. Surfaced on the
    /// revision and retried only on a long backoff.
    ContentInvalid,
    /// Dependency constraint conflicts. Surfaced through the dependency
    /// counters; never blocks the revision's own installation.
    DependencyInvalid,
    /// The API server refuses more work for now
    ResourceExhaustion,
}

/// Errors that can occur during reconciliation
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KubeError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// Object not found in the store
    #[error("{kind} '{name}' not found")]
    NotFound { kind: String, name: String },

    /// Object already exists in the store
    #[error("{kind} '{name}' already exists")]
    AlreadyExists { kind: String, name: String },

    /// Optimistic concurrency failure
    #[error("{kind} '{name}' was modified concurrently (expected resourceVersion {expected})")]
    Conflict {
        kind: String,
        name: String,
        expected: String,
    },

    /// An installed object is controlled by an unrelated package
    #[error("{object} is controlled by {owner}, which belongs to another package")]
    ObjectConflict { object: String, owner: String },

    /// Registry error
    #[error("registry error: {0}")]
    Repo(#[from] xpkg_repo::RepoError),

    /// Package contents error
    #[error("package error: {0}")]
    Package(#[from] xpkg_core::CoreError),

    /// Dependency could not be resolved
    #[error("dependency error: {0}")]
    Dependency(String),

    /// Storage error
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Reconcile exceeded its deadline
    #[error("reconcile timed out after {0}")]
    Timeout(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for KubeError {
    fn from(e: serde_json::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for KubeError {
    fn from(e: serde_yaml::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl KubeError {
    pub(crate) fn not_found(kind: &str, name: &str) -> Self {
        KubeError::NotFound {
            kind: kind.to_string(),
            name: name.to_string(),
        }
    }

    /// Check if this is a 404 Not Found error
    pub fn is_not_found(&self) -> bool {
        match self {
            KubeError::NotFound { .. } => true,
            KubeError::Api(kube::Error::Api(resp)) => resp.code == 404,
            _ => false,
        }
    }

    /// Check if this is a conflict error (409)
    pub fn is_conflict(&self) -> bool {
        match self {
            KubeError::Conflict { .. } => true,
            KubeError::Api(kube::Error::Api(resp)) => resp.code == 409,
            _ => false,
        }
    }

    /// Classify this error for the control loop
    pub fn class(&self) -> ErrorClass {
        match self {
            KubeError::Package(e) if e.is_content_invalid() => ErrorClass::ContentInvalid,
            KubeError::Repo(e) if e.is_content_invalid() => ErrorClass::ContentInvalid,
            KubeError::ObjectConflict { .. } => ErrorClass::ContentInvalid,
            KubeError::Dependency(_) => ErrorClass::DependencyInvalid,
            KubeError::Api(kube::Error::Api(resp)) if resp.code == 429 => {
                ErrorClass::ResourceExhaustion
            }
            _ => ErrorClass::Transient,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let conflict = KubeError::Conflict {
            kind: "ProviderRevision".to_string(),
            name: "p-1".to_string(),
            expected: "3".to_string(),
        };
        assert!(conflict.is_conflict());
        assert_eq!(conflict.class(), ErrorClass::Transient);

        let missing = KubeError::not_found("Provider", "p");
        assert!(missing.is_not_found());
        assert!(!missing.is_conflict());

        let invalid = KubeError::from(xpkg_core::CoreError::InvalidContents {
            message: "bad".to_string(),
        });
        assert_eq!(invalid.class(), ErrorClass::ContentInvalid);

        let registry = KubeError::from(xpkg_repo::RepoError::OciError {
            message: "connection reset".to_string(),
        });
        assert_eq!(registry.class(), ErrorClass::Transient);

        let object = KubeError::ObjectConflict {
            object: "CustomResourceDefinition/x".to_string(),
            owner: "other-abc".to_string(),
        };
        assert_eq!(object.class(), ErrorClass::ContentInvalid);
    }
}

//! Error types for registry operations

use thiserror::Error;

/// Registry operation errors
#[derive(Debug, Error)]
pub enum RepoError {
    // ============ Lookup Errors ============
    #[error("Package not found: {source_ref}")]
    PackageNotFound { source_ref: String },

    #[error("No tags available for {repository}")]
    NoTagsAvailable { repository: String },

    // ============ Registry Errors ============
    #[error("OCI registry error: {message}")]
    OciError { message: String },

    #[error("Authentication failed: {message}")]
    AuthFailed { message: String },

    // ============ Content Errors ============
    #[error("Invalid package archive: {message}")]
    InvalidArchive { message: String },

    #[error(transparent)]
    Core(#[from] xpkg_core::CoreError),

    // ============ IO Errors ============
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, RepoError>;

impl From<serde_json::Error> for RepoError {
    fn from(e: serde_json::Error) -> Self {
        RepoError::Serialization(e.to_string())
    }
}

impl RepoError {
    /// Whether the package contents are at fault. Retrying will not help.
    pub fn is_content_invalid(&self) -> bool {
        match self {
            RepoError::InvalidArchive { .. } => true,
            RepoError::Core(e) => e.is_content_invalid(),
            _ => false,
        }
    }
}

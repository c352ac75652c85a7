//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid package contents: {message}")]
    InvalidContents { message: String },

    #[error("Package requires platform version {required}, running {actual}")]
    IncompatiblePlatform { required: String, actual: String },

    #[error("Invalid package source '{source_ref}': {message}")]
    InvalidSource { source_ref: String, message: String },

    #[error("Invalid version constraint '{constraint}': {message}")]
    InvalidConstraint { constraint: String, message: String },

    #[error("Failed to parse package YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid version: {0}")]
    InvalidVersion(#[from] semver::Error),
}

impl CoreError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        CoreError::InvalidContents {
            message: message.into(),
        }
    }

    /// Whether the error comes from the package contents themselves rather
    /// than from the environment. Such errors do not go away on retry.
    pub fn is_content_invalid(&self) -> bool {
        matches!(
            self,
            CoreError::InvalidContents { .. }
                | CoreError::IncompatiblePlatform { .. }
                | CoreError::InvalidConstraint { .. }
                | CoreError::InvalidSource { .. }
                | CoreError::YamlParse(_)
                | CoreError::JsonParse(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

//! Registry-facing collaborator interfaces
//!
//! The control plane never talks to a registry directly. It asks a
//! [`PackageFetcher`] for parsed contents, an [`IdentifierResolver`] for the
//! stable identifier of a source, and a [`TagLister`] for the tags available
//! when installing a missing dependency.

use async_trait::async_trait;
use xpkg_core::{PackageContents, SourceRef};

use crate::credentials::RegistryCredentials;
use crate::error::Result;

/// A request against one package source
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub source: SourceRef,
    pub credentials: Option<RegistryCredentials>,
}

impl FetchRequest {
    /// Anonymous request for a source
    pub fn new(source: SourceRef) -> Self {
        Self {
            source,
            credentials: None,
        }
    }

    pub fn with_credentials(mut self, credentials: Option<RegistryCredentials>) -> Self {
        self.credentials = credentials;
        self
    }
}

/// Extracts and validates the contents of a package
#[async_trait]
pub trait PackageFetcher: Send + Sync {
    /// Fetch and parse the package at `request.source`.
    ///
    /// Fails with a content-invalid error when the package document is
    /// malformed (see [`RepoError::is_content_invalid`](crate::RepoError::is_content_invalid)).
    async fn fetch(&self, request: &FetchRequest) -> Result<PackageContents>;
}

/// Resolves a source to the stable identifier of its contents
#[async_trait]
pub trait IdentifierResolver: Send + Sync {
    async fn resolve(&self, request: &FetchRequest) -> Result<String>;
}

/// Lists the tags published for a repository
#[async_trait]
pub trait TagLister: Send + Sync {
    async fn list_tags(&self, request: &FetchRequest) -> Result<Vec<String>>;
}

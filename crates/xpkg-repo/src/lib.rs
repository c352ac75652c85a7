//! xpkg Registry Access
//!
//! This crate provides everything the control plane needs from package
//! registries:
//!
//! - **Collaborator interfaces**: [`PackageFetcher`], [`IdentifierResolver`], [`TagLister`]
//! - **OCI registries**: pull package layers, resolve manifest digests, list tags
//! - **In-memory registry**: the same interfaces backed by a map, for tests
//! - **Dependency resolution**: match declared dependencies against installed packages
//!
//! ## Example
//!
//! ```rust,no_run
//! use xpkg_core::SourceRef;
//! use xpkg_repo::{FetchRequest, IdentifierResolver, OciRegistry};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = OciRegistry::new();
//! let source = SourceRef::parse("xpkg.io/acme/provider-aws:v1.0.0")?;
//! let digest = registry.resolve(&FetchRequest::new(source)).await?;
//! # Ok(())
//! # }
//! ```

pub mod credentials;
pub mod dependency;
pub mod error;
pub mod fetch;
pub mod memory;
pub mod oci;

// Re-exports for convenience
pub use credentials::{DockerConfig, RegistryCredentials};
pub use dependency::{
    DependencyOutcome, DependencyResolver, InstalledPackage, ResolvedDependency,
    select_install_source,
};
pub use error::{RepoError, Result};
pub use fetch::{FetchRequest, IdentifierResolver, PackageFetcher, TagLister};
pub use memory::InMemoryRegistry;
pub use oci::OciRegistry;

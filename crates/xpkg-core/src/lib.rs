//! xpkg Core - package contents and identity
//!
//! This crate provides the foundational types used throughout xpkg:
//! - `PackageContents`: the metadata document, declared dependencies and installable objects
//! - `SourceRef`: package image references and revision naming
//! - `Constraint`: dependency version constraints

pub mod error;
pub mod manifest;
pub mod source;
pub mod version;

pub use error::{CoreError, Result};
pub use manifest::{
    ControllerSpec, Dependency, LABEL_PROVIDER_FAMILY, META_API_VERSION, PackageContents,
    PackageKind, PackageMeta, PackageObject,
};
pub use source::{SourceRef, revision_name};
pub use version::{Constraint, parse_version};

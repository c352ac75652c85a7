//! OCI registry client
//!
//! Packages are OCI images. One of the image layers carries a gzipped tar
//! archive with a `package.yaml` stream at any depth; nothing else in the
//! image is read.

use async_trait::async_trait;
use flate2::read::GzDecoder;
use oci_distribution::Reference;
use oci_distribution::client::{Client, ClientConfig, ClientProtocol};
use oci_distribution::secrets::RegistryAuth;
use std::io::{Cursor, Read};
use tar::Archive;
use xpkg_core::{PackageContents, SourceRef};

use crate::credentials::RegistryCredentials;
use crate::error::{RepoError, Result};
use crate::fetch::{FetchRequest, IdentifierResolver, PackageFetcher, TagLister};

/// Media types accepted for package layers
pub mod media_types {
    /// Dedicated package layer
    pub const PACKAGE_LAYER: &str = "application/vnd.xpkg.package.layer.v1.tar+gzip";
    /// Plain OCI image layer
    pub const IMAGE_LAYER: &str = "application/vnd.oci.image.layer.v1.tar+gzip";
    /// Docker image layer
    pub const DOCKER_LAYER: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";
}

/// File holding the package stream inside a layer
pub const PACKAGE_FILE: &str = "package.yaml";

/// Registry used when a source names none
pub const DEFAULT_REGISTRY: &str = "xpkg.io";

/// OCI registry client
pub struct OciRegistry {
    /// OCI client
    client: Client,
    /// Registry for sources without one
    default_registry: String,
}

impl OciRegistry {
    /// Create a new OCI registry client
    pub fn new() -> Self {
        Self::with_default_registry(DEFAULT_REGISTRY)
    }

    /// Create a client resolving registry-less sources against `registry`
    pub fn with_default_registry(registry: impl Into<String>) -> Self {
        let config = ClientConfig {
            protocol: ClientProtocol::Https,
            ..Default::default()
        };
        Self {
            client: Client::new(config),
            default_registry: registry.into(),
        }
    }

    /// Build a fully qualified OCI reference for a source
    pub fn reference(&self, source: &SourceRef) -> Result<Reference> {
        let registry = source
            .registry
            .as_deref()
            .unwrap_or(&self.default_registry);

        let mut full = format!("{}/{}", registry, source.repository);
        if let Some(tag) = &source.tag {
            full.push(':');
            full.push_str(tag);
        }
        if let Some(digest) = &source.digest {
            full.push('@');
            full.push_str(digest);
        }

        Reference::try_from(full.as_str()).map_err(|e| RepoError::OciError {
            message: format!("invalid reference {}: {}", full, e),
        })
    }

    fn auth(credentials: Option<&RegistryCredentials>) -> RegistryAuth {
        match credentials {
            Some(c) => RegistryAuth::Basic(c.username.clone(), c.password.clone()),
            None => RegistryAuth::Anonymous,
        }
    }

    fn map_error(source: &SourceRef, action: &str, e: impl std::fmt::Display) -> RepoError {
        let message = e.to_string();
        let lower = message.to_lowercase();
        // Registries disagree on how "not found" is reported
        if lower.contains("not found") || lower.contains("manifest unknown") || lower.contains("404")
        {
            RepoError::PackageNotFound {
                source_ref: source.to_string(),
            }
        } else {
            RepoError::OciError {
                message: format!("failed to {} {}: {}", action, source, message),
            }
        }
    }
}

impl Default for OciRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PackageFetcher for OciRegistry {
    async fn fetch(&self, request: &FetchRequest) -> Result<PackageContents> {
        let reference = self.reference(&request.source)?;
        let auth = Self::auth(request.credentials.as_ref());

        tracing::debug!(source = %request.source, "pulling package image");

        let image_data = self
            .client
            .pull(
                &reference,
                &auth,
                vec![
                    media_types::PACKAGE_LAYER,
                    media_types::IMAGE_LAYER,
                    media_types::DOCKER_LAYER,
                ],
            )
            .await
            .map_err(|e| Self::map_error(&request.source, "pull", e))?;

        for layer in &image_data.layers {
            if let Some(text) = find_package_document(&layer.data)? {
                return Ok(PackageContents::parse(&text)?);
            }
        }

        Err(RepoError::InvalidArchive {
            message: format!("no {} found in {}", PACKAGE_FILE, request.source),
        })
    }
}

#[async_trait]
impl IdentifierResolver for OciRegistry {
    async fn resolve(&self, request: &FetchRequest) -> Result<String> {
        if let Some(digest) = request.source.pinned_digest() {
            return Ok(digest.to_string());
        }

        let reference = self.reference(&request.source)?;
        let auth = Self::auth(request.credentials.as_ref());

        self.client
            .fetch_manifest_digest(&reference, &auth)
            .await
            .map_err(|e| Self::map_error(&request.source, "resolve", e))
    }
}

#[async_trait]
impl TagLister for OciRegistry {
    async fn list_tags(&self, request: &FetchRequest) -> Result<Vec<String>> {
        let reference = self.reference(&request.source.with_tag("latest"))?;
        let auth = Self::auth(request.credentials.as_ref());

        let response = self
            .client
            .list_tags(&reference, &auth, None, None)
            .await
            .map_err(|e| Self::map_error(&request.source, "list tags of", e))?;

        Ok(response.tags)
    }
}

/// Locate the package stream inside a gzipped tar layer
pub fn find_package_document(data: &[u8]) -> Result<Option<String>> {
    let invalid = |e: std::io::Error| RepoError::InvalidArchive {
        message: e.to_string(),
    };

    let gz = GzDecoder::new(Cursor::new(data));
    let mut archive = Archive::new(gz);

    for entry in archive.entries().map_err(invalid)? {
        let mut entry = entry.map_err(invalid)?;
        let is_package = entry
            .path()
            .map_err(invalid)?
            .file_name()
            .is_some_and(|n| n == PACKAGE_FILE);

        if is_package {
            let mut text = String::new();
            entry.read_to_string(&mut text).map_err(invalid)?;
            return Ok(Some(text));
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;

    fn layer_with(files: &[(&str, &str)]) -> Vec<u8> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (path, body) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(body.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, path, body.as_bytes()).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn test_find_package_document() {
        let layer = layer_with(&[
            ("README.md", "hello"),
            ("pkg/package.yaml", "apiVersion: meta.pkg.xpkg.io/v1"),
        ]);
        let doc = find_package_document(&layer).unwrap();
        assert_eq!(doc.as_deref(), Some("apiVersion: meta.pkg.xpkg.io/v1"));
    }

    #[test]
    fn test_find_package_document_absent() {
        let layer = layer_with(&[("bin/controller", "\x7fELF")]);
        assert!(find_package_document(&layer).unwrap().is_none());
    }

    #[test]
    fn test_find_package_document_corrupt() {
        let err = find_package_document(b"definitely not gzip").unwrap_err();
        assert!(err.is_content_invalid());
    }

    #[test]
    fn test_reference_uses_default_registry() {
        let registry = OciRegistry::new();
        let source = SourceRef::parse("acme/provider-aws:v1.0.0").unwrap();
        let reference = registry.reference(&source).unwrap();
        assert_eq!(reference.registry(), "xpkg.io");
        assert_eq!(reference.repository(), "acme/provider-aws");
        assert_eq!(reference.tag(), Some("v1.0.0"));
    }

    #[test]
    fn test_map_error_not_found() {
        let source = SourceRef::parse("xpkg.io/acme/p:v1").unwrap();
        let err = OciRegistry::map_error(&source, "pull", "manifest unknown");
        assert!(matches!(err, RepoError::PackageNotFound { .. }));

        let err = OciRegistry::map_error(&source, "pull", "connection reset");
        assert!(matches!(err, RepoError::OciError { .. }));
    }
}

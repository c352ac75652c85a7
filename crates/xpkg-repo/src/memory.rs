//! In-memory registry for testing
//!
//! Holds package streams keyed by source, so the control plane can be driven
//! without a registry.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};
use xpkg_core::{PackageContents, SourceRef};

use crate::error::{RepoError, Result};
use crate::fetch::{FetchRequest, IdentifierResolver, PackageFetcher, TagLister};

#[derive(Debug, Clone)]
struct Published {
    contents: String,
    digest: String,
}

#[derive(Debug, Default)]
struct RegistryState {
    /// repository key -> tag -> published package
    repositories: HashMap<String, BTreeMap<String, Published>>,
    /// source string -> forced failure message
    failures: HashMap<String, String>,
    fetches: usize,
}

/// In-memory package registry
#[derive(Debug, Clone, Default)]
pub struct InMemoryRegistry {
    state: Arc<RwLock<RegistryState>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a package stream under `source` (which must carry a tag).
    /// Returns the digest identifying the contents.
    pub fn publish(&self, source: &str, contents: &str) -> Result<String> {
        let source = SourceRef::parse(source)?;
        let tag = source.tag.clone().ok_or_else(|| RepoError::OciError {
            message: format!("cannot publish {} without a tag", source),
        })?;

        let digest = format!("sha256:{}", hex::encode(Sha256::digest(contents.as_bytes())));
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state
            .repositories
            .entry(source.repository_key())
            .or_default()
            .insert(
                tag,
                Published {
                    contents: contents.to_string(),
                    digest: digest.clone(),
                },
            );
        Ok(digest)
    }

    /// Make every fetch of `source` fail with a registry error
    pub fn fail_fetch(&self, source: &str, message: &str) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state
            .failures
            .insert(source.to_string(), message.to_string());
    }

    /// Remove a forced failure
    pub fn clear_failure(&self, source: &str) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.failures.remove(source);
    }

    /// Number of fetches served
    pub fn fetch_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .fetches
    }

    fn lookup(&self, source: &SourceRef) -> Option<Published> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let tags = state.repositories.get(&source.repository_key())?;

        match (&source.digest, &source.tag) {
            (Some(digest), _) => tags.values().find(|p| &p.digest == digest).cloned(),
            (None, Some(tag)) => tags.get(tag).cloned(),
            (None, None) => None,
        }
    }
}

#[async_trait]
impl PackageFetcher for InMemoryRegistry {
    async fn fetch(&self, request: &FetchRequest) -> Result<PackageContents> {
        {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            state.fetches += 1;
            if let Some(message) = state.failures.get(&request.source.to_string()) {
                return Err(RepoError::OciError {
                    message: message.clone(),
                });
            }
        }

        let published = self
            .lookup(&request.source)
            .ok_or_else(|| RepoError::PackageNotFound {
                source_ref: request.source.to_string(),
            })?;

        Ok(PackageContents::parse(&published.contents)?)
    }
}

#[async_trait]
impl IdentifierResolver for InMemoryRegistry {
    async fn resolve(&self, request: &FetchRequest) -> Result<String> {
        if let Some(digest) = request.source.pinned_digest() {
            return Ok(digest.to_string());
        }
        // Unpublished sources resolve to themselves
        Ok(self
            .lookup(&request.source)
            .map(|p| p.digest)
            .unwrap_or_else(|| request.source.to_string()))
    }
}

#[async_trait]
impl TagLister for InMemoryRegistry {
    async fn list_tags(&self, request: &FetchRequest) -> Result<Vec<String>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        Ok(state
            .repositories
            .get(&request.source.repository_key())
            .map(|tags| tags.keys().cloned().collect())
            .unwrap_or_default())
    }
}

//! Package source references and revision identity

use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::{CoreError, Result};

/// Number of hex characters of the identifier hash used in revision names
const REVISION_HASH_LEN: usize = 12;

/// Maximum length of a DNS-1123 label
const DNS_LABEL_MAX: usize = 63;

/// Maximum length of a DNS-1123 subdomain, the limit on object names
const MAX_OBJECT_NAME_LEN: usize = 253;

/// A parsed package image reference
///
/// Format: `[registry/]repository[:tag][@digest]`. The registry segment is
/// optional; a first path segment is treated as a registry when it contains a
/// `.` or `:` or equals `localhost`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceRef {
    pub registry: Option<String>,
    pub repository: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl SourceRef {
    /// Parse a source reference string
    pub fn parse(s: &str) -> Result<Self> {
        let invalid = |message: &str| CoreError::InvalidSource {
            source_ref: s.to_string(),
            message: message.to_string(),
        };

        let clean = s
            .trim()
            .trim_start_matches("oci://")
            .trim_start_matches("https://")
            .trim_start_matches("http://");

        if clean.is_empty() {
            return Err(invalid("empty reference"));
        }
        if clean.chars().any(char::is_whitespace) {
            return Err(invalid("reference contains whitespace"));
        }

        let (name_tag, digest) = match clean.rsplit_once('@') {
            Some((_, d)) if d.is_empty() => return Err(invalid("empty digest")),
            Some((n, d)) => (n, Some(d.to_string())),
            None => (clean, None),
        };

        // A ':' after the last '/' separates the tag; earlier ones belong to a registry port
        let (path, tag) = match name_tag.rsplit_once(':') {
            Some((p, t)) if !t.contains('/') => {
                if t.is_empty() {
                    return Err(invalid("empty tag"));
                }
                (p, Some(t.to_string()))
            }
            _ => (name_tag, None),
        };

        let (registry, repository) = match path.split_once('/') {
            Some((first, rest))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (Some(first.to_string()), rest.to_string())
            }
            _ => (None, path.to_string()),
        };

        if repository.is_empty() || repository.split('/').any(str::is_empty) {
            return Err(invalid("empty repository"));
        }

        Ok(Self {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// Registry plus repository. Identifies a package regardless of tag or digest.
    pub fn repository_key(&self) -> String {
        match &self.registry {
            Some(r) => format!("{}/{}", r, self.repository),
            None => self.repository.clone(),
        }
    }

    /// Digest when the reference is pinned by digest
    pub fn pinned_digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// Same repository at a different tag
    pub fn with_tag(&self, tag: &str) -> Self {
        Self {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            tag: Some(tag.to_string()),
            digest: None,
        }
    }

    /// Name for a package installed from this repository, as a DNS-1123 label
    pub fn package_name(&self) -> String {
        dns_label(&self.repository)
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.repository_key())?;
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

/// Name of the revision materializing `identifier` for `package`.
///
/// Identical identifiers always map to the same name. Long package names are
/// shortened so the result stays a valid object name.
pub fn revision_name(package: &str, identifier: &str) -> String {
    let hash = hex::encode(Sha256::digest(identifier.as_bytes()));
    let room = MAX_OBJECT_NAME_LEN - REVISION_HASH_LEN - 1;
    let prefix = match package.char_indices().nth(room) {
        Some((end, _)) => package[..end].trim_end_matches(['-', '.']),
        None => package,
    };
    format!("{}-{}", prefix, &hash[..REVISION_HASH_LEN])
}

fn dns_label(raw: &str) -> String {
    let mapped: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();

    let mut label = String::with_capacity(mapped.len());
    for c in mapped.chars() {
        if c == '-' && label.ends_with('-') {
            continue;
        }
        label.push(c);
    }

    let trimmed = label.trim_matches('-');
    let truncated = &trimmed[..trimmed.len().min(DNS_LABEL_MAX)];
    truncated.trim_end_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_registry() {
        let r = SourceRef::parse("xpkg.io/acme/provider-aws:v1.2.0").unwrap();
        assert_eq!(r.registry.as_deref(), Some("xpkg.io"));
        assert_eq!(r.repository, "acme/provider-aws");
        assert_eq!(r.tag.as_deref(), Some("v1.2.0"));
        assert!(r.digest.is_none());
        assert_eq!(r.repository_key(), "xpkg.io/acme/provider-aws");
    }

    #[test]
    fn test_parse_without_registry() {
        let r = SourceRef::parse("img:v1").unwrap();
        assert!(r.registry.is_none());
        assert_eq!(r.repository, "img");
        assert_eq!(r.tag.as_deref(), Some("v1"));
        assert_eq!(r.repository_key(), "img");

        let r = SourceRef::parse("acme/platform").unwrap();
        assert!(r.registry.is_none());
        assert_eq!(r.repository, "acme/platform");
        assert!(r.tag.is_none());
    }

    #[test]
    fn test_parse_registry_port_and_digest() {
        let r = SourceRef::parse("localhost:5000/acme/cfg@sha256:abc123").unwrap();
        assert_eq!(r.registry.as_deref(), Some("localhost:5000"));
        assert_eq!(r.repository, "acme/cfg");
        assert!(r.tag.is_none());
        assert_eq!(r.pinned_digest(), Some("sha256:abc123"));

        let r = SourceRef::parse("oci://ghcr.io/acme/cfg:v2@sha256:def").unwrap();
        assert_eq!(r.tag.as_deref(), Some("v2"));
        assert_eq!(r.to_string(), "ghcr.io/acme/cfg:v2@sha256:def");
    }

    #[test]
    fn test_parse_invalid() {
        assert!(SourceRef::parse("").is_err());
        assert!(SourceRef::parse("img:").is_err());
        assert!(SourceRef::parse("img@").is_err());
        assert!(SourceRef::parse("xpkg.io//x").is_err());
        assert!(SourceRef::parse("has space:v1").is_err());
    }

    #[test]
    fn test_repository_key_ignores_tag() {
        let a = SourceRef::parse("xpkg.io/acme/p:v1").unwrap();
        let b = SourceRef::parse("xpkg.io/acme/p:v2").unwrap();
        assert_eq!(a.repository_key(), b.repository_key());
        assert_eq!(a.with_tag("v2"), b);
    }

    #[test]
    fn test_revision_name_is_deterministic() {
        let a = revision_name("provider-aws", "sha256:1111");
        let b = revision_name("provider-aws", "sha256:1111");
        let c = revision_name("provider-aws", "sha256:2222");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("provider-aws-"));
        assert_eq!(a.len(), "provider-aws-".len() + 12);
    }

    #[test]
    fn test_revision_name_of_long_package_fits_object_name() {
        let package = "a".repeat(300);
        let name = revision_name(&package, "sha256:1111");
        assert_eq!(name.len(), MAX_OBJECT_NAME_LEN);
        assert!(name.ends_with(&revision_name("a", "sha256:1111")[2..]));

        // Distinct identifiers still give distinct names
        assert_ne!(name, revision_name(&package, "sha256:2222"));

        // No dangling separator where the package name was cut
        let dashed = format!("{}-{}", "b".repeat(239), "c".repeat(20));
        let name = revision_name(&dashed, "sha256:1111");
        assert!(!name.contains("--"));
        assert!(name.len() <= MAX_OBJECT_NAME_LEN);

        let exact = "d".repeat(240);
        assert_eq!(revision_name(&exact, "x").len(), MAX_OBJECT_NAME_LEN);
    }

    #[test]
    fn test_package_name() {
        let r = SourceRef::parse("xpkg.io/Acme/provider_aws:v1").unwrap();
        assert_eq!(r.package_name(), "acme-provider-aws");

        let long = format!("xpkg.io/{}", "a".repeat(80));
        assert_eq!(SourceRef::parse(&long).unwrap().package_name().len(), 63);
    }
}

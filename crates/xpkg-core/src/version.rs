//! Version constraints for package dependencies
//!
//! Constraints use semver requirement syntax. Every version token may carry a
//! leading `v` (`>=v1.2.0`, `v1.x`), matching how package images are tagged.
//! A constraint of the form `sha256:<hex>` pins an exact digest instead.

use semver::{Version, VersionReq};
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, Result};

/// Prefix of a digest-pinned constraint
pub const DIGEST_PREFIX: &str = "sha256:";

/// A parsed dependency constraint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    /// Semver range
    Range(VersionReq),
    /// Exact image digest
    Digest(String),
}

impl Constraint {
    /// Parse a constraint string
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();

        if let Some(hex_part) = trimmed.strip_prefix(DIGEST_PREFIX) {
            if hex_part.is_empty() || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(CoreError::InvalidConstraint {
                    constraint: raw.to_string(),
                    message: "digest must be hex encoded".to_string(),
                });
            }
            return Ok(Constraint::Digest(trimmed.to_ascii_lowercase()));
        }

        let normalized = strip_version_prefixes(trimmed);
        let req = if normalized.is_empty() {
            VersionReq::STAR
        } else {
            VersionReq::parse(&normalized).map_err(|e| CoreError::InvalidConstraint {
                constraint: raw.to_string(),
                message: e.to_string(),
            })?
        };

        Ok(Constraint::Range(req))
    }

    /// Check a semver version against this constraint.
    /// Digest constraints never match a version.
    pub fn matches_version(&self, version: &Version) -> bool {
        match self {
            Constraint::Range(req) => req.matches(version),
            Constraint::Digest(_) => false,
        }
    }

    /// Check an image digest against this constraint.
    /// Range constraints never match a digest.
    pub fn matches_digest(&self, digest: &str) -> bool {
        match self {
            Constraint::Digest(pinned) => pinned.eq_ignore_ascii_case(digest),
            Constraint::Range(_) => false,
        }
    }

    /// Pick the highest tag satisfying this constraint
    pub fn highest_satisfying<'a, I>(&self, tags: I) -> Option<&'a str>
    where
        I: IntoIterator<Item = &'a String>,
    {
        tags.into_iter()
            .filter_map(|tag| parse_version(tag).map(|v| (v, tag.as_str())))
            .filter(|(v, _)| self.matches_version(v))
            .max_by(|(a, _), (b, _)| a.cmp(b))
            .map(|(_, tag)| tag)
    }
}

impl FromStr for Constraint {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::Range(req) => write!(f, "{}", req),
            Constraint::Digest(d) => write!(f, "{}", d),
        }
    }
}

/// Parse a tag as a version, tolerating a `v` prefix and missing
/// minor/patch components (`v1`, `1.2`).
pub fn parse_version(tag: &str) -> Option<Version> {
    let bare = tag.strip_prefix(['v', 'V']).unwrap_or(tag);
    if let Ok(v) = Version::parse(bare) {
        return Some(v);
    }

    let parts: Vec<&str> = bare.split('.').collect();
    if parts.is_empty() || parts.len() > 2 || !parts.iter().all(|p| is_number(p)) {
        return None;
    }
    let padded = match parts.len() {
        1 => format!("{}.0.0", parts[0]),
        _ => format!("{}.{}.0", parts[0], parts[1]),
    };
    Version::parse(&padded).ok()
}

fn is_number(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

/// Remove `v` prefixes that precede a version number
fn strip_version_prefixes(req: &str) -> String {
    let chars: Vec<char> = req.chars().collect();
    let mut out = String::with_capacity(req.len());

    for (i, &c) in chars.iter().enumerate() {
        let is_prefix = (c == 'v' || c == 'V')
            && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())
            && (i == 0 || matches!(chars[i - 1], ' ' | ',' | '<' | '>' | '=' | '~' | '^'));
        if !is_prefix {
            out.push(c);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_range_with_v_prefix() {
        let c = Constraint::parse(">=v1.2.0").unwrap();
        assert!(c.matches_version(&Version::new(1, 2, 0)));
        assert!(c.matches_version(&Version::new(2, 0, 0)));
        assert!(!c.matches_version(&Version::new(1, 1, 9)));

        let c = Constraint::parse(">=v1.0.0, <v2.0.0").unwrap();
        assert!(c.matches_version(&Version::new(1, 9, 0)));
        assert!(!c.matches_version(&Version::new(2, 0, 0)));
    }

    #[test]
    fn test_parse_empty_matches_anything() {
        let c = Constraint::parse("").unwrap();
        assert!(c.matches_version(&Version::new(0, 0, 1)));
    }

    #[test]
    fn test_parse_digest() {
        let c = Constraint::parse("sha256:ABCDEF0123").unwrap();
        assert_eq!(c, Constraint::Digest("sha256:abcdef0123".to_string()));
        assert!(c.matches_digest("sha256:abcdef0123"));
        assert!(!c.matches_version(&Version::new(1, 0, 0)));

        assert!(Constraint::parse("sha256:not-hex").is_err());
    }

    #[test]
    fn test_parse_invalid() {
        let err = Constraint::parse(">=banana").unwrap_err();
        assert!(err.is_content_invalid());
    }

    #[test]
    fn test_parse_version_lenient() {
        assert_eq!(parse_version("v1.2.3"), Some(Version::new(1, 2, 3)));
        assert_eq!(parse_version("1.2"), Some(Version::new(1, 2, 0)));
        assert_eq!(parse_version("v3"), Some(Version::new(3, 0, 0)));
        assert_eq!(parse_version("latest"), None);
        assert_eq!(parse_version("1.2.3.4"), None);
    }

    #[test]
    fn test_highest_satisfying() {
        let tags: Vec<String> = ["v1.0.0", "v1.4.0", "v2.0.0", "latest", "v1.3.9"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let c = Constraint::parse(">=v1.0.0, <v2.0.0").unwrap();
        assert_eq!(c.highest_satisfying(&tags), Some("v1.4.0"));

        let c = Constraint::parse(">=v3.0.0").unwrap();
        assert_eq!(c.highest_satisfying(&tags), None);

        let c = Constraint::parse("sha256:abc").unwrap();
        assert_eq!(c.highest_satisfying(&tags), None);
    }
}

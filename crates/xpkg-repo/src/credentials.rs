//! Registry credentials from pull secrets
//!
//! Pull secrets carry a Docker `config.json` document (`.dockerconfigjson`).
//! Credentials are only ever handed out for the registry they were issued for.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{RepoError, Result};

/// Username/password pair for one registry
#[derive(Clone, PartialEq, Eq)]
pub struct RegistryCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for RegistryCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Docker config.json format
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DockerConfig {
    #[serde(default)]
    pub auths: HashMap<String, DockerAuth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerAuth {
    #[serde(default)]
    pub auth: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl DockerConfig {
    /// Parse the contents of a `.dockerconfigjson` secret key
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Credentials for a registry host
    pub fn credentials_for(&self, registry: &str) -> Result<Option<RegistryCredentials>> {
        let candidates = [
            registry.to_string(),
            format!("https://{}", registry),
            format!("http://{}", registry),
            format!("https://{}/v1/", registry),
        ];

        let Some(entry) = candidates.iter().find_map(|c| self.auths.get(c)) else {
            return Ok(None);
        };

        if let (Some(username), Some(password)) = (&entry.username, &entry.password) {
            return Ok(Some(RegistryCredentials {
                username: username.clone(),
                password: password.clone(),
            }));
        }

        match &entry.auth {
            Some(encoded) => decode_auth(encoded).map(Some),
            None => Ok(None),
        }
    }
}

fn decode_auth(encoded: &str) -> Result<RegistryCredentials> {
    let decoded =
        base64::Engine::decode(&base64::engine::general_purpose::STANDARD, encoded.trim())
            .map_err(|e| RepoError::AuthFailed {
                message: format!("invalid auth entry: {}", e),
            })?;

    let text = String::from_utf8(decoded).map_err(|_| RepoError::AuthFailed {
        message: "auth entry is not UTF-8".to_string(),
    })?;

    let (username, password) = text.split_once(':').ok_or_else(|| RepoError::AuthFailed {
        message: "auth entry is not in user:password form".to_string(),
    })?;

    Ok(RegistryCredentials {
        username: username.to_string(),
        password: password.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_from_auth_field() {
        let encoded = base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            "robot:s3cret",
        );
        let json = format!(r#"{{"auths":{{"xpkg.io":{{"auth":"{}"}}}}}}"#, encoded);
        let config = DockerConfig::from_slice(json.as_bytes()).unwrap();

        let creds = config.credentials_for("xpkg.io").unwrap().unwrap();
        assert_eq!(creds.username, "robot");
        assert_eq!(creds.password, "s3cret");

        assert!(config.credentials_for("ghcr.io").unwrap().is_none());
    }

    #[test]
    fn test_credentials_from_username_password() {
        let json = r#"{"auths":{"https://ghcr.io":{"username":"u","password":"p"}}}"#;
        let config = DockerConfig::from_slice(json.as_bytes()).unwrap();
        let creds = config.credentials_for("ghcr.io").unwrap().unwrap();
        assert_eq!(creds.username, "u");
    }

    #[test]
    fn test_malformed_auth() {
        let json = r#"{"auths":{"xpkg.io":{"auth":"!!!"}}}"#;
        let config = DockerConfig::from_slice(json.as_bytes()).unwrap();
        assert!(config.credentials_for("xpkg.io").is_err());
    }

    #[test]
    fn test_debug_redacts_password() {
        let creds = RegistryCredentials {
            username: "u".to_string(),
            password: "hunter2".to_string(),
        };
        assert!(!format!("{:?}", creds).contains("hunter2"));
    }
}

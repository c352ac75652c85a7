//! Controller workloads of provider revisions
//!
//! An Active revision runs one replica of its controller; an Inactive one is
//! scaled to zero but keeps its workload so reactivation is cheap.

mod kube;
mod memory;

pub use self::kube::KubeWorkloads;
pub use memory::InMemoryWorkloads;

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::error::Result;

/// Label linking a workload to its revision
pub const LABEL_REVISION: &str = "pkg.xpkg.io/revision";

/// Desired controller workload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkloadRequest {
    pub name: String,
    pub namespace: String,
    pub image: String,
    pub replicas: i32,
    pub labels: BTreeMap<String, String>,
    pub pull_secrets: Vec<String>,
    pub tls_server_secret: Option<String>,
    pub tls_client_secret: Option<String>,
    pub webhook_tls_secret: Option<String>,
}

impl WorkloadRequest {
    /// Secrets mounted into the controller, as `(volume, secret)` pairs
    pub fn tls_volumes(&self) -> Vec<(&'static str, &str)> {
        [
            ("tls-server-certs", self.tls_server_secret.as_deref()),
            ("tls-client-certs", self.tls_client_secret.as_deref()),
            ("webhook-tls-secret", self.webhook_tls_secret.as_deref()),
        ]
        .into_iter()
        .filter_map(|(volume, secret)| secret.map(|s| (volume, s)))
        .collect()
    }
}

/// Observed controller workload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadStatus {
    pub name: String,
    /// Every desired replica is updated, ready and available
    pub ready: bool,
    pub message: Option<String>,
}

/// Runs revision controllers
#[async_trait]
pub trait WorkloadManager: Send + Sync {
    /// Create or update the workload and report its readiness
    async fn ensure(&self, request: &WorkloadRequest) -> Result<WorkloadStatus>;

    /// Remove the workload; absent workloads are ignored
    async fn remove(&self, namespace: &str, name: &str) -> Result<()>;
}

/// Readiness as reported by a Deployment's replica counters
pub fn replicas_ready(desired: i32, ready: i32, updated: i32, available: i32) -> bool {
    desired > 0 && ready == desired && updated == desired && available == desired
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replicas_ready() {
        assert!(replicas_ready(1, 1, 1, 1));
        assert!(!replicas_ready(1, 0, 1, 1));
        assert!(!replicas_ready(1, 1, 0, 1));
        assert!(!replicas_ready(0, 0, 0, 0));
    }

    #[test]
    fn test_tls_volumes() {
        let request = WorkloadRequest {
            tls_server_secret: Some("aws-tls-server".to_string()),
            webhook_tls_secret: Some("webhook-tls-secret-aws".to_string()),
            ..Default::default()
        };
        assert_eq!(
            request.tls_volumes(),
            vec![
                ("tls-server-certs", "aws-tls-server"),
                ("webhook-tls-secret", "webhook-tls-secret-aws")
            ]
        );
    }
}

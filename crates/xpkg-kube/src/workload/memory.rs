//! In-memory workloads for testing

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use super::{WorkloadManager, WorkloadRequest, WorkloadStatus};
use crate::error::Result;

#[derive(Debug)]
struct State {
    workloads: BTreeMap<String, WorkloadRequest>,
    /// Workloads that never become ready
    stuck: HashSet<String>,
}

/// Workloads held in memory; scaled-up workloads are ready unless marked stuck
#[derive(Debug, Clone)]
pub struct InMemoryWorkloads {
    state: Arc<RwLock<State>>,
}

impl Default for InMemoryWorkloads {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryWorkloads {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(State {
                workloads: BTreeMap::new(),
                stuck: HashSet::new(),
            })),
        }
    }

    /// Control whether the named workload becomes ready
    pub fn set_ready(&self, name: &str, ready: bool) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if ready {
            state.stuck.remove(name);
        } else {
            state.stuck.insert(name.to_string());
        }
    }

    /// Current request of a workload
    pub fn get(&self, name: &str) -> Option<WorkloadRequest> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.workloads.get(name).cloned()
    }

    /// Names of workloads with at least one replica
    pub fn running(&self) -> Vec<String> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .workloads
            .values()
            .filter(|w| w.replicas > 0)
            .map(|w| w.name.clone())
            .collect()
    }
}

#[async_trait]
impl WorkloadManager for InMemoryWorkloads {
    async fn ensure(&self, request: &WorkloadRequest) -> Result<WorkloadStatus> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state
            .workloads
            .insert(request.name.clone(), request.clone());

        let ready = request.replicas > 0 && !state.stuck.contains(&request.name);
        Ok(WorkloadStatus {
            name: request.name.clone(),
            ready,
            message: (!ready).then(|| format!("0/{} replicas ready", request.replicas)),
        })
    }

    async fn remove(&self, _namespace: &str, name: &str) -> Result<()> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.workloads.remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(name: &str, replicas: i32) -> WorkloadRequest {
        WorkloadRequest {
            name: name.to_string(),
            namespace: "xpkg-system".to_string(),
            image: "xpkg.io/acme/aws-controller:v1".to_string(),
            replicas,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_readiness() {
        let workloads = InMemoryWorkloads::new();
        assert!(workloads.ensure(&request("aws-1", 1)).await.unwrap().ready);
        assert!(!workloads.ensure(&request("aws-1", 0)).await.unwrap().ready);

        workloads.set_ready("aws-2", false);
        let status = workloads.ensure(&request("aws-2", 1)).await.unwrap();
        assert!(!status.ready);
        assert!(status.message.is_some());

        assert_eq!(workloads.running(), vec!["aws-2".to_string()]);

        workloads.remove("xpkg-system", "aws-2").await.unwrap();
        assert!(workloads.get("aws-2").is_none());
    }
}

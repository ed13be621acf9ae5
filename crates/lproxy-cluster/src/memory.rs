//! In-memory [`ClusterApi`] for tests and single-process runs.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::types::{ClusterClaim, ManagedCluster, Secret};
use crate::{ClusterApi, ClusterApiError};

#[derive(Default)]
struct State {
    clusters: HashMap<String, ManagedCluster>,
    secrets: HashMap<(String, String), Secret>,
    claims: HashMap<String, ClusterClaim>,
}

/// Everything lives behind one mutex; no operation awaits while holding
/// it.
pub struct MemoryClusterApi {
    cluster_uid: String,
    state: Mutex<State>,
}

impl MemoryClusterApi {
    pub fn new(cluster_uid: impl Into<String>) -> Self {
        Self {
            cluster_uid: cluster_uid.into(),
            state: Mutex::new(State::default()),
        }
    }

    pub fn insert_managed_cluster(&self, cluster: ManagedCluster) {
        self.state
            .lock()
            .clusters
            .insert(cluster.name.clone(), cluster);
    }

    pub fn put_secret(&self, secret: Secret) {
        self.state
            .lock()
            .secrets
            .insert((secret.namespace.clone(), secret.name.clone()), secret);
    }

    /// Synchronous accessor for assertions.
    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.state
            .lock()
            .secrets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Synchronous accessor for assertions.
    pub fn claim(&self, name: &str) -> Option<ClusterClaim> {
        self.state.lock().claims.get(name).cloned()
    }
}

#[async_trait]
impl ClusterApi for MemoryClusterApi {
    async fn cluster_uid(&self) -> Result<String, ClusterApiError> {
        Ok(self.cluster_uid.clone())
    }

    async fn managed_cluster(
        &self,
        name: &str,
    ) -> Result<Option<ManagedCluster>, ClusterApiError> {
        Ok(self.state.lock().clusters.get(name).cloned())
    }

    async fn list_managed_clusters(&self) -> Result<Vec<ManagedCluster>, ClusterApiError> {
        let mut out: Vec<ManagedCluster> = self.state.lock().clusters.values().cloned().collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Secret>, ClusterApiError> {
        Ok(self.secret(namespace, name))
    }

    async fn apply_secret(&self, secret: &Secret) -> Result<(), ClusterApiError> {
        self.put_secret(secret.clone());
        Ok(())
    }

    async fn get_claim(&self, name: &str) -> Result<Option<ClusterClaim>, ClusterApiError> {
        Ok(self.claim(name))
    }

    async fn upsert_claim(&self, claim: &ClusterClaim) -> Result<(), ClusterApiError> {
        self.state
            .lock()
            .claims
            .insert(claim.name.clone(), claim.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn secrets_create_then_update() {
        let api = MemoryClusterApi::new("c-1");
        assert!(api.get_secret("ns", "s").await.unwrap().is_none());

        let mut secret = Secret::new("ns", "s");
        secret.data.insert("plan".to_string(), b"v1".to_vec());
        api.apply_secret(&secret).await.unwrap();

        secret.data.insert("plan".to_string(), b"v2".to_vec());
        api.apply_secret(&secret).await.unwrap();

        let got = api.get_secret("ns", "s").await.unwrap().unwrap();
        assert_eq!(got.data["plan"], b"v2");
    }

    #[tokio::test]
    async fn claims_upsert_and_read() {
        let api = MemoryClusterApi::new("c-1");
        assert!(api.get_claim("licenses.appscode.com").await.unwrap().is_none());

        api.upsert_claim(&ClusterClaim::new("licenses.appscode.com", "f1"))
            .await
            .unwrap();
        api.upsert_claim(&ClusterClaim::new("licenses.appscode.com", "f1,f2"))
            .await
            .unwrap();

        let claim = api.get_claim("licenses.appscode.com").await.unwrap().unwrap();
        assert_eq!(claim.value, "f1,f2");
    }
}

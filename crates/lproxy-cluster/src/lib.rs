//! Cluster-facing state: managed clusters, claims and secrets.
//!
//! The proxy core talks to cluster state through the [`ClusterApi`]
//! trait. [`KubeClusterApi`] speaks the Kubernetes REST API for the few
//! resources the proxy needs; [`MemoryClusterApi`] backs tests and
//! single-process setups.

mod kube;
mod memory;
mod types;

pub use kube::{KubeClusterApi, KubeConfig};
pub use memory::MemoryClusterApi;
pub use types::{ClusterClaim, ManagedCluster, Secret};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClusterApiError {
    /// The API server rejected the request.
    #[error("cluster api error: {status} {message}")]
    Api { status: u16, message: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("bad server url: {0}")]
    Url(#[from] url::ParseError),

    #[error("cluster configuration: {0}")]
    Config(String),
}

/// The verbs the license proxy needs against a cluster.
///
/// `get_*` return `Ok(None)` for absent objects; absence is a normal
/// branch (create-then-update idiom), not an error.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Stable UID identifying the cluster this API talks to.
    async fn cluster_uid(&self) -> Result<String, ClusterApiError>;

    async fn managed_cluster(&self, name: &str)
        -> Result<Option<ManagedCluster>, ClusterApiError>;

    async fn list_managed_clusters(&self) -> Result<Vec<ManagedCluster>, ClusterApiError>;

    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Secret>, ClusterApiError>;

    /// Create-or-update, keyed on the secret's namespace and name.
    async fn apply_secret(&self, secret: &Secret) -> Result<(), ClusterApiError>;

    async fn get_claim(&self, name: &str) -> Result<Option<ClusterClaim>, ClusterApiError>;

    /// Create-or-update, keyed on the claim name.
    async fn upsert_claim(&self, claim: &ClusterClaim) -> Result<(), ClusterApiError>;
}

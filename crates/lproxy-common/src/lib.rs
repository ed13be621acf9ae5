//! Shared constants and small helpers used across the license proxy.

mod aggregate;
mod duration;

pub use aggregate::Aggregate;
pub use duration::human_duration;

/// Cluster claim carrying the spoke cluster UID.
pub const CLUSTER_CLAIM_CLUSTER_ID: &str = "id.k8s.io";

/// Cluster claim carrying the comma-joined feature list a spoke wants
/// licensed.
pub const CLUSTER_CLAIM_LICENSE: &str = "licenses.appscode.com";

/// Name of the distribution secret on both hub and spoke.
pub const LICENSE_SECRET: &str = "license-proxyserver-licenses";

/// Fallback namespace when neither the environment nor the service
/// account mount names one.
pub const DEFAULT_NAMESPACE: &str = "kubeops";

const POD_NAMESPACE_FILE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

/// Resolves the namespace this process operates in. `NAMESPACE` wins,
/// then the mounted pod namespace, then [`DEFAULT_NAMESPACE`].
pub fn namespace() -> String {
    if let Ok(ns) = std::env::var("NAMESPACE") {
        if !ns.is_empty() {
            return ns;
        }
    }
    if let Ok(ns) = std::fs::read_to_string(POD_NAMESPACE_FILE) {
        let ns = ns.trim();
        if !ns.is_empty() {
            return ns.to_string();
        }
    }
    DEFAULT_NAMESPACE.to_string()
}

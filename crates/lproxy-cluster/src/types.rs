//! Domain types mirroring the cluster objects the proxy reads and writes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A key/value fact a spoke publishes for the hub to read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterClaim {
    pub name: String,
    pub value: String,
}

impl ClusterClaim {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Hub-side representation of a registered spoke.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedCluster {
    pub name: String,
    #[serde(default)]
    pub claims: Vec<ClusterClaim>,
}

impl ManagedCluster {
    /// Value of the named status claim, if published.
    pub fn claim(&self, name: &str) -> Option<&str> {
        self.claims
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.value.as_str())
    }
}

/// A namespaced opaque secret: the distribution channel for license
/// blobs, keyed by plan name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub data: BTreeMap<String, Vec<u8>>,
}

impl Secret {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            data: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_lookup_by_name() {
        let mc = ManagedCluster {
            name: "sp-1".to_string(),
            claims: vec![
                ClusterClaim::new("id.k8s.io", "c-1"),
                ClusterClaim::new("licenses.appscode.com", "f1,f2"),
            ],
        };
        assert_eq!(mc.claim("id.k8s.io"), Some("c-1"));
        assert_eq!(mc.claim("missing"), None);
    }
}

//! Mirrors the hub's distribution secret into the spoke.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use lproxy_cluster::{ClusterApi, Secret};
use lproxy_common::LICENSE_SECRET;
use lproxy_license::{parse_license, IssuerKey};
use lproxy_registry::LicenseRegistry;
use lproxy_watch::{BoxError, Reconciler};

/// Watches the inbound distribution secret on the hub, feeds every entry
/// through the verifier into the registry, and keeps a verbatim local
/// mirror. One bad entry never blocks the others.
pub struct LicenseSyncer {
    pub hub: Arc<dyn ClusterApi>,
    pub spoke: Arc<dyn ClusterApi>,
    /// Namespace of the secret on the hub: the spoke's cluster name.
    pub hub_namespace: String,
    /// Namespace of the local mirror.
    pub local_namespace: String,
    pub cluster_uid: String,
    pub issuer: IssuerKey,
    pub registry: Arc<LicenseRegistry>,
}

#[async_trait]
impl Reconciler for LicenseSyncer {
    async fn reconcile(&self, _key: &str) -> Result<Option<Duration>, BoxError> {
        let Some(src) = self.hub.get_secret(&self.hub_namespace, LICENSE_SECRET).await? else {
            // Nothing distributed yet.
            return Ok(None);
        };

        for (plan, blob) in &src.data {
            match parse_license(&self.cluster_uid, &self.issuer, blob) {
                Ok(license) => {
                    tracing::info!(license = %license.id, plan = %plan, "synced license from hub");
                    self.registry.add(license, None);
                }
                Err(e) => {
                    tracing::warn!(plan = %plan, error = %e, "skipping undecodable secret entry");
                }
            }
        }

        let dst = self
            .spoke
            .get_secret(&self.local_namespace, LICENSE_SECRET)
            .await?;
        let unchanged = dst.as_ref().map(|d| d.data == src.data).unwrap_or(false);
        if !unchanged {
            let mut mirror = Secret::new(self.local_namespace.clone(), LICENSE_SECRET);
            mirror.data = src.data.clone();
            self.spoke.apply_secret(&mirror).await?;
            tracing::info!(
                namespace = %self.local_namespace,
                entries = mirror.data.len(),
                "updated local license secret"
            );
        }

        Ok(None)
    }
}

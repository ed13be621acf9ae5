//! Per-cluster license acquisition and distribution.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;

use lproxy_client::UpstreamClient;
use lproxy_cluster::{ClusterApi, Secret};
use lproxy_common::{Aggregate, CLUSTER_CLAIM_CLUSTER_ID, CLUSTER_CLAIM_LICENSE, LICENSE_SECRET};
use lproxy_license::{parse_license, Contract, IssuerKey, License, LicenseError, LicenseStatus};
use lproxy_registry::{LicenseRegistry, LICENSE_ACQUISITION_BUFFER, MIN_REMAINING_LIFE};
use lproxy_watch::{BoxError, Reconciler};

/// Refresh horizon for hub-held licenses: re-acquisition starts this far
/// before expiry.
pub fn ttl() -> Duration {
    LICENSE_ACQUISITION_BUFFER + MIN_REMAINING_LIFE
}

/// Reconciles one managed cluster: acquires a license per claimed
/// feature and writes the distribution secret into the cluster's
/// namespace.
pub struct LicenseAcquirer {
    hub: Arc<dyn ClusterApi>,
    base_url: String,
    token: String,
    ca_bundle: Option<Vec<u8>>,
    insecure_skip_tls_verify: bool,
    issuer: IssuerKey,
    cache_dir: PathBuf,
    /// cluster uid -> its registry, lazily created.
    registries: Mutex<HashMap<String, Arc<LicenseRegistry>>>,
}

impl LicenseAcquirer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        hub: Arc<dyn ClusterApi>,
        base_url: String,
        token: String,
        ca_bundle: Option<Vec<u8>>,
        insecure_skip_tls_verify: bool,
        issuer: IssuerKey,
        cache_dir: PathBuf,
    ) -> Self {
        Self {
            hub,
            base_url,
            token,
            ca_bundle,
            insecure_skip_tls_verify,
            issuer,
            cache_dir,
            registries: Mutex::new(HashMap::new()),
        }
    }

    fn registry_for(&self, cluster_uid: &str) -> Result<Arc<LicenseRegistry>, BoxError> {
        let mut registries = self.registries.lock();
        if let Some(registry) = registries.get(cluster_uid) {
            return Ok(Arc::clone(registry));
        }
        let dir = self.cache_dir.join(cluster_uid);
        std::fs::create_dir_all(&dir)?;
        let registry = Arc::new(LicenseRegistry::new(Some(dir), ttl(), None));
        registries.insert(cluster_uid.to_string(), Arc::clone(&registry));
        Ok(registry)
    }

    async fn acquire_one(
        &self,
        client: &UpstreamClient,
        cluster_uid: &str,
        feature: &str,
    ) -> Result<(License, Option<Contract>), AcquireFailure> {
        let (blob, contract) = client
            .acquire_license(&[feature.to_string()])
            .await
            .map_err(|e| AcquireFailure::Other(e.into()))?;
        match parse_license(cluster_uid, &self.issuer, &blob) {
            Ok(license) => Ok((license, contract)),
            Err(e) if e.is_certificate_invalid() => Err(AcquireFailure::CertificateInvalid(e)),
            Err(e) => Err(AcquireFailure::Other(e.into())),
        }
    }

    async fn reconcile_cluster(
        &self,
        cluster_name: &str,
        cluster_uid: &str,
        features: &[String],
    ) -> Result<Option<Duration>, BoxError> {
        tracing::info!(cluster = %cluster_name, cluster_uid = %cluster_uid, "refreshing licenses");

        let registry = self.registry_for(cluster_uid)?;
        let mut secret = self
            .hub
            .get_secret(cluster_name, LICENSE_SECRET)
            .await?
            .unwrap_or_else(|| Secret::new(cluster_name, LICENSE_SECRET));

        let client = UpstreamClient::new(
            &self.base_url,
            &self.token,
            cluster_uid,
            self.ca_bundle.as_deref(),
            self.insecure_skip_tls_verify,
            &format!("license-proxyserver-manager/{}", env!("CARGO_PKG_VERSION")),
        )?;

        let mut errors = Aggregate::new();
        let mut earliest: Option<DateTime<Utc>> = None;

        for feature in features {
            let license = match registry.license_for_feature(feature) {
                Some(license) => Some(license),
                None => match self.acquire_one(&client, cluster_uid, feature).await {
                    Ok((license, contract)) => {
                        tracing::info!(
                            cluster = %cluster_name,
                            cluster_uid = %cluster_uid,
                            license = %license.id,
                            product = %license.product_line,
                            plan = %license.plan,
                            expiry = %license.not_after,
                            "acquired new license"
                        );
                        let held = Arc::new(license.clone());
                        registry.add(license, contract);
                        Some(held)
                    }
                    Err(AcquireFailure::CertificateInvalid(e)) => {
                        // Permanent for this feature until the claim changes.
                        tracing::warn!(feature = %feature, error = %e, "skipping invalid license");
                        None
                    }
                    Err(AcquireFailure::Other(e)) => {
                        tracing::warn!(feature = %feature, error = %e, "failed to get new license");
                        errors.push(e);
                        None
                    }
                },
            };

            if let Some(license) = license {
                if license.status == LicenseStatus::Active {
                    secret
                        .data
                        .insert(license.plan.clone(), license.data.clone());
                    if earliest.map(|e| e > license.not_after).unwrap_or(true) {
                        earliest = Some(license.not_after);
                    }
                }
            }
        }

        errors.extend_from(self.hub.apply_secret(&secret).await);

        let requeue = earliest.map(|expiry| {
            let ttl = TimeDelta::from_std(ttl()).unwrap_or(TimeDelta::MAX);
            (expiry - ttl - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO)
        });

        match errors.into_result() {
            Ok(()) => Ok(requeue),
            Err(errors) => Err(Box::new(errors)),
        }
    }
}

enum AcquireFailure {
    CertificateInvalid(LicenseError),
    Other(BoxError),
}

#[async_trait]
impl Reconciler for LicenseAcquirer {
    async fn reconcile(&self, key: &str) -> Result<Option<Duration>, BoxError> {
        let Some(cluster) = self.hub.managed_cluster(key).await? else {
            return Ok(None);
        };

        let cluster_uid = cluster.claim(CLUSTER_CLAIM_CLUSTER_ID).unwrap_or_default();
        let features: Vec<String> = cluster
            .claim(CLUSTER_CLAIM_LICENSE)
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(str::to_string)
            .collect();
        if cluster_uid.is_empty() || features.is_empty() {
            return Ok(None);
        }

        self.reconcile_cluster(&cluster.name, cluster_uid, &features)
            .await
    }
}

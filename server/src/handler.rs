//! The license request path.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use lproxy_client::{ClientError, UpstreamClient};
use lproxy_cluster::{ClusterApi, ClusterApiError, ClusterClaim};
use lproxy_common::CLUSTER_CLAIM_LICENSE;
use lproxy_license::{parse_license, Contract, IssuerKey, LicenseError};
use lproxy_registry::{LicenseRegistry, RecordBook, UserIdentity};

/// A request for a license covering any of the listed features, in
/// preference order.
#[derive(Debug, Clone, Deserialize)]
pub struct LicenseRequest {
    pub features: Vec<String>,
}

/// The response blob. An entirely empty response is a success on a spoke
/// with no local license yet: the hub acquires on the spoke's behalf and
/// the caller retries.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LicenseResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract: Option<Contract>,
}

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("missing user info")]
    MissingUser,

    #[error("features list must not be empty")]
    NoFeatures,

    #[error("license acquisition failed: {0}")]
    Upstream(#[from] ClientError),

    #[error("acquired license failed verification: {0}")]
    Verify(#[from] LicenseError),

    #[error("cluster claim update failed: {0}")]
    Claim(#[from] ClusterApiError),

    #[error("no local license and no license source configured")]
    NoSource,
}

impl RequestError {
    /// Input errors map to `BadRequest`; everything else is internal.
    pub fn is_bad_request(&self) -> bool {
        matches!(self, RequestError::MissingUser | RequestError::NoFeatures)
    }
}

/// Serves `licenserequests`: registry first, upstream on miss, cluster
/// claim as the last resort on a spoke.
pub struct RequestHandler {
    cluster_uid: String,
    issuer: IssuerKey,
    registry: Arc<LicenseRegistry>,
    record_book: Arc<RecordBook>,
    upstream: Option<UpstreamClient>,
    /// The spoke's own cluster, used to publish the license claim when
    /// no upstream client is configured.
    claims: Option<Arc<dyn ClusterApi>>,
}

impl RequestHandler {
    pub fn new(
        cluster_uid: String,
        issuer: IssuerKey,
        registry: Arc<LicenseRegistry>,
        record_book: Arc<RecordBook>,
        upstream: Option<UpstreamClient>,
        claims: Option<Arc<dyn ClusterApi>>,
    ) -> Self {
        Self {
            cluster_uid,
            issuer,
            registry,
            record_book,
            upstream,
            claims,
        }
    }

    pub async fn handle(
        &self,
        user: Option<UserIdentity>,
        request: &LicenseRequest,
    ) -> Result<LicenseResponse, RequestError> {
        let user = user.ok_or(RequestError::MissingUser)?;
        if request.features.is_empty() {
            return Err(RequestError::NoFeatures);
        }
        tracing::info!(
            user = %user.username,
            features = ?request.features,
            "serving license request"
        );

        // First feature with a live license decides the result.
        for feature in &request.features {
            if let Some(license) = self.registry.license_for_feature(feature) {
                let contract = self
                    .registry
                    .get(&license.id)
                    .and_then(|record| record.contract);
                self.record_book
                    .record(&license.id, &request.features.join(","), user);
                return Ok(LicenseResponse {
                    license: Some(String::from_utf8_lossy(&license.data).into_owned()),
                    contract,
                });
            }
        }

        if let Some(upstream) = &self.upstream {
            let (blob, contract) = upstream.acquire_license(&request.features).await?;
            let license = parse_license(&self.cluster_uid, &self.issuer, &blob)?;
            tracing::info!(
                license = %license.id,
                product = %license.product_line,
                plan = %license.plan,
                expiry = %license.not_after,
                "acquired license from upstream"
            );
            let id = license.id.clone();
            let data = license.data.clone();
            self.registry.add(license, contract.clone());
            self.record_book
                .record(&id, &request.features.join(","), user);
            return Ok(LicenseResponse {
                license: Some(String::from_utf8_lossy(&data).into_owned()),
                contract,
            });
        }

        if let Some(claims) = &self.claims {
            let current = claims.get_claim(CLUSTER_CLAIM_LICENSE).await?;
            let value = merge_features(
                current.as_ref().map(|c| c.value.as_str()),
                &request.features,
            );
            claims
                .upsert_claim(&ClusterClaim::new(CLUSTER_CLAIM_LICENSE, value.clone()))
                .await?;
            tracing::info!(claim = %value, "no local license, updated cluster claim for hub");
            return Ok(LicenseResponse::default());
        }

        Err(RequestError::NoSource)
    }
}

/// Union of the claim's current features and the requested ones:
/// deduplicated, sorted, comma-joined.
fn merge_features(current: Option<&str>, requested: &[String]) -> String {
    let mut set: BTreeSet<String> = current
        .into_iter()
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .collect();
    set.extend(
        requested
            .iter()
            .map(|f| f.trim())
            .filter(|f| !f.is_empty())
            .map(str::to_string),
    );
    set.into_iter().collect::<Vec<_>>().join(",")
}

//! Hub reconciliation against an in-memory cluster and a mock upstream.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{TimeDelta, Utc};
use ed25519_dalek::{Signer, SigningKey};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use licenseproxy_manager::acquirer::{ttl, LicenseAcquirer};
use lproxy_cluster::{ClusterApi, ClusterClaim, ManagedCluster, MemoryClusterApi};
use lproxy_common::LICENSE_SECRET;
use lproxy_license::IssuerKey;
use lproxy_watch::Reconciler;

fn signing_key() -> SigningKey {
    SigningKey::from_bytes(&[7u8; 32])
}

fn issuer() -> IssuerKey {
    IssuerKey::from_bytes(&signing_key().verifying_key().to_bytes()).unwrap()
}

fn mint(id: &str, cluster: &str, plan: &str, features: &[&str], hours: i64) -> String {
    let now = Utc::now();
    let payload = serde_json::json!({
        "id": id,
        "cluster": cluster,
        "product_line": "kubedb",
        "plan": plan,
        "features": features,
        "not_before": now - TimeDelta::hours(1),
        "not_after": now + TimeDelta::hours(hours),
        "status": "active",
    });
    let payload_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&payload).unwrap());
    let sig = signing_key().sign(payload_b64.as_bytes());
    format!("{payload_b64}.{}", URL_SAFE_NO_PAD.encode(sig.to_bytes()))
}

fn hub_with_cluster(features: &str) -> Arc<MemoryClusterApi> {
    let hub = Arc::new(MemoryClusterApi::new("hub"));
    hub.insert_managed_cluster(ManagedCluster {
        name: "sp-1".to_string(),
        claims: vec![
            ClusterClaim::new("id.k8s.io", "c-1"),
            ClusterClaim::new("licenses.appscode.com", features),
        ],
    });
    hub
}

fn acquirer(
    hub: &Arc<MemoryClusterApi>,
    base_url: &str,
    cache_dir: &std::path::Path,
) -> LicenseAcquirer {
    LicenseAcquirer::new(
        hub.clone() as Arc<dyn ClusterApi>,
        base_url.to_string(),
        "tok".to_string(),
        None,
        false,
        issuer(),
        cache_dir.to_path_buf(),
    )
}

#[tokio::test]
async fn distributes_licenses_and_schedules_refresh() {
    let server = MockServer::start().await;
    let lic1 = mint("lic-1", "c-1", "plan-1", &["f1"], 24);
    let lic2 = mint("lic-2", "c-1", "plan-2", &["f2"], 48);
    Mock::given(method("POST"))
        .and(path("/api/v1/licenses/acquire"))
        .and(body_partial_json(serde_json::json!({"features": ["f1"]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"license": lic1})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/licenses/acquire"))
        .and(body_partial_json(serde_json::json!({"features": ["f2"]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"license": lic2})))
        .expect(1)
        .mount(&server)
        .await;

    let hub = hub_with_cluster("f1,f2");
    let cache = tempfile::tempdir().unwrap();
    let acquirer = acquirer(&hub, &server.uri(), cache.path());

    let requeue = acquirer.reconcile("sp-1").await.unwrap().unwrap();

    // Both plans land in the distribution secret, verbatim.
    let secret = hub.secret("sp-1", LICENSE_SECRET).unwrap();
    assert_eq!(secret.data.len(), 2);
    assert_eq!(secret.data["plan-1"], lic1.as_bytes());
    assert_eq!(secret.data["plan-2"], lic2.as_bytes());

    // Next run lands TTL before the earliest expiry (lic-1 at +24h).
    let expected = Duration::from_secs(24 * 3600) - ttl();
    let delta = requeue.as_secs().abs_diff(expected.as_secs());
    assert!(delta < 60, "requeue {requeue:?}, expected around {expected:?}");

    // The per-cluster cache holds both blobs for restart recovery.
    assert!(cache.path().join("c-1").join("lic-1").exists());
    assert!(cache.path().join("c-1").join("lic-2").exists());

    // A second pass reuses the registry; the mocks only allow one call each.
    let requeue = acquirer.reconcile("sp-1").await.unwrap();
    assert!(requeue.is_some());
}

#[tokio::test]
async fn invalid_certificate_is_skipped_without_error() {
    let server = MockServer::start().await;
    // Bound to a different cluster: permanently invalid for c-1.
    let foreign = mint("lic-X", "c-9", "plan-x", &["f1"], 24);
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"license": foreign})),
        )
        .mount(&server)
        .await;

    let hub = hub_with_cluster("f1");
    let cache = tempfile::tempdir().unwrap();
    let acquirer = acquirer(&hub, &server.uri(), cache.path());

    // No license kept: no requeue, but also no error to retry on.
    let requeue = acquirer.reconcile("sp-1").await.unwrap();
    assert!(requeue.is_none());
    assert!(hub.secret("sp-1", LICENSE_SECRET).unwrap().data.is_empty());
}

#[tokio::test]
async fn transport_errors_propagate_for_backoff() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let hub = hub_with_cluster("f1");
    let cache = tempfile::tempdir().unwrap();
    let acquirer = acquirer(&hub, &server.uri(), cache.path());

    let err = acquirer.reconcile("sp-1").await.unwrap_err();
    assert!(err.to_string().contains("503"));
    // The secret write still happened; it is just empty for now.
    assert!(hub.secret("sp-1", LICENSE_SECRET).is_some());
}

#[tokio::test]
async fn clusters_without_claims_are_ignored() {
    let hub = Arc::new(MemoryClusterApi::new("hub"));
    hub.insert_managed_cluster(ManagedCluster {
        name: "sp-2".to_string(),
        claims: vec![ClusterClaim::new("id.k8s.io", "c-2")],
    });
    let cache = tempfile::tempdir().unwrap();
    let acquirer = acquirer(&hub, "https://unused.example.com", cache.path());

    assert!(acquirer.reconcile("sp-2").await.unwrap().is_none());
    assert!(acquirer.reconcile("absent").await.unwrap().is_none());
    assert!(hub.secret("sp-2", LICENSE_SECRET).is_none());
}

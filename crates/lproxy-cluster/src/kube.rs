//! Kubernetes REST implementation of [`ClusterApi`].
//!
//! Speaks plain HTTPS to the API server for the handful of resources the
//! proxy touches: namespaces (cluster UID), managed clusters, cluster
//! claims and secrets. Requests are throttled by a token bucket when a
//! qps limit is configured.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use parking_lot::Mutex;
use reqwest::{header, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::types::{ClusterClaim, ManagedCluster, Secret};
use crate::{ClusterApi, ClusterApiError};

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";
const MANAGED_CLUSTERS: &str = "/apis/cluster.open-cluster-management.io/v1/managedclusters";
const CLUSTER_CLAIMS: &str = "/apis/cluster.open-cluster-management.io/v1alpha1/clusterclaims";

/// Connection settings for one API server.
#[derive(Debug, Clone)]
pub struct KubeConfig {
    pub server: String,
    pub token: Option<String>,
    pub ca_bundle: Option<Vec<u8>>,
    pub insecure_skip_tls_verify: bool,
}

impl KubeConfig {
    /// Loads the subset of a kubeconfig file the proxy understands:
    /// first cluster (server, CA, insecure flag) and first user (token,
    /// optionally from a token file).
    pub fn from_kubeconfig(path: &Path) -> Result<Self, ClusterApiError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ClusterApiError::Config(format!("reading kubeconfig {}: {e}", path.display()))
        })?;
        let file: KubeconfigFile = serde_yaml::from_str(&raw)
            .map_err(|e| ClusterApiError::Config(format!("parsing kubeconfig: {e}")))?;

        let cluster = file
            .clusters
            .into_iter()
            .next()
            .ok_or_else(|| ClusterApiError::Config("kubeconfig has no clusters".to_string()))?
            .cluster;
        let user = file.users.into_iter().next().map(|u| u.user);

        let ca_bundle = match (&cluster.certificate_authority_data, &cluster.certificate_authority)
        {
            (Some(data), _) => Some(STANDARD.decode(data).map_err(|e| {
                ClusterApiError::Config(format!("decoding certificate-authority-data: {e}"))
            })?),
            (None, Some(file)) => Some(std::fs::read(file).map_err(|e| {
                ClusterApiError::Config(format!("reading certificate-authority {file}: {e}"))
            })?),
            (None, None) => None,
        };

        let token = match user {
            Some(UserEntry {
                token: Some(token), ..
            }) => Some(token),
            Some(UserEntry {
                token_file: Some(file),
                ..
            }) => Some(
                std::fs::read_to_string(&file)
                    .map_err(|e| {
                        ClusterApiError::Config(format!("reading token file {file}: {e}"))
                    })?
                    .trim()
                    .to_string(),
            ),
            _ => None,
        };

        Ok(Self {
            server: cluster.server,
            token,
            ca_bundle,
            insecure_skip_tls_verify: cluster.insecure_skip_tls_verify,
        })
    }

    /// Builds the in-cluster configuration from the service account
    /// mount and the `KUBERNETES_SERVICE_*` environment.
    pub fn in_cluster() -> Result<Self, ClusterApiError> {
        let host = std::env::var("KUBERNETES_SERVICE_HOST")
            .map_err(|_| ClusterApiError::Config("KUBERNETES_SERVICE_HOST not set".to_string()))?;
        let port = std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".to_string());
        let dir = Path::new(SERVICE_ACCOUNT_DIR);
        let token = std::fs::read_to_string(dir.join("token"))
            .map_err(|e| ClusterApiError::Config(format!("reading service account token: {e}")))?;
        let ca_bundle = std::fs::read(dir.join("ca.crt"))
            .map_err(|e| ClusterApiError::Config(format!("reading service account CA: {e}")))?;
        Ok(Self {
            server: format!("https://{host}:{port}"),
            token: Some(token.trim().to_string()),
            ca_bundle: Some(ca_bundle),
            insecure_skip_tls_verify: false,
        })
    }
}

/// Token bucket guarding API-server calls.
struct RateGate {
    bucket: Mutex<Bucket>,
}

struct Bucket {
    available: f64,
    max: f64,
    qps: f64,
    last_refill: Instant,
}

impl RateGate {
    fn new(qps: f64, burst: u32) -> Self {
        Self {
            bucket: Mutex::new(Bucket {
                available: burst as f64,
                max: burst as f64,
                qps,
                last_refill: Instant::now(),
            }),
        }
    }

    async fn acquire(&self) {
        loop {
            let wait = {
                let mut b = self.bucket.lock();
                let now = Instant::now();
                let elapsed = now.duration_since(b.last_refill).as_secs_f64();
                b.available = (b.available + elapsed * b.qps).min(b.max);
                b.last_refill = now;
                if b.available >= 1.0 {
                    b.available -= 1.0;
                    None
                } else {
                    Some(Duration::from_secs_f64((1.0 - b.available) / b.qps))
                }
            };
            match wait {
                None => return,
                Some(d) => tokio::time::sleep(d).await,
            }
        }
    }
}

pub struct KubeClusterApi {
    http: reqwest::Client,
    base: Url,
    gate: Option<RateGate>,
}

impl KubeClusterApi {
    pub fn new(config: KubeConfig) -> Result<Self, ClusterApiError> {
        let base = Url::parse(&config.server)?;

        let mut headers = header::HeaderMap::new();
        if let Some(token) = &config.token {
            let mut auth = header::HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| ClusterApiError::Config("token contains invalid bytes".to_string()))?;
            auth.set_sensitive(true);
            headers.insert(header::AUTHORIZATION, auth);
        }

        let mut builder = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30));
        if let Some(pem) = &config.ca_bundle {
            builder = builder.add_root_certificate(reqwest::Certificate::from_pem(pem)?);
        }
        if config.insecure_skip_tls_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        Ok(Self {
            http: builder.build()?,
            base,
            gate: None,
        })
    }

    /// Throttle API-server calls to `qps` with the given burst.
    pub fn with_rate_limit(mut self, qps: f64, burst: u32) -> Self {
        if qps > 0.0 {
            self.gate = Some(RateGate::new(qps, burst.max(1)));
        }
        self
    }

    async fn throttled(&self) {
        if let Some(gate) = &self.gate {
            gate.acquire().await;
        }
    }

    async fn get_opt<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, ClusterApiError> {
        self.throttled().await;
        let url = self.base.join(path)?;
        let resp = self.http.get(url).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = check(resp).await?;
        Ok(Some(resp.json().await?))
    }

    async fn post_json<B: Serialize>(&self, path: &str, body: &B) -> Result<(), ClusterApiError> {
        self.throttled().await;
        let url = self.base.join(path)?;
        let resp = self.http.post(url).json(body).send().await?;
        check(resp).await.map(|_| ())
    }

    async fn put_json<B: Serialize>(&self, path: &str, body: &B) -> Result<(), ClusterApiError> {
        self.throttled().await;
        let url = self.base.join(path)?;
        let resp = self.http.put(url).json(body).send().await?;
        check(resp).await.map(|_| ())
    }
}

async fn check(resp: reqwest::Response) -> Result<reqwest::Response, ClusterApiError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let message = match resp.json::<StatusMessage>().await {
        Ok(body) => body.message,
        Err(_) => status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string(),
    };
    Err(ClusterApiError::Api {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn cluster_uid(&self) -> Result<String, ClusterApiError> {
        let ns: NamespaceManifest = self
            .get_opt("/api/v1/namespaces/kube-system")
            .await?
            .ok_or_else(|| ClusterApiError::Config("kube-system namespace missing".to_string()))?;
        ns.metadata
            .uid
            .ok_or_else(|| ClusterApiError::Config("kube-system namespace has no uid".to_string()))
    }

    async fn managed_cluster(
        &self,
        name: &str,
    ) -> Result<Option<ManagedCluster>, ClusterApiError> {
        let manifest: Option<ManagedClusterManifest> =
            self.get_opt(&format!("{MANAGED_CLUSTERS}/{name}")).await?;
        Ok(manifest.map(ManagedClusterManifest::into_domain))
    }

    async fn list_managed_clusters(&self) -> Result<Vec<ManagedCluster>, ClusterApiError> {
        let list: Option<ListManifest<ManagedClusterManifest>> =
            self.get_opt(MANAGED_CLUSTERS).await?;
        Ok(list
            .map(|l| {
                l.items
                    .into_iter()
                    .map(ManagedClusterManifest::into_domain)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Secret>, ClusterApiError> {
        let manifest: Option<SecretManifest> = self
            .get_opt(&format!("/api/v1/namespaces/{namespace}/secrets/{name}"))
            .await?;
        manifest.map(SecretManifest::into_domain).transpose()
    }

    async fn apply_secret(&self, secret: &Secret) -> Result<(), ClusterApiError> {
        let path = format!(
            "/api/v1/namespaces/{}/secrets/{}",
            secret.namespace, secret.name
        );
        let existing: Option<SecretManifest> = self.get_opt(&path).await?;
        let mut manifest = SecretManifest::from_domain(secret);
        match existing {
            Some(prev) => {
                manifest.metadata.resource_version = prev.metadata.resource_version;
                self.put_json(&path, &manifest).await
            }
            None => {
                self.post_json(
                    &format!("/api/v1/namespaces/{}/secrets", secret.namespace),
                    &manifest,
                )
                .await
            }
        }
    }

    async fn get_claim(&self, name: &str) -> Result<Option<ClusterClaim>, ClusterApiError> {
        let manifest: Option<ClusterClaimManifest> =
            self.get_opt(&format!("{CLUSTER_CLAIMS}/{name}")).await?;
        Ok(manifest.map(|m| ClusterClaim::new(m.metadata.name, m.spec.value)))
    }

    async fn upsert_claim(&self, claim: &ClusterClaim) -> Result<(), ClusterApiError> {
        let path = format!("{CLUSTER_CLAIMS}/{}", claim.name);
        let existing: Option<ClusterClaimManifest> = self.get_opt(&path).await?;
        let mut manifest = ClusterClaimManifest::from_domain(claim);
        match existing {
            Some(prev) => {
                manifest.metadata.resource_version = prev.metadata.resource_version;
                self.put_json(&path, &manifest).await
            }
            None => self.post_json(CLUSTER_CLAIMS, &manifest).await,
        }
    }
}

// ---------------------------------------------------------------------------
// Wire formats

#[derive(Deserialize)]
struct KubeconfigFile {
    #[serde(default)]
    clusters: Vec<NamedCluster>,
    #[serde(default)]
    users: Vec<NamedUser>,
}

#[derive(Deserialize)]
struct NamedCluster {
    #[allow(dead_code)]
    name: String,
    cluster: ClusterEntry,
}

#[derive(Deserialize)]
struct ClusterEntry {
    server: String,
    #[serde(rename = "certificate-authority-data")]
    certificate_authority_data: Option<String>,
    #[serde(rename = "certificate-authority")]
    certificate_authority: Option<String>,
    #[serde(rename = "insecure-skip-tls-verify", default)]
    insecure_skip_tls_verify: bool,
}

#[derive(Deserialize)]
struct NamedUser {
    #[allow(dead_code)]
    name: String,
    user: UserEntry,
}

#[derive(Deserialize)]
struct UserEntry {
    token: Option<String>,
    #[serde(rename = "tokenFile")]
    token_file: Option<String>,
}

#[derive(Deserialize)]
struct StatusMessage {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ObjectMeta {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    uid: Option<String>,
    #[serde(
        rename = "resourceVersion",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    resource_version: Option<String>,
}

#[derive(Deserialize)]
struct NamespaceManifest {
    metadata: ObjectMeta,
}

#[derive(Deserialize)]
struct ListManifest<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Serialize, Deserialize)]
struct SecretManifest {
    #[serde(rename = "apiVersion")]
    api_version: String,
    kind: String,
    metadata: ObjectMeta,
    #[serde(default)]
    data: BTreeMap<String, String>,
}

impl SecretManifest {
    fn from_domain(secret: &Secret) -> Self {
        Self {
            api_version: "v1".to_string(),
            kind: "Secret".to_string(),
            metadata: ObjectMeta {
                name: secret.name.clone(),
                namespace: Some(secret.namespace.clone()),
                ..ObjectMeta::default()
            },
            data: secret
                .data
                .iter()
                .map(|(k, v)| (k.clone(), STANDARD.encode(v)))
                .collect(),
        }
    }

    fn into_domain(self) -> Result<Secret, ClusterApiError> {
        let mut data = BTreeMap::new();
        for (k, v) in self.data {
            let decoded = STANDARD.decode(&v).map_err(|e| {
                ClusterApiError::Config(format!("secret key {k} is not valid base64: {e}"))
            })?;
            data.insert(k, decoded);
        }
        Ok(Secret {
            namespace: self.metadata.namespace.unwrap_or_default(),
            name: self.metadata.name,
            data,
        })
    }
}

#[derive(Deserialize)]
struct ManagedClusterManifest {
    metadata: ObjectMeta,
    #[serde(default)]
    status: ManagedClusterStatus,
}

#[derive(Default, Deserialize)]
struct ManagedClusterStatus {
    #[serde(rename = "clusterClaims", default)]
    cluster_claims: Vec<ClusterClaim>,
}

impl ManagedClusterManifest {
    fn into_domain(self) -> ManagedCluster {
        ManagedCluster {
            name: self.metadata.name,
            claims: self.status.cluster_claims,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct ClusterClaimManifest {
    #[serde(rename = "apiVersion")]
    api_version: String,
    kind: String,
    metadata: ObjectMeta,
    spec: ClaimSpec,
}

#[derive(Serialize, Deserialize)]
struct ClaimSpec {
    value: String,
}

impl ClusterClaimManifest {
    fn from_domain(claim: &ClusterClaim) -> Self {
        Self {
            api_version: "cluster.open-cluster-management.io/v1alpha1".to_string(),
            kind: "ClusterClaim".to_string(),
            metadata: ObjectMeta {
                name: claim.name.clone(),
                ..ObjectMeta::default()
            },
            spec: ClaimSpec {
                value: claim.value.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn kubeconfig_subset_parses() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "apiVersion: v1\n\
             kind: Config\n\
             clusters:\n\
             - name: hub\n\
             \x20 cluster:\n\
             \x20   server: https://hub.example.com:6443\n\
             \x20   certificate-authority-data: {}\n\
             users:\n\
             - name: agent\n\
             \x20 user:\n\
             \x20   token: sekrit\n",
            STANDARD.encode("fake-ca-pem")
        )
        .unwrap();

        let config = KubeConfig::from_kubeconfig(file.path()).unwrap();
        assert_eq!(config.server, "https://hub.example.com:6443");
        assert_eq!(config.token.as_deref(), Some("sekrit"));
        assert_eq!(config.ca_bundle.as_deref(), Some(b"fake-ca-pem".as_ref()));
        assert!(!config.insecure_skip_tls_verify);
    }

    #[test]
    fn secret_manifest_round_trip() {
        let mut secret = Secret::new("sp-1", "license-proxyserver-licenses");
        secret
            .data
            .insert("kubedb-enterprise".to_string(), b"blob".to_vec());

        let manifest = SecretManifest::from_domain(&secret);
        assert_eq!(manifest.data["kubedb-enterprise"], STANDARD.encode(b"blob"));

        let back = manifest.into_domain().unwrap();
        assert_eq!(back, secret);
    }

    #[test]
    fn managed_cluster_claims_deserialize() {
        let json = serde_json::json!({
            "metadata": {"name": "sp-1"},
            "status": {"clusterClaims": [
                {"name": "id.k8s.io", "value": "c-1"},
                {"name": "licenses.appscode.com", "value": "f1,f2"},
            ]}
        });
        let manifest: ManagedClusterManifest = serde_json::from_value(json).unwrap();
        let mc = manifest.into_domain();
        assert_eq!(mc.claim("id.k8s.io"), Some("c-1"));
        assert_eq!(mc.claim("licenses.appscode.com"), Some("f1,f2"));
    }
}

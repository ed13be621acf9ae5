//! Client for the upstream license-issuing service.
//!
//! The upstream issues signed license blobs for a cluster on demand. This
//! client only acquires; verification happens at the call site so the
//! caller controls the trusted issuer key.

use std::time::Duration;

use reqwest::{header, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use lproxy_license::Contract;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ClientError {
    /// The upstream answered with a non-success status.
    #[error("license server error: {status} {message}")]
    Api { status: u16, message: String },

    /// Transport-level failure.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("bad base url: {0}")]
    Url(#[from] url::ParseError),

    #[error("client configuration: {0}")]
    Config(String),
}

impl ClientError {
    /// Transport failures and 5xx answers are worth retrying; anything
    /// the server rejected outright is not.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Api { status, .. } => *status >= 500,
            ClientError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }
}

#[derive(Serialize)]
struct AcquireRequest<'a> {
    cluster: &'a str,
    features: &'a [String],
}

#[derive(Deserialize)]
struct AcquireResponse {
    license: String,
    #[serde(default)]
    contract: Option<Contract>,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    message: String,
}

/// Client bound to one cluster UID and one bearer token.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: Url,
    cluster_uid: String,
}

impl UpstreamClient {
    pub fn new(
        base_url: &str,
        token: &str,
        cluster_uid: &str,
        ca_bundle: Option<&[u8]>,
        insecure_skip_verify: bool,
        user_agent: &str,
    ) -> Result<Self, ClientError> {
        let base_url = Url::parse(base_url)?;

        let mut headers = header::HeaderMap::new();
        let mut auth = header::HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| ClientError::Config("token contains invalid header bytes".to_string()))?;
        auth.set_sensitive(true);
        headers.insert(header::AUTHORIZATION, auth);
        headers.insert(
            header::USER_AGENT,
            header::HeaderValue::from_str(user_agent)
                .map_err(|_| ClientError::Config("invalid user agent".to_string()))?,
        );

        let mut builder = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(DEFAULT_TIMEOUT);
        if let Some(pem) = ca_bundle {
            let cert = reqwest::Certificate::from_pem(pem)?;
            builder = builder.add_root_certificate(cert);
        }
        if insecure_skip_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        Ok(Self {
            http: builder.build()?,
            base_url,
            cluster_uid: cluster_uid.to_string(),
        })
    }

    pub fn cluster_uid(&self) -> &str {
        &self.cluster_uid
    }

    /// Requests a license covering `features`. Returns the raw blob plus
    /// the optional contract the upstream attached.
    pub async fn acquire_license(
        &self,
        features: &[String],
    ) -> Result<(Vec<u8>, Option<Contract>), ClientError> {
        let url = self.base_url.join("api/v1/licenses/acquire")?;
        let response = self
            .http
            .post(url)
            .json(&AcquireRequest {
                cluster: &self.cluster_uid,
                features,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = match response.json::<ApiErrorBody>().await {
                Ok(body) => body.message,
                Err(_) => StatusCode::from_u16(status.as_u16())
                    .ok()
                    .and_then(|s| s.canonical_reason())
                    .unwrap_or("request failed")
                    .to_string(),
            };
            return Err(ClientError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: AcquireResponse = response.json().await?;
        Ok((body.license.into_bytes(), body.contract))
    }
}

//! Envelope parsing and signature verification.

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::Deserialize;

use crate::error::LicenseError;
use crate::license::{License, LicenseStatus};

/// The trusted issuer public key licenses must verify against.
#[derive(Debug, Clone)]
pub struct IssuerKey(VerifyingKey);

impl IssuerKey {
    /// Parses issuer key material: PEM (`BEGIN PUBLIC KEY`) or bare
    /// base64 text. DER SPKI wrapping is tolerated. Raw key bytes go
    /// through [`IssuerKey::from_bytes`].
    pub fn from_pem(data: &[u8]) -> Result<Self, LicenseError> {
        let text = std::str::from_utf8(data)
            .map_err(|_| LicenseError::InvalidIssuerKey("key is not UTF-8".to_string()))?;
        let body: String = text
            .lines()
            .filter(|line| !line.starts_with("-----"))
            .map(str::trim)
            .collect();
        let bytes = if body.is_empty() {
            data.to_vec()
        } else {
            STANDARD
                .decode(body.as_bytes())
                .map_err(|e| LicenseError::InvalidIssuerKey(format!("bad base64: {e}")))?
        };
        Self::from_bytes(&bytes)
    }

    /// Builds the key from raw bytes, accepting either the bare 32-byte
    /// key or a 44-byte DER SPKI document.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LicenseError> {
        let raw: [u8; 32] = match bytes.len() {
            32 => bytes.try_into().expect("length checked"),
            44 => bytes[12..].try_into().expect("length checked"),
            n => {
                return Err(LicenseError::InvalidIssuerKey(format!(
                    "expected 32 key bytes, got {n}"
                )))
            }
        };
        let key = VerifyingKey::from_bytes(&raw)
            .map_err(|_| LicenseError::InvalidIssuerKey("not a valid Ed25519 point".to_string()))?;
        Ok(Self(key))
    }
}

/// The wire payload inside the envelope.
#[derive(Debug, Deserialize)]
struct Payload {
    id: String,
    cluster: String,
    #[serde(default)]
    product_line: String,
    #[serde(default)]
    plan: String,
    #[serde(default)]
    features: Vec<String>,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    status: Option<LicenseStatus>,
}

/// Parses a license blob and verifies it for the cluster `cluster_uid`.
///
/// Fails if the envelope is malformed, the signature does not verify
/// against `issuer`, the validity window does not cover now, or the
/// embedded cluster binding differs from `cluster_uid`.
pub fn parse_license(
    cluster_uid: &str,
    issuer: &IssuerKey,
    blob: &[u8],
) -> Result<License, LicenseError> {
    let text = std::str::from_utf8(blob)
        .map_err(|_| LicenseError::Malformed("blob is not UTF-8".to_string()))?;
    let envelope: String = text
        .lines()
        .filter(|line| !line.starts_with("-----"))
        .map(str::trim)
        .collect();

    let (payload_b64, signature_b64) = envelope
        .split_once('.')
        .ok_or_else(|| LicenseError::Malformed("missing payload.signature separator".to_string()))?;
    if signature_b64.contains('.') {
        return Err(LicenseError::Malformed(
            "envelope has more than two parts".to_string(),
        ));
    }

    let sig_bytes = URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|e| LicenseError::Malformed(format!("bad signature base64: {e}")))?;
    let signature = Signature::from_slice(&sig_bytes)
        .map_err(|_| LicenseError::Malformed("bad signature length".to_string()))?;

    // The signature covers the encoded payload string, not the decoded
    // JSON, so the blob verifies byte-for-byte as shipped.
    issuer
        .0
        .verify(payload_b64.as_bytes(), &signature)
        .map_err(|_| LicenseError::InvalidSignature)?;

    let payload_json = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|e| LicenseError::Malformed(format!("bad payload base64: {e}")))?;
    let payload: Payload = serde_json::from_slice(&payload_json)
        .map_err(|e| LicenseError::Malformed(format!("bad payload JSON: {e}")))?;

    let now = Utc::now();
    if now < payload.not_before {
        return Err(LicenseError::NotYetValid(payload.not_before));
    }
    if now > payload.not_after {
        return Err(LicenseError::Expired(payload.not_after));
    }
    if payload.cluster != cluster_uid {
        return Err(LicenseError::ClusterMismatch {
            bound: payload.cluster,
            requested: cluster_uid.to_string(),
        });
    }

    Ok(License {
        id: payload.id,
        cluster: payload.cluster,
        product_line: payload.product_line,
        plan: payload.plan,
        features: payload.features,
        not_before: payload.not_before,
        not_after: payload.not_after,
        status: payload.status.unwrap_or(LicenseStatus::Active),
        data: blob.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use ed25519_dalek::{Signer, SigningKey};

    fn signing_key() -> SigningKey {
        SigningKey::from_bytes(&[7u8; 32])
    }

    fn issuer() -> IssuerKey {
        IssuerKey(signing_key().verifying_key())
    }

    fn mint(id: &str, cluster: &str, features: &[&str], hours: i64) -> Vec<u8> {
        let now = Utc::now();
        let payload = serde_json::json!({
            "id": id,
            "cluster": cluster,
            "product_line": "kubedb",
            "plan": "kubedb-enterprise",
            "features": features,
            "not_before": now - TimeDelta::hours(1),
            "not_after": now + TimeDelta::hours(hours),
            "status": "active",
        });
        let payload_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&payload).unwrap());
        let sig = signing_key().sign(payload_b64.as_bytes());
        let sig_b64 = URL_SAFE_NO_PAD.encode(sig.to_bytes());
        format!("{payload_b64}.{sig_b64}").into_bytes()
    }

    #[test]
    fn accepts_license_for_own_cluster() {
        let blob = mint("lic-A", "c-1", &["f1", "f2"], 24);
        let l = parse_license("c-1", &issuer(), &blob).unwrap();
        assert_eq!(l.id, "lic-A");
        assert_eq!(l.features, vec!["f1", "f2"]);
        assert_eq!(l.status, LicenseStatus::Active);
        assert_eq!(l.data, blob);
    }

    #[test]
    fn rejects_license_for_other_cluster() {
        let blob = mint("lic-A", "c-1", &["f1"], 24);
        let err = parse_license("c-2", &issuer(), &blob).unwrap_err();
        assert!(matches!(err, LicenseError::ClusterMismatch { .. }));
        assert!(err.is_certificate_invalid());
    }

    #[test]
    fn rejects_expired_window() {
        let blob = mint("lic-A", "c-1", &["f1"], -1);
        let err = parse_license("c-1", &issuer(), &blob).unwrap_err();
        assert!(matches!(err, LicenseError::Expired(_)));
        assert!(err.is_certificate_invalid());
    }

    #[test]
    fn rejects_tampered_payload() {
        let blob = mint("lic-A", "c-1", &["f1"], 24);
        let text = String::from_utf8(blob).unwrap();
        let (payload_b64, sig_b64) = text.split_once('.').unwrap();
        let forged_json = serde_json::json!({
            "id": "lic-A",
            "cluster": "c-2",
            "features": ["f1"],
            "not_before": Utc::now() - TimeDelta::hours(1),
            "not_after": Utc::now() + TimeDelta::hours(24),
        });
        let forged = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged_json).unwrap()),
            sig_b64
        );
        let err = parse_license("c-2", &issuer(), forged.as_bytes()).unwrap_err();
        assert!(matches!(err, LicenseError::InvalidSignature));
        // Original payload still verifies, so only the forgery is refused.
        let ok = format!("{payload_b64}.{sig_b64}");
        assert!(parse_license("c-1", &issuer(), ok.as_bytes()).is_ok());
    }

    #[test]
    fn rejects_garbage() {
        let err = parse_license("c-1", &issuer(), b"not a license").unwrap_err();
        assert!(matches!(err, LicenseError::Malformed(_)));
        assert!(!err.is_certificate_invalid());
    }

    #[test]
    fn accepts_armored_envelope() {
        let blob = mint("lic-A", "c-1", &["f1"], 24);
        let armored = format!(
            "-----BEGIN LICENSE-----\n{}\n-----END LICENSE-----\n",
            String::from_utf8(blob).unwrap()
        );
        assert!(parse_license("c-1", &issuer(), armored.as_bytes()).is_ok());
    }

    #[test]
    fn issuer_key_from_pem_roundtrip() {
        let raw = signing_key().verifying_key().to_bytes();
        let pem = format!(
            "-----BEGIN PUBLIC KEY-----\n{}\n-----END PUBLIC KEY-----\n",
            STANDARD.encode(raw)
        );
        let key = IssuerKey::from_pem(pem.as_bytes()).unwrap();
        let blob = mint("lic-A", "c-1", &["f1"], 24);
        assert!(parse_license("c-1", &key, &blob).is_ok());
    }

    #[test]
    fn status_defaults_to_active() {
        let now = Utc::now();
        let payload = serde_json::json!({
            "id": "lic-B",
            "cluster": "c-1",
            "not_before": now - TimeDelta::hours(1),
            "not_after": now + TimeDelta::hours(1),
        });
        let payload_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&payload).unwrap());
        let sig = signing_key().sign(payload_b64.as_bytes());
        let blob = format!("{payload_b64}.{}", URL_SAFE_NO_PAD.encode(sig.to_bytes()));
        let l = parse_license("c-1", &issuer(), blob.as_bytes()).unwrap();
        assert_eq!(l.status, LicenseStatus::Active);
    }
}

//! Boot-time loading of license blobs from a directory.

use std::path::{Path, PathBuf};

use chrono::Utc;
use thiserror::Error;

use lproxy_license::{parse_license, IssuerKey};

use crate::store::LicenseRegistry;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read dir {path}: {source}")]
    ReadDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to load file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Walks `dir` and feeds every plain file through the verifier into
/// `registry`. Directories and symlinks resolving to directories are
/// skipped. Blobs that fail verification are logged and skipped; read
/// failures abort the load.
pub fn load_dir(
    cluster_uid: &str,
    issuer: &IssuerKey,
    dir: &Path,
    registry: &LicenseRegistry,
) -> Result<(), LoadError> {
    let entries = std::fs::read_dir(dir).map_err(|source| LoadError::ReadDir {
        path: dir.to_path_buf(),
        source,
    })?;

    for entry in entries {
        let entry = entry.map_err(|source| LoadError::ReadDir {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        // metadata() follows symlinks, so a link into a directory is
        // skipped the same way a real directory is.
        match path.metadata() {
            Ok(meta) if meta.is_dir() => continue,
            Ok(_) => {}
            Err(source) => return Err(LoadError::ReadFile { path, source }),
        }

        let data = std::fs::read(&path).map_err(|source| LoadError::ReadFile {
            path: path.clone(),
            source,
        })?;

        match parse_license(cluster_uid, issuer, &data) {
            Ok(license) => {
                if license.remaining(Utc::now()) >= registry.ttl() {
                    registry.add(license, None);
                } else {
                    tracing::info!(path = %path.display(), "skipping nearly expired license");
                }
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unparsable license");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MIN_REMAINING_LIFE;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use chrono::TimeDelta;
    use ed25519_dalek::{Signer, SigningKey};

    fn signing_key() -> SigningKey {
        SigningKey::from_bytes(&[7u8; 32])
    }

    fn issuer() -> IssuerKey {
        IssuerKey::from_bytes(&signing_key().verifying_key().to_bytes()).unwrap()
    }

    fn mint(id: &str, cluster: &str, features: &[&str], hours: i64) -> Vec<u8> {
        let now = Utc::now();
        let payload = serde_json::json!({
            "id": id,
            "cluster": cluster,
            "product_line": "kubedb",
            "plan": format!("{id}-plan"),
            "features": features,
            "not_before": now - TimeDelta::hours(1),
            "not_after": now + TimeDelta::hours(hours),
            "status": "active",
        });
        let payload_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&payload).unwrap());
        let sig = signing_key().sign(payload_b64.as_bytes());
        format!("{payload_b64}.{}", URL_SAFE_NO_PAD.encode(sig.to_bytes())).into_bytes()
    }

    #[test]
    fn loads_valid_blobs_and_skips_junk() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("lic-A"), mint("lic-A", "c-1", &["f1"], 24)).unwrap();
        std::fs::write(dir.path().join("junk"), b"not a license").unwrap();
        std::fs::write(
            dir.path().join("other-cluster"),
            mint("lic-X", "c-9", &["f1"], 24),
        )
        .unwrap();
        std::fs::create_dir(dir.path().join("subdir")).unwrap();

        let reg = LicenseRegistry::new(None, MIN_REMAINING_LIFE, None);
        load_dir("c-1", &issuer(), dir.path(), &reg).unwrap();

        assert_eq!(reg.list().len(), 1);
        assert!(reg.get("lic-A").is_some());
        assert!(reg.get("lic-X").is_none());
    }

    #[test]
    fn cache_round_trip_through_loader() {
        let cache = tempfile::tempdir().unwrap();
        let reg = LicenseRegistry::new(Some(cache.path().to_path_buf()), MIN_REMAINING_LIFE, None);
        let blob = mint("lic-A", "c-1", &["f1"], 24);
        let license = parse_license("c-1", &issuer(), &blob).unwrap();
        reg.add(license, None);

        let reloaded = LicenseRegistry::new(None, MIN_REMAINING_LIFE, None);
        load_dir("c-1", &issuer(), cache.path(), &reloaded).unwrap();
        let got = reloaded.get("lic-A").unwrap();
        assert_eq!(got.license.data, blob);
        assert_eq!(reloaded.license_for_feature("f1").unwrap().id, "lic-A");
    }

    #[test]
    fn missing_dir_is_an_error() {
        let reg = LicenseRegistry::new(None, MIN_REMAINING_LIFE, None);
        let err = load_dir("c-1", &issuer(), Path::new("/nonexistent-dir"), &reg).unwrap_err();
        assert!(matches!(err, LoadError::ReadDir { .. }));
    }
}

//! Caller identity from authenticating-proxy headers.
//!
//! The front proxy authenticates the caller and forwards the identity as
//! `X-Remote-User`, `X-Remote-Uid`, repeated `X-Remote-Group` and
//! `X-Remote-Extra-<key>` headers.

use std::collections::HashMap;
use std::convert::Infallible;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;

use lproxy_registry::UserIdentity;

const REMOTE_USER: &str = "x-remote-user";
const REMOTE_UID: &str = "x-remote-uid";
const REMOTE_GROUP: &str = "x-remote-group";
const REMOTE_EXTRA_PREFIX: &str = "x-remote-extra-";

/// Extracts the forwarded identity; `None` when no user header arrived.
pub fn identity_from_headers(headers: &HeaderMap) -> Option<UserIdentity> {
    let username = headers.get(REMOTE_USER)?.to_str().ok()?.to_string();
    if username.is_empty() {
        return None;
    }

    let uid = headers
        .get(REMOTE_UID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let groups = headers
        .get_all(REMOTE_GROUP)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(str::to_string)
        .collect();

    let mut extra: HashMap<String, Vec<String>> = HashMap::new();
    for (name, value) in headers.iter() {
        let name = name.as_str();
        if let Some(key) = name.strip_prefix(REMOTE_EXTRA_PREFIX) {
            if let Ok(value) = value.to_str() {
                extra
                    .entry(key.to_string())
                    .or_default()
                    .push(value.to_string());
            }
        }
    }

    Some(UserIdentity {
        username,
        uid,
        groups,
        extra,
    })
}

/// Axum extractor wrapper; missing identity is the handler's call, not a
/// transport rejection.
pub struct RemoteIdentity(pub Option<UserIdentity>);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for RemoteIdentity {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(RemoteIdentity(identity_from_headers(&parts.headers)))
    }
}

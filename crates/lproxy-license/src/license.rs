//! Parsed license and contract types.

use std::cmp::Ordering;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status carried inside the license payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LicenseStatus {
    Active,
    Expired,
    Cancelled,
    Unknown,
}

/// A parsed, verified license. Immutable once built; `data` holds the raw
/// blob exactly as received so it can be cached and re-served verbatim.
#[derive(Debug, Clone)]
pub struct License {
    /// Unique license identity.
    pub id: String,
    /// Cluster UID this license is bound to.
    pub cluster: String,
    /// Product line the license belongs to.
    pub product_line: String,
    /// Plan name, used as the key inside the distribution secret.
    pub plan: String,
    /// Features the license covers, in issuer order.
    pub features: Vec<String>,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub status: LicenseStatus,
    /// Raw blob bytes.
    pub data: Vec<u8>,
}

impl License {
    /// Remaining validity as seen from `now`. Negative once expired.
    pub fn remaining(&self, now: DateTime<Utc>) -> TimeDelta {
        self.not_after - now
    }

    pub fn covers(&self, feature: &str) -> bool {
        self.features.iter().any(|f| f == feature)
    }
}

// Licenses order by expiry, earliest first, with the id as a
// deterministic tiebreak. Equality follows the same key.
impl PartialEq for License {
    fn eq(&self, other: &Self) -> bool {
        self.not_after == other.not_after && self.id == other.id
    }
}

impl Eq for License {}

impl PartialOrd for License {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for License {
    fn cmp(&self, other: &Self) -> Ordering {
        self.not_after
            .cmp(&other.not_after)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Optional companion to a license. Descriptive only; nothing in the
/// proxy makes decisions based on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    pub id: String,
    pub expiry: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn license(id: &str, not_after: DateTime<Utc>) -> License {
        License {
            id: id.to_string(),
            cluster: "c-1".to_string(),
            product_line: "kubedb".to_string(),
            plan: "kubedb-enterprise".to_string(),
            features: vec!["kubedb".to_string()],
            not_before: not_after - TimeDelta::days(30),
            not_after,
            status: LicenseStatus::Active,
            data: Vec::new(),
        }
    }

    #[test]
    fn orders_by_expiry_then_id() {
        let now = Utc::now();
        let a = license("lic-A", now + TimeDelta::hours(1));
        let b = license("lic-B", now + TimeDelta::hours(2));
        let c = license("lic-C", now + TimeDelta::hours(1));
        assert!(a < b);
        assert!(a < c);
        assert!(c < b);
    }

    #[test]
    fn covers_checks_feature_list() {
        let l = license("lic-A", Utc::now() + TimeDelta::hours(1));
        assert!(l.covers("kubedb"));
        assert!(!l.covers("stash"));
    }
}

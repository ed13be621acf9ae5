//! Usage bookkeeping: which identity last consumed which license.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// The authenticated caller of a license request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub username: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, Vec<String>>,
}

impl UserIdentity {
    pub fn named(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            ..Self::default()
        }
    }
}

/// Last consumption seen for a license id. Replaced wholesale on every
/// request that wins with that license.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Comma-joined feature set of the winning request.
    pub feature: String,
    pub user: UserIdentity,
}

/// Thread-safe map of license id to its last consumer. Reads far
/// outnumber writes, hence the read-write lock.
#[derive(Default)]
pub struct RecordBook {
    reg: RwLock<HashMap<String, UsageRecord>>,
}

impl RecordBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, id: &str, feature: &str, user: UserIdentity) {
        self.reg.write().insert(
            id.to_string(),
            UsageRecord {
                feature: feature.to_string(),
                user,
            },
        );
    }

    pub fn used_by(&self, id: &str) -> Option<UsageRecord> {
        self.reg.read().get(id).cloned()
    }

    /// Called by the registry when it evicts a license, keeping the two
    /// stores consistent.
    pub fn delete(&self, id: &str) {
        self.reg.write().remove(id);
    }
}

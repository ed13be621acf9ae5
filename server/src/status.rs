//! The status read surface: registry contents joined with usage records.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use lproxy_common::human_duration;
use lproxy_license::{Contract, LicenseStatus};
use lproxy_registry::{LicenseRegistry, Record, RecordBook, UsageRecord};

/// One license as exposed by the read API.
#[derive(Debug, Clone, Serialize)]
pub struct LicenseStatusItem {
    pub id: String,
    pub product_line: String,
    pub plan: String,
    pub features: Vec<String>,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub status: LicenseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract: Option<Contract>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageRecord>,
}

/// Read-only join over the registry and the record book.
pub struct StatusApi {
    registry: Arc<LicenseRegistry>,
    record_book: Arc<RecordBook>,
}

impl StatusApi {
    pub fn new(registry: Arc<LicenseRegistry>, record_book: Arc<RecordBook>) -> Self {
        Self {
            registry,
            record_book,
        }
    }

    pub fn list(&self) -> Vec<LicenseStatusItem> {
        self.registry
            .list()
            .iter()
            .map(|record| self.item(record))
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<LicenseStatusItem> {
        self.registry.get(id).map(|record| self.item(&record))
    }

    fn item(&self, record: &Record) -> LicenseStatusItem {
        let license = &record.license;
        LicenseStatusItem {
            id: license.id.clone(),
            product_line: license.product_line.clone(),
            plan: license.plan.clone(),
            features: license.features.clone(),
            not_before: license.not_before,
            not_after: license.not_after,
            status: license.status,
            contract: record.contract.clone(),
            usage: self.record_book.used_by(&license.id),
        }
    }
}

/// Column-oriented projection for `kubectl`-style output.
#[derive(Debug, Clone, Serialize)]
pub struct Table {
    pub columns: Vec<&'static str>,
    pub rows: Vec<Vec<String>>,
}

/// Projects status items into the six standard columns. Pure: the items
/// are read, never the stores.
pub fn to_table(items: &[LicenseStatusItem], now: DateTime<Utc>) -> Table {
    let rows = items
        .iter()
        .map(|item| {
            let username = item
                .usage
                .as_ref()
                .map(|u| u.user.username.clone())
                .unwrap_or_default();
            let (contract_id, contract_ends) = match &item.contract {
                Some(c) => (c.id.clone(), human_duration(c.expiry, now)),
                None => (String::new(), String::new()),
            };
            vec![
                item.id.clone(),
                item.product_line.clone(),
                username,
                contract_id,
                contract_ends,
                human_duration(item.not_after, now),
            ]
        })
        .collect();
    Table {
        columns: vec!["Id", "Product", "User", "Contract", "Contract Ends", "Valid For"],
        rows,
    }
}

//! The license registry.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;

use lproxy_license::{Contract, License};

use crate::record_book::RecordBook;

/// Minimum validity a license must still have to be handed out.
pub const MIN_REMAINING_LIFE: Duration = Duration::from_secs(10 * 60);

/// Extra headroom the hub keeps so re-acquisition finishes before a
/// license becomes unusable on the spoke.
pub const LICENSE_ACQUISITION_BUFFER: Duration = Duration::from_secs(2 * 60 * 60);

/// What the registry stores per license id.
#[derive(Debug, Clone)]
pub struct Record {
    pub license: Arc<License>,
    pub contract: Option<Contract>,
}

/// Heap entry ordered so the earliest expiry surfaces first.
#[derive(Debug, Clone, PartialEq, Eq)]
struct QueueEntry {
    not_after: DateTime<Utc>,
    id: String,
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; flip so the soonest expiry wins.
        other
            .not_after
            .cmp(&self.not_after)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct State {
    /// feature -> expiry-ordered queue. Entries may outlive the license
    /// (evicted through another feature first); reads re-check the store.
    queues: HashMap<String, BinaryHeap<QueueEntry>>,
    /// license id -> record.
    store: HashMap<String, Record>,
}

/// In-memory source of truth for currently valid licenses, with a
/// best-effort write-through cache directory.
///
/// A single mutex guards the queues, the store and the cache writes, so
/// all public operations are atomic with respect to each other.
pub struct LicenseRegistry {
    state: Mutex<State>,
    cache_dir: Option<PathBuf>,
    ttl: TimeDelta,
    record_book: Option<Arc<RecordBook>>,
}

impl LicenseRegistry {
    /// `ttl` is the remaining-life horizon below which a license is
    /// treated as gone: [`MIN_REMAINING_LIFE`] on the spoke, acquisition
    /// buffer plus that on the hub.
    pub fn new(
        cache_dir: Option<PathBuf>,
        ttl: Duration,
        record_book: Option<Arc<RecordBook>>,
    ) -> Self {
        Self {
            state: Mutex::new(State::default()),
            cache_dir,
            ttl: TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX),
            record_book,
        }
    }

    pub fn ttl(&self) -> TimeDelta {
        self.ttl
    }

    /// Idempotent insert: an id already in the store is left untouched.
    pub fn add(&self, license: License, contract: Option<Contract>) {
        let mut state = self.state.lock();
        if state.store.contains_key(&license.id) {
            return;
        }

        let license = Arc::new(license);
        for feature in &license.features {
            state
                .queues
                .entry(feature.clone())
                .or_default()
                .push(QueueEntry {
                    not_after: license.not_after,
                    id: license.id.clone(),
                });
        }
        self.write_cache(&license);
        state.store.insert(
            license.id.clone(),
            Record {
                license,
                contract,
            },
        );
    }

    /// Returns the soonest-to-expire license still meeting the
    /// remaining-life horizon for `feature`. Anything on top of the heap
    /// that fails the check is evicted from the store and the disk cache.
    pub fn license_for_feature(&self, feature: &str) -> Option<Arc<License>> {
        self.license_for_feature_at(feature, Utc::now())
    }

    fn license_for_feature_at(&self, feature: &str, now: DateTime<Utc>) -> Option<Arc<License>> {
        enum Top {
            Live(Arc<License>),
            Expiring,
            Stale,
        }

        let mut state = self.state.lock();
        let cutoff = now + self.ttl;
        loop {
            let entry = state.queues.get(feature)?.peek()?.clone();
            let top = match state.store.get(&entry.id) {
                Some(record) if record.license.not_after >= cutoff => {
                    Top::Live(Arc::clone(&record.license))
                }
                Some(_) => Top::Expiring,
                // Already evicted through another feature's queue.
                None => Top::Stale,
            };
            match top {
                Top::Live(license) => return Some(license),
                Top::Expiring => {
                    if let Some(q) = state.queues.get_mut(feature) {
                        q.pop();
                    }
                    self.evict_locked(&mut state, &entry.id);
                }
                Top::Stale => {
                    if let Some(q) = state.queues.get_mut(feature) {
                        q.pop();
                    }
                }
            }
        }
    }

    /// Random-access lookup by license id. A license past its horizon is
    /// already unreachable here even before a feature read evicts it.
    pub fn get(&self, id: &str) -> Option<Record> {
        let state = self.state.lock();
        let cutoff = Utc::now() + self.ttl;
        state
            .store
            .get(id)
            .filter(|r| r.license.not_after >= cutoff)
            .cloned()
    }

    /// All records still meeting the remaining-life horizon, soonest
    /// expiry first.
    pub fn list(&self) -> Vec<Record> {
        let state = self.state.lock();
        let cutoff = Utc::now() + self.ttl;
        let mut out: Vec<Record> = state
            .store
            .values()
            .filter(|r| r.license.not_after >= cutoff)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.license.cmp(&b.license));
        out
    }

    fn evict_locked(&self, state: &mut State, id: &str) {
        if let Some(record) = state.store.remove(id) {
            tracing::debug!(license = %id, expiry = %record.license.not_after, "evicting license");
        }
        if let Some(rb) = &self.record_book {
            rb.delete(id);
        }
        if let Some(dir) = &self.cache_dir {
            let path = dir.join(id);
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %e, "failed to remove cached license");
                }
            }
        }
    }

    // Cache I/O is best-effort: the in-memory state stays authoritative,
    // so failures are logged and swallowed.
    fn write_cache(&self, license: &License) {
        let Some(dir) = &self.cache_dir else {
            return;
        };
        let path = dir.join(&license.id);
        if let Err(e) = write_file(&path, &license.data) {
            tracing::warn!(path = %path.display(), error = %e, "failed to cache license");
        }
    }
}

#[cfg(unix)]
fn write_file(path: &Path, data: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o644)
        .open(path)?;
    file.write_all(data)
}

#[cfg(not(unix))]
fn write_file(path: &Path, data: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, data)
}

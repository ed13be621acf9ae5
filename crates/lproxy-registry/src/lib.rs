//! Thread-safe store of valid licenses.
//!
//! The registry keeps a per-feature min-heap keyed on expiry so the
//! soonest-to-expire usable license is handed out first, evicts lazily on
//! read once a license drops below its remaining-life horizon, and
//! mirrors raw blobs into a flat cache directory so a restart can reload
//! them.

mod loader;
mod record_book;
mod store;

pub use loader::{load_dir, LoadError};
pub use record_book::{RecordBook, UsageRecord, UserIdentity};
pub use store::{LicenseRegistry, Record, LICENSE_ACQUISITION_BUFFER, MIN_REMAINING_LIFE};

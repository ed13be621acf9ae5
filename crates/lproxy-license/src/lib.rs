//! License data model and offline verification.
//!
//! A license blob is `base64url(payload).base64url(signature)`, where the
//! signature is Ed25519 over the encoded payload bytes and must verify
//! against the trusted issuer key. PEM-style armor around the envelope is
//! accepted. Verification also checks the validity window and that the
//! license is bound to the local cluster; it performs no network I/O.

mod error;
mod license;
mod verify;

pub use error::LicenseError;
pub use license::{Contract, License, LicenseStatus};
pub use verify::{parse_license, IssuerKey};

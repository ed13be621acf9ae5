//! Typed verification errors.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors produced while parsing and verifying a license blob.
///
/// All variants are permanent for a given blob: a license that fails to
/// verify will never start verifying. Callers that acquire blobs over the
/// network distinguish the certificate-invalid class (skip, never retry)
/// from their own transport errors (retry) via
/// [`LicenseError::is_certificate_invalid`].
#[derive(Debug, Error)]
pub enum LicenseError {
    /// Envelope structure, base64 or payload JSON is broken.
    #[error("malformed license: {0}")]
    Malformed(String),

    /// Signature does not verify against the trusted issuer key.
    #[error("license signature does not verify against the issuer")]
    InvalidSignature,

    /// The validity window has not opened yet.
    #[error("license not valid before {0}")]
    NotYetValid(DateTime<Utc>),

    /// The validity window has closed.
    #[error("license expired at {0}")]
    Expired(DateTime<Utc>),

    /// The license is bound to a different cluster.
    #[error("license bound to cluster {bound:?}, not {requested:?}")]
    ClusterMismatch { bound: String, requested: String },

    /// The issuer key material could not be parsed.
    #[error("invalid issuer key: {0}")]
    InvalidIssuerKey(String),
}

impl LicenseError {
    /// True for failures of the certificate itself: bad signature, window
    /// not covering now, or wrong cluster binding. These are never worth
    /// re-requesting from upstream.
    pub fn is_certificate_invalid(&self) -> bool {
        matches!(
            self,
            LicenseError::InvalidSignature
                | LicenseError::NotYetValid(_)
                | LicenseError::Expired(_)
                | LicenseError::ClusterMismatch { .. }
        )
    }
}

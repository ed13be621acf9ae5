//! The hub-side license manager.
//!
//! Watches managed clusters, reads their feature claims, acquires
//! licenses from the upstream service and ships them to each spoke
//! through the per-cluster distribution secret.

pub mod acquirer;
pub mod options;

//! The spoke-side license proxy server.
//!
//! Serves feature-to-license lookups out of the in-memory registry,
//! acquires from the upstream license service on miss, and on a
//! multi-cluster spoke signals the hub through a cluster claim instead.
//! A syncer controller mirrors the hub's distribution secret into the
//! local cluster and feeds every entry through the verifier into the
//! registry.

pub mod api;
pub mod handler;
pub mod identity;
pub mod options;
pub mod status;
pub mod syncer;

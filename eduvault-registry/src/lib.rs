//! EduVault Issuer Registry
//!
//! Persistent mapping from issuer id to baseline perceptual hashes:
//! - one SQLite table, `issuer_phash(issuer_id, issuer_name, phash)`
//! - several rows sharing an id prefix are templates of one issuer
//! - placeholder ids `unknown_<n>` for unrecognised issuers
//!
//! The registry holds a single long-lived connection behind a mutex, so
//! every logical operation is serialised within a process.

pub mod seed;
pub mod store;

pub use seed::*;
pub use store::*;

/// Prefix of placeholder issuer ids
pub const UNKNOWN_PREFIX: &str = "unknown_";

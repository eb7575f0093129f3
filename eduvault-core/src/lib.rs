//! EduVault Core - hashing, signal types and trust aggregation
//!
//! This crate provides the foundational primitives:
//! - DCT perceptual hashes and Hamming distance
//! - Signal result types for the three independent producers
//! - One tuning structure for every threshold and weight
//! - The aggregator that fuses the signals into a trust score

pub mod aggregate;
pub mod config;
pub mod phash;
pub mod signals;

pub use aggregate::*;
pub use config::*;
pub use phash::*;
pub use signals::*;

/// Issuer id reported by the detector when nothing matched
pub const UNKNOWN_ISSUER: &str = "unknown";

/// Display name stored for placeholder issuers
pub const UNKNOWN_ISSUER_NAME: &str = "Unknown Issuer";

/// Embedding width produced by the feature extractor
pub const EMBEDDING_DIM: usize = 512;

/// Minimum trust score
pub const MIN_TRUST: f64 = 0.0;

/// Maximum trust score
pub const MAX_TRUST: f64 = 100.0;

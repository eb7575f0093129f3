//! Common error type and model seam for signal producers

use std::path::PathBuf;

use thiserror::Error;

use eduvault_core::HashError;
use eduvault_registry::RegistryError;

/// Errors from signal producers
#[derive(Debug, Error)]
pub enum SignalError {
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("hash error: {0}")]
    Hash(#[from] HashError),

    #[error("anomaly model unavailable at {path}: {reason}")]
    ModelLoad { path: PathBuf, reason: String },

    #[error("invalid anomaly model: {0}")]
    InvalidModel(String),

    #[error("embedding has {actual} dimensions, model expects {expected}")]
    EmbeddingDimension { expected: usize, actual: usize },

    #[error("invalid embedding: {0}")]
    InvalidEmbedding(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed document: {0}")]
    Document(#[from] serde_json::Error),
}

/// A fitted, read-only outlier model over embeddings
///
/// Higher decision values are more typical of the training distribution.
pub trait OutlierModel: Send + Sync {
    /// Embedding width the model was fitted on
    fn n_features(&self) -> usize;

    /// Normality score of one embedding
    fn decision_function(&self, embedding: &[f32]) -> f64;
}

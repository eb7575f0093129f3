//! Anomaly Scorer
//!
//! Scores a certificate embedding with the fitted outlier model and bands the
//! score into NORMAL / UNUSUAL / SUSPICIOUS. The model is loaded once and
//! shared read-only between requests.

use std::sync::Arc;

use tracing::{debug, info};

use eduvault_core::{AnomalyConfig, AnomalyResult, AnomalyVerdict};

use crate::{IsolationForest, OutlierModel, SignalError};

/// Scores embeddings against a fitted outlier model
#[derive(Clone)]
pub struct AnomalyScorer {
    model: Arc<dyn OutlierModel>,
    config: AnomalyConfig,
}

impl AnomalyScorer {
    pub fn new(model: Arc<dyn OutlierModel>, config: AnomalyConfig) -> Result<Self, SignalError> {
        if model.n_features() != config.embedding_dim {
            return Err(SignalError::InvalidModel(format!(
                "model expects {} features, configured embedding width is {}",
                model.n_features(),
                config.embedding_dim
            )));
        }
        Ok(Self { model, config })
    }

    /// Load the isolation forest named by the configuration
    ///
    /// A missing or malformed model is fatal for the scorer.
    pub fn load(config: &AnomalyConfig) -> Result<Self, SignalError> {
        let path = &config.model_path;
        let forest = IsolationForest::load(path).map_err(|e| SignalError::ModelLoad {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        info!(
            "Loaded anomaly model from {} ({} trees)",
            path.display(),
            forest.trees.len()
        );
        Self::new(Arc::new(forest), config.clone())
    }

    pub fn score(&self, embedding: &[f32]) -> Result<AnomalyResult, SignalError> {
        if embedding.len() != self.config.embedding_dim {
            return Err(SignalError::EmbeddingDimension {
                expected: self.config.embedding_dim,
                actual: embedding.len(),
            });
        }
        if let Some(i) = embedding.iter().position(|v| !v.is_finite()) {
            return Err(SignalError::InvalidEmbedding(format!(
                "component {i} is not finite"
            )));
        }

        let score = self.model.decision_function(embedding);
        let verdict = self.classify(score);
        debug!("Anomaly decision value {:.6}", score);
        info!("Anomaly verdict: {}", verdict);

        Ok(AnomalyResult {
            verdict,
            anomaly_score: Some(score),
        })
    }

    /// Score when an embedding was produced, UNAVAILABLE otherwise
    pub fn score_optional(&self, embedding: Option<&[f32]>) -> Result<AnomalyResult, SignalError> {
        match embedding {
            Some(embedding) => self.score(embedding),
            None => Ok(AnomalyResult::unavailable()),
        }
    }

    pub fn classify(&self, score: f64) -> AnomalyVerdict {
        if score >= self.config.normal_threshold {
            AnomalyVerdict::Normal
        } else if score >= self.config.unusual_threshold {
            AnomalyVerdict::Unusual
        } else {
            AnomalyVerdict::Suspicious
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    /// Decision value is the first embedding component
    struct Echo(usize);

    impl OutlierModel for Echo {
        fn n_features(&self) -> usize {
            self.0
        }

        fn decision_function(&self, embedding: &[f32]) -> f64 {
            f64::from(embedding[0])
        }
    }

    fn config(dim: usize) -> AnomalyConfig {
        AnomalyConfig {
            embedding_dim: dim,
            ..AnomalyConfig::default()
        }
    }

    fn scorer() -> AnomalyScorer {
        AnomalyScorer::new(Arc::new(Echo(4)), config(4)).unwrap()
    }

    #[test]
    fn test_verdict_bands() {
        let scorer = scorer();
        assert_eq!(scorer.classify(0.2), AnomalyVerdict::Normal);
        assert_eq!(scorer.classify(0.06), AnomalyVerdict::Normal);
        assert_eq!(scorer.classify(0.0), AnomalyVerdict::Unusual);
        assert_eq!(scorer.classify(-0.05), AnomalyVerdict::Unusual);
        assert_eq!(scorer.classify(-0.051), AnomalyVerdict::Suspicious);
    }

    #[test]
    fn test_score_reports_decision_value() {
        let result = scorer().score(&[-0.25, 0.0, 0.0, 0.0]).unwrap();
        assert_eq!(result.verdict, AnomalyVerdict::Suspicious);
        assert_eq!(result.anomaly_score, Some(-0.25));
    }

    #[test]
    fn test_rejects_wrong_dimension() {
        let err = scorer().score(&[0.1; 3]).unwrap_err();
        assert!(matches!(
            err,
            SignalError::EmbeddingDimension {
                expected: 4,
                actual: 3
            }
        ));
    }

    #[test]
    fn test_rejects_non_finite_embedding() {
        let err = scorer().score(&[0.1, f32::NAN, 0.0, 0.0]).unwrap_err();
        assert!(matches!(err, SignalError::InvalidEmbedding(_)));
    }

    #[test]
    fn test_missing_embedding_is_unavailable() {
        let result = scorer().score_optional(None).unwrap();
        assert_eq!(result, AnomalyResult::unavailable());
    }

    #[test]
    fn test_model_width_must_match_config() {
        assert!(AnomalyScorer::new(Arc::new(Echo(8)), config(4)).is_err());
    }

    #[test]
    fn test_missing_model_file_is_fatal() {
        let cfg = AnomalyConfig {
            model_path: "does/not/exist.json".into(),
            ..config(2)
        };
        let err = AnomalyScorer::load(&cfg).err().unwrap();
        assert!(matches!(err, SignalError::ModelLoad { .. }));
    }

    #[test]
    fn test_loads_exported_forest() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"n_features": 2, "max_samples": 4, "offset": -0.5, "trees": [{{"nodes": [
                {{"kind": "split", "feature": 0, "threshold": 0.5, "left": 1, "right": 2}},
                {{"kind": "leaf", "n_samples": 1}},
                {{"kind": "leaf", "n_samples": 3}}
            ]}}]}}"#
        )
        .unwrap();

        let cfg = AnomalyConfig {
            model_path: file.path().to_path_buf(),
            ..config(2)
        };
        let scorer = AnomalyScorer::load(&cfg).unwrap();
        assert_eq!(scorer.score(&[1.0, 0.0]).unwrap().verdict, AnomalyVerdict::Normal);
        assert_eq!(scorer.score(&[0.0, 0.0]).unwrap().verdict, AnomalyVerdict::Suspicious);
    }
}

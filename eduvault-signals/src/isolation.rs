//! Isolation forest evaluation
//!
//! Fitting happens offline; the fitted forest is exported to JSON as a flat
//! node array per tree. Scoring follows the usual definition:
//! `score = -2^(-E[h(x)] / c(max_samples))`, `decision = score - offset`,
//! where `h` is the leaf depth plus `c(n)` of the samples left at the leaf.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{OutlierModel, SignalError};

const EULER_GAMMA: f64 = 0.577_215_664_9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TreeNode {
    /// `x[feature] <= threshold` goes left
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        n_samples: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationTree {
    /// Root first; children always come after their parent
    pub nodes: Vec<TreeNode>,
}

impl IsolationTree {
    /// Path length of one sample through this tree
    pub fn path_length(&self, x: &[f32]) -> f64 {
        let mut index = 0;
        let mut depth = 0.0;
        loop {
            match &self.nodes[index] {
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    index = if f64::from(x[*feature]) <= *threshold { *left } else { *right };
                    depth += 1.0;
                }
                TreeNode::Leaf { n_samples } => return depth + average_path_length(*n_samples),
            }
        }
    }

    fn validate(&self, n_features: usize) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("tree has no nodes".into());
        }
        for (i, node) in self.nodes.iter().enumerate() {
            if let TreeNode::Split {
                feature,
                threshold,
                left,
                right,
            } = node
            {
                if *feature >= n_features {
                    return Err(format!("node {i} splits on feature {feature} of {n_features}"));
                }
                if !threshold.is_finite() {
                    return Err(format!("node {i} has a non-finite threshold"));
                }
                for child in [left, right] {
                    if *child <= i || *child >= self.nodes.len() {
                        return Err(format!("node {i} has out-of-order child {child}"));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Fitted isolation forest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationForest {
    pub n_features: usize,
    /// Subsample size each tree was grown on
    pub max_samples: usize,
    /// Subtracted from the raw score so that 0 separates inliers from outliers
    pub offset: f64,
    pub trees: Vec<IsolationTree>,
}

impl IsolationForest {
    pub fn from_json_str(content: &str) -> Result<Self, SignalError> {
        let forest: IsolationForest = serde_json::from_str(content)?;
        forest.validate()?;
        Ok(forest)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SignalError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| SignalError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&content)
    }

    pub fn validate(&self) -> Result<(), SignalError> {
        if self.n_features == 0 {
            return Err(SignalError::InvalidModel("n_features must be positive".into()));
        }
        if self.max_samples < 2 {
            return Err(SignalError::InvalidModel("max_samples must be at least 2".into()));
        }
        if !self.offset.is_finite() {
            return Err(SignalError::InvalidModel("offset must be finite".into()));
        }
        if self.trees.is_empty() {
            return Err(SignalError::InvalidModel("forest has no trees".into()));
        }
        for (t, tree) in self.trees.iter().enumerate() {
            tree.validate(self.n_features)
                .map_err(|reason| SignalError::InvalidModel(format!("tree {t}: {reason}")))?;
        }
        Ok(())
    }

    /// Raw score in [-1, 0); lower is more abnormal
    pub fn score_samples(&self, x: &[f32]) -> f64 {
        let total: f64 = self.trees.iter().map(|tree| tree.path_length(x)).sum();
        let mean = total / self.trees.len() as f64;
        -(2f64.powf(-mean / average_path_length(self.max_samples)))
    }
}

impl OutlierModel for IsolationForest {
    fn n_features(&self) -> usize {
        self.n_features
    }

    fn decision_function(&self, embedding: &[f32]) -> f64 {
        self.score_samples(embedding) - self.offset
    }
}

/// Average path length of an unsuccessful search in a binary tree of `n` samples
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FOREST: &str = r#"{
        "n_features": 2,
        "max_samples": 4,
        "offset": -0.5,
        "trees": [{"nodes": [
            {"kind": "split", "feature": 0, "threshold": 0.5, "left": 1, "right": 2},
            {"kind": "leaf", "n_samples": 1},
            {"kind": "leaf", "n_samples": 3}
        ]}]
    }"#;

    #[test]
    fn test_average_path_length() {
        assert_eq!(average_path_length(0), 0.0);
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        assert!((average_path_length(4) - 1.851_655_8).abs() < 1e-6);
        assert!((average_path_length(256) - 10.244_771).abs() < 1e-5);
    }

    #[test]
    fn test_isolated_sample_scores_lower() {
        let forest = IsolationForest::from_json_str(FOREST).unwrap();

        let isolated = forest.decision_function(&[0.0, 9.0]);
        let crowded = forest.decision_function(&[1.0, 9.0]);

        assert!((isolated - -0.187_744).abs() < 1e-5);
        assert!((crowded - 0.062_340).abs() < 1e-5);
    }

    #[test]
    fn test_threshold_is_inclusive_on_the_left() {
        let forest = IsolationForest::from_json_str(FOREST).unwrap();
        assert_eq!(forest.score_samples(&[0.5, 0.0]), forest.score_samples(&[0.0, 0.0]));
    }

    #[test]
    fn test_score_averages_over_trees() {
        let mut forest = IsolationForest::from_json_str(FOREST).unwrap();
        forest.trees.push(IsolationTree {
            nodes: vec![TreeNode::Leaf { n_samples: 4 }],
        });

        // mean path (1 + c(4)) / 2 for the isolated sample
        let mean = (1.0 + average_path_length(4)) / 2.0;
        let expected = -(2f64.powf(-mean / average_path_length(4)));
        assert!((forest.score_samples(&[0.0, 0.0]) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_backward_children() {
        let json = FOREST.replace("\"left\": 1", "\"left\": 0");
        let err = IsolationForest::from_json_str(&json).unwrap_err();
        assert!(matches!(err, SignalError::InvalidModel(_)));
    }

    #[test]
    fn test_rejects_unknown_feature() {
        let json = FOREST.replace("\"feature\": 0", "\"feature\": 2");
        assert!(matches!(
            IsolationForest::from_json_str(&json),
            Err(SignalError::InvalidModel(_))
        ));
    }

    #[test]
    fn test_rejects_empty_forest() {
        let json = r#"{"n_features": 2, "max_samples": 4, "offset": -0.5, "trees": []}"#;
        assert!(IsolationForest::from_json_str(json).is_err());
    }
}

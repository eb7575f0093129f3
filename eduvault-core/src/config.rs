//! Tuning configuration
//!
//! Every threshold and weight used by the detector, the scorers and the
//! aggregator lives here, so tuning is auditable in one place. Loaded from
//! TOML; each section falls back to its defaults key by key.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{CropRect, PerceptualHash};

/// Errors from loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render configuration: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Complete tuning for a verification run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TrustConfig {
    pub registry: RegistryConfig,
    pub detector: DetectorConfig,
    pub matching: MatchConfig,
    pub forensics: ForensicsConfig,
    pub anomaly: AnomalyConfig,
    pub aggregate: AggregateConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// SQLite file holding issuer baselines
    pub path: PathBuf,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/issuer_phash.db"),
        }
    }
}

/// One known issuer and the phrases that identify it in OCR text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssuerRule {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub keywords: Vec<String>,
}

impl IssuerRule {
    pub fn new(id: &str, keywords: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            name: None,
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        }
    }

    /// Configured display name, or the id title-cased
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| display_name_for(&self.id))
    }
}

/// `cisco_ccna` -> `Cisco Ccna`
pub fn display_name_for(issuer_id: &str) -> String {
    issuer_id
        .split('_')
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(|c| c.to_lowercase()))
                    .collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Logo hash captured from the logo crop of a genuine certificate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogoTemplate {
    pub issuer_id: String,
    pub phash: PerceptualHash,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Loose on purpose: logo crops are small and noisy
    pub logo_threshold: u32,
    /// Must be the crop every logo hash was generated from
    pub logo_crop: CropRect,
    /// Scanned in order; the first issuer with any keyword hit wins
    pub issuers: Vec<IssuerRule>,
    /// Fallback table consulted when no keyword matches
    pub logos: Vec<LogoTemplate>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            logo_threshold: 40,
            logo_crop: CropRect::LOGO,
            issuers: vec![
                IssuerRule::new("cisco_ccna", &["cisco", "ccna", "networking academy"]),
                IssuerRule::new("linkedin_learning", &["linkedin learning"]),
                IssuerRule::new("microsoft", &["microsoft", "azure"]),
                IssuerRule::new("nptel", &["nptel", "iit"]),
                IssuerRule::new("udemy", &["udemy"]),
                IssuerRule::new("unstop", &["unstop"]),
            ],
            logos: vec![LogoTemplate {
                issuer_id: "unstop".to_string(),
                phash: PerceptualHash::from_bits(0xb8c3_c73c_30c9_cc67),
            }],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// Largest best-template distance still judged VISUALLY_MATCHING
    pub hamming_threshold: u32,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            hamming_threshold: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForensicsConfig {
    /// Producer/creator substrings (lowercase) of known editing tools
    pub editing_tools: Vec<String>,
    /// Strong: metadata names an editing tool
    pub producer_weight: u32,
    /// Weak: the name span's font is not embedded
    pub font_weight: u32,
    /// Medium: the name span sits late in structural order
    pub late_order_weight: u32,
    /// Weak: the page carries raster images
    pub raster_weight: u32,
    /// Fraction of page blocks past which the name counts as late
    pub late_order_fraction: f64,
    /// Shortest trimmed span text considered a name candidate
    pub min_name_chars: usize,
    /// Score at or above which the document is LIKELY_EDITED
    pub edited_threshold: u32,
    /// Score at or above which the document is SUSPICIOUS
    pub suspicious_threshold: u32,
}

impl Default for ForensicsConfig {
    fn default() -> Self {
        Self {
            editing_tools: vec!["canva".to_string()],
            producer_weight: 4,
            font_weight: 1,
            late_order_weight: 2,
            raster_weight: 1,
            late_order_fraction: 0.7,
            min_name_chars: 3,
            edited_threshold: 5,
            suspicious_threshold: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    /// Fitted outlier model exported as JSON
    pub model_path: PathBuf,
    pub embedding_dim: usize,
    /// Scores at or above this are NORMAL
    pub normal_threshold: f64,
    /// Scores at or above this (and below normal) are UNUSUAL
    pub unusual_threshold: f64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("data/cnn_anomaly_model.json"),
            embedding_dim: crate::EMBEDDING_DIM,
            normal_threshold: 0.06,
            unusual_threshold: -0.05,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregateConfig {
    /// Forensic score at which pdf risk reaches 0.5
    pub pdf_saturation: f64,
    /// Distance treated as maximal risk, also the default when no comparison ran
    pub phash_distance_cap: u32,
    /// Anomaly score at or above which cnn risk is zero
    pub cnn_pivot: f64,
    /// Anomaly score substituted when the signal is unavailable
    pub default_anomaly_score: f64,
    pub pdf_weight: f64,
    pub phash_weight: f64,
    pub cnn_weight: f64,
    /// Added when all three signals report their best-case verdict
    pub agreement_boost: f64,
    /// Ceiling applied together with the boost
    pub boost_cap: f64,
    pub highly_trusted: f64,
    pub mostly_trusted: f64,
    pub needs_review: f64,
}

impl Default for AggregateConfig {
    fn default() -> Self {
        Self {
            pdf_saturation: 4.0,
            phash_distance_cap: 20,
            cnn_pivot: 0.5,
            default_anomaly_score: 0.0,
            pdf_weight: 0.50,
            phash_weight: 0.35,
            cnn_weight: 0.15,
            agreement_boost: 12.0,
            boost_cap: 95.0,
            highly_trusted: 85.0,
            mostly_trusted: 65.0,
            needs_review: 45.0,
        }
    }
}

impl TrustConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: TrustConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Every floating point tuning value, by its TOML key
    fn float_fields(&self) -> impl Iterator<Item = (&'static str, f64)> {
        let crop = &self.detector.logo_crop;
        let g = &self.aggregate;
        [
            ("detector.logo_crop.left", crop.left),
            ("detector.logo_crop.top", crop.top),
            ("detector.logo_crop.right", crop.right),
            ("detector.logo_crop.bottom", crop.bottom),
            ("forensics.late_order_fraction", self.forensics.late_order_fraction),
            ("anomaly.normal_threshold", self.anomaly.normal_threshold),
            ("anomaly.unusual_threshold", self.anomaly.unusual_threshold),
            ("aggregate.pdf_saturation", g.pdf_saturation),
            ("aggregate.cnn_pivot", g.cnn_pivot),
            ("aggregate.default_anomaly_score", g.default_anomaly_score),
            ("aggregate.pdf_weight", g.pdf_weight),
            ("aggregate.phash_weight", g.phash_weight),
            ("aggregate.cnn_weight", g.cnn_weight),
            ("aggregate.agreement_boost", g.agreement_boost),
            ("aggregate.boost_cap", g.boost_cap),
            ("aggregate.highly_trusted", g.highly_trusted),
            ("aggregate.mostly_trusted", g.mostly_trusted),
            ("aggregate.needs_review", g.needs_review),
        ]
        .into_iter()
    }

    /// Reject tuning that would make the scores meaningless
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for rule in &self.detector.issuers {
            if rule.id.trim().is_empty() {
                return Err(ConfigError::Invalid("issuer id must not be empty".into()));
            }
            if rule.id == crate::UNKNOWN_ISSUER {
                return Err(ConfigError::Invalid(format!(
                    "issuer id {:?} is reserved",
                    crate::UNKNOWN_ISSUER
                )));
            }
            if !seen.insert(rule.id.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate issuer id {:?}", rule.id)));
            }
            if rule.keywords.iter().any(|k| k.trim().is_empty()) {
                return Err(ConfigError::Invalid(format!(
                    "issuer {:?} has an empty keyword",
                    rule.id
                )));
            }
        }

        if let Some(name) = self.float_fields().find(|(_, v)| !v.is_finite()).map(|(n, _)| n) {
            return Err(ConfigError::Invalid(format!("{name} must be a finite number")));
        }

        let crop = &self.detector.logo_crop;
        let in_unit = |v: f64| (0.0..=1.0).contains(&v);
        if !(in_unit(crop.left) && in_unit(crop.right) && in_unit(crop.top) && in_unit(crop.bottom))
            || crop.left >= crop.right
            || crop.top >= crop.bottom
        {
            return Err(ConfigError::Invalid(format!("logo crop {crop:?} is not a region")));
        }

        let f = &self.forensics;
        if f.suspicious_threshold > f.edited_threshold {
            return Err(ConfigError::Invalid(
                "forensics suspicious threshold exceeds edited threshold".into(),
            ));
        }
        if !in_unit(f.late_order_fraction) {
            return Err(ConfigError::Invalid("late order fraction must be in [0, 1]".into()));
        }

        let a = &self.anomaly;
        if a.unusual_threshold > a.normal_threshold {
            return Err(ConfigError::Invalid(
                "anomaly unusual threshold exceeds normal threshold".into(),
            ));
        }
        if a.embedding_dim == 0 {
            return Err(ConfigError::Invalid("embedding dimension must be positive".into()));
        }

        let g = &self.aggregate;
        let weight_sum = g.pdf_weight + g.phash_weight + g.cnn_weight;
        if (weight_sum - 1.0).abs() > 1e-6 || g.pdf_weight < 0.0 || g.phash_weight < 0.0 || g.cnn_weight < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "aggregate weights must be non-negative and sum to 1 (got {weight_sum})"
            )));
        }
        if g.pdf_saturation <= 0.0 || g.phash_distance_cap == 0 {
            return Err(ConfigError::Invalid(
                "pdf saturation and phash distance cap must be positive".into(),
            ));
        }
        if !(g.highly_trusted >= g.mostly_trusted && g.mostly_trusted >= g.needs_review) {
            return Err(ConfigError::Invalid("verdict bands must be descending".into()));
        }
        if !(0.0..=crate::MAX_TRUST).contains(&g.boost_cap) {
            return Err(ConfigError::Invalid("boost cap must be within [0, 100]".into()));
        }

        Ok(())
    }
}

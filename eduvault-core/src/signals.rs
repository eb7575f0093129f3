//! Signal results produced by the three independent producers
//!
//! Each result is an immutable value: a verdict from a closed set plus the
//! numeric evidence behind it. The aggregator consumes one of each.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Verdict of the PDF authoring forensics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ForensicVerdict {
    LikelyOriginal,
    Suspicious,
    LikelyEdited,
    /// No qualifying text span, or no document at all
    Unknown,
}

impl ForensicVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LikelyOriginal => "LIKELY_ORIGINAL",
            Self::Suspicious => "SUSPICIOUS",
            Self::LikelyEdited => "LIKELY_EDITED",
            Self::Unknown => "UNKNOWN",
        }
    }
}

/// Verdict of the perceptual match against issuer baselines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PhashVerdict {
    /// Issuer unrecognised, a placeholder baseline was stored
    UnknownBaselineCreated,
    /// Known issuer seen for the first time, its baseline was stored
    BaselineCreated,
    VisuallyMatching,
    VisuallySuspicious,
    /// No image was available to hash
    Unavailable,
}

impl PhashVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownBaselineCreated => "UNKNOWN_BASELINE_CREATED",
            Self::BaselineCreated => "BASELINE_CREATED",
            Self::VisuallyMatching => "VISUALLY_MATCHING",
            Self::VisuallySuspicious => "VISUALLY_SUSPICIOUS",
            Self::Unavailable => "UNAVAILABLE",
        }
    }
}

/// Verdict of the embedding outlier model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnomalyVerdict {
    Normal,
    Unusual,
    Suspicious,
    /// No embedding was available to score
    Unavailable,
}

impl AnomalyVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "NORMAL",
            Self::Unusual => "UNUSUAL",
            Self::Suspicious => "SUSPICIOUS",
            Self::Unavailable => "UNAVAILABLE",
        }
    }
}

/// Final categorical verdict of a verification run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FinalVerdict {
    HighlyTrusted,
    MostlyTrusted,
    NeedsReview,
    HighRisk,
}

impl FinalVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HighlyTrusted => "HIGHLY_TRUSTED",
            Self::MostlyTrusted => "MOSTLY_TRUSTED",
            Self::NeedsReview => "NEEDS_REVIEW",
            Self::HighRisk => "HIGH_RISK",
        }
    }
}

macro_rules! display_as_str {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        })*
    };
}

display_as_str!(ForensicVerdict, PhashVerdict, AnomalyVerdict, FinalVerdict);

/// Outcome of the PDF forensics scorer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForensicsResult {
    pub verdict: ForensicVerdict,
    /// Sum of the weights of every cue that fired
    pub forensic_score: u32,
    /// Dominant (largest-font) text span, taken as the holder's name
    pub name_text: Option<String>,
    pub name_font: Option<String>,
    pub name_size: Option<f64>,
    /// Human-readable cue descriptions, in evaluation order
    pub reasons: Vec<String>,
}

impl ForensicsResult {
    /// Terminal outcome when no qualifying text exists
    pub fn unknown(reason: &str) -> Self {
        Self {
            verdict: ForensicVerdict::Unknown,
            forensic_score: 0,
            name_text: None,
            name_font: None,
            name_size: None,
            reasons: vec![reason.to_string()],
        }
    }
}

/// Outcome of the perceptual-match engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhashResult {
    pub verdict: PhashVerdict,
    /// Issuer the hash was stored under or compared against
    pub issuer_id: String,
    /// Hex hash of the submitted image
    pub phash: Option<String>,
    pub baseline_exists: bool,
    /// Template chosen as the closest match
    pub baseline_id: Option<String>,
    pub baseline_phash: Option<String>,
    pub hamming_distance: Option<u32>,
}

impl PhashResult {
    pub fn unavailable(issuer_id: &str) -> Self {
        Self {
            verdict: PhashVerdict::Unavailable,
            issuer_id: issuer_id.to_string(),
            phash: None,
            baseline_exists: false,
            baseline_id: None,
            baseline_phash: None,
            hamming_distance: None,
        }
    }
}

/// Outcome of the anomaly scorer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyResult {
    pub verdict: AnomalyVerdict,
    /// Normality score, higher is more typical of genuine certificates
    pub anomaly_score: Option<f64>,
}

impl AnomalyResult {
    pub fn unavailable() -> Self {
        Self {
            verdict: AnomalyVerdict::Unavailable,
            anomaly_score: None,
        }
    }
}

/// Normalised risk per signal, each in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskComponents {
    pub pdf_risk: f64,
    pub phash_risk: f64,
    pub cnn_risk: f64,
}

/// Fused outcome of one verification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateVerdict {
    /// 0 - 100, one decimal
    pub trust_score: f64,
    pub final_verdict: FinalVerdict,
    /// Rounded to three decimals
    pub components: RiskComponents,
}

/// Flatten any serialisable record into dotted key/value pairs
pub fn flatten_record<T: Serialize>(record: &T) -> Result<BTreeMap<String, Value>, serde_json::Error> {
    let mut out = BTreeMap::new();
    flatten_into(&mut out, String::new(), serde_json::to_value(record)?);
    Ok(out)
}

fn flatten_into(out: &mut BTreeMap<String, Value>, prefix: String, value: Value) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                let key = if prefix.is_empty() {
                    key
                } else {
                    format!("{prefix}.{key}")
                };
                flatten_into(out, key, nested);
            }
        }
        other => {
            out.insert(prefix, other);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdicts_serialize_screaming_snake() {
        let json = serde_json::to_string(&PhashVerdict::UnknownBaselineCreated).unwrap();
        assert_eq!(json, "\"UNKNOWN_BASELINE_CREATED\"");
        assert_eq!(FinalVerdict::NeedsReview.to_string(), "NEEDS_REVIEW");
        assert_eq!(ForensicVerdict::LikelyEdited.as_str(), "LIKELY_EDITED");
    }

    #[test]
    fn test_unknown_forensics_carries_reason() {
        let result = ForensicsResult::unknown("Name text not found");
        assert_eq!(result.verdict, ForensicVerdict::Unknown);
        assert_eq!(result.forensic_score, 0);
        assert_eq!(result.reasons, vec!["Name text not found".to_string()]);
    }

    #[test]
    fn test_flatten_nested_components() {
        let verdict = AggregateVerdict {
            trust_score: 72.5,
            final_verdict: FinalVerdict::MostlyTrusted,
            components: RiskComponents {
                pdf_risk: 0.2,
                phash_risk: 0.35,
                cnn_risk: 0.0,
            },
        };

        let flat = flatten_record(&verdict).unwrap();
        assert_eq!(flat["trust_score"], Value::from(72.5));
        assert_eq!(flat["final_verdict"], Value::from("MOSTLY_TRUSTED"));
        assert_eq!(flat["components.phash_risk"], Value::from(0.35));
        assert!(!flat.contains_key("components"));
    }
}

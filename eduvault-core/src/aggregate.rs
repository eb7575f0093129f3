//! Trust aggregation
//!
//! Pure fusion of the three signal results into one trust score. Each
//! signal is normalised to a risk in [0, 1]:
//! - pdf: `s / (s + k)`, saturating, 0 at score 0 and 0.5 at score k
//! - phash: `min(d / cap, 1)`, with `cap` substituted when no comparison ran
//! - cnn: `clamp(pivot - a, 0, 1)`, inverting "higher is more normal"
//!
//! The weighted risk becomes `trust = round((1 - risk) * 100, 1)`. When all
//! three signals agree on their best-case verdict a boost is added, capped
//! below certainty.

use tracing::debug;

use crate::{
    AggregateConfig, AggregateVerdict, AnomalyResult, AnomalyVerdict, FinalVerdict,
    ForensicVerdict, ForensicsResult, PhashResult, PhashVerdict, RiskComponents, MAX_TRUST,
    MIN_TRUST,
};

/// Saturating pdf risk, strictly increasing in the score
pub fn pdf_risk(forensic_score: u32, saturation: f64) -> f64 {
    let s = forensic_score as f64;
    s / (s + saturation)
}

/// Linear phash risk, maximal at or beyond the cap
pub fn phash_risk(hamming_distance: u32, cap: u32) -> f64 {
    (hamming_distance as f64 / cap as f64).min(1.0)
}

/// Inverted normality, floored at zero for scores at or above the pivot
pub fn cnn_risk(anomaly_score: f64, pivot: f64) -> f64 {
    (pivot - anomaly_score).clamp(0.0, 1.0)
}

/// Round to `places` decimals, ties to even
pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round_ties_even() / factor
}

/// Combines the three signal results under one tuning
#[derive(Debug, Clone, Default)]
pub struct Aggregator {
    config: AggregateConfig,
}

impl Aggregator {
    pub fn new(config: AggregateConfig) -> Self {
        Self { config }
    }

    pub fn combine(
        &self,
        pdf: &ForensicsResult,
        phash: &PhashResult,
        anomaly: &AnomalyResult,
    ) -> AggregateVerdict {
        let cfg = &self.config;

        let pdf_r = pdf_risk(pdf.forensic_score, cfg.pdf_saturation);
        let distance = phash.hamming_distance.unwrap_or(cfg.phash_distance_cap);
        let phash_r = phash_risk(distance, cfg.phash_distance_cap);
        let score = anomaly.anomaly_score.unwrap_or(cfg.default_anomaly_score);
        let cnn_r = cnn_risk(score, cfg.cnn_pivot);

        let final_risk = cfg.pdf_weight * pdf_r + cfg.phash_weight * phash_r + cfg.cnn_weight * cnn_r;
        let mut trust_score = round_to((1.0 - final_risk) * 100.0, 1).clamp(MIN_TRUST, MAX_TRUST);

        let all_agree = pdf.verdict == ForensicVerdict::LikelyOriginal
            && phash.verdict == PhashVerdict::VisuallyMatching
            && anomaly.verdict == AnomalyVerdict::Normal;
        if all_agree {
            trust_score = (trust_score + cfg.agreement_boost).min(cfg.boost_cap);
        }

        let final_verdict = self.classify(trust_score);

        debug!(
            "Aggregated pdf={:.3} phash={:.3} cnn={:.3} risk={:.3} boost={} -> {} ({})",
            pdf_r, phash_r, cnn_r, final_risk, all_agree, trust_score, final_verdict
        );

        AggregateVerdict {
            trust_score,
            final_verdict,
            components: RiskComponents {
                pdf_risk: round_to(pdf_r, 3),
                phash_risk: round_to(phash_r, 3),
                cnn_risk: round_to(cnn_r, 3),
            },
        }
    }

    /// Map a trust score onto its verdict band
    pub fn classify(&self, trust_score: f64) -> FinalVerdict {
        let cfg = &self.config;
        if trust_score >= cfg.highly_trusted {
            FinalVerdict::HighlyTrusted
        } else if trust_score >= cfg.mostly_trusted {
            FinalVerdict::MostlyTrusted
        } else if trust_score >= cfg.needs_review {
            FinalVerdict::NeedsReview
        } else {
            FinalVerdict::HighRisk
        }
    }
}

/// Combine with the default tuning
pub fn combine(
    pdf: &ForensicsResult,
    phash: &PhashResult,
    anomaly: &AnomalyResult,
) -> AggregateVerdict {
    Aggregator::default().combine(pdf, phash, anomaly)
}

//! Perceptual-Match Engine
//!
//! Judges a certificate image against the stored baselines of its issuer:
//! - unknown issuer: store the hash under a fresh placeholder id
//! - known issuer without templates: store the hash as its first baseline
//! - otherwise: pick the closest template (first minimum wins) and compare
//!   its distance with the matching threshold

use std::collections::HashMap;
use std::sync::Arc;

use image::DynamicImage;
use tracing::{debug, info};

use eduvault_core::{
    compute_phash, display_name_for, IssuerRule, MatchConfig, PerceptualHash, PhashResult,
    PhashVerdict, UNKNOWN_ISSUER, UNKNOWN_ISSUER_NAME,
};
use eduvault_registry::{BaselineTemplate, IssuerRegistry};

use crate::SignalError;

/// Compares certificate hashes with per-issuer baselines
pub struct MatchEngine {
    registry: Arc<IssuerRegistry>,
    config: MatchConfig,
    names: HashMap<String, String>,
}

impl MatchEngine {
    pub fn new(registry: Arc<IssuerRegistry>, config: MatchConfig) -> Self {
        Self {
            registry,
            config,
            names: HashMap::new(),
        }
    }

    /// Display names used when a known issuer's first baseline is stored
    pub fn with_issuer_names(mut self, rules: &[IssuerRule]) -> Self {
        self.names = rules
            .iter()
            .map(|rule| (rule.id.clone(), rule.display_name()))
            .collect();
        self
    }

    pub fn registry(&self) -> &Arc<IssuerRegistry> {
        &self.registry
    }

    /// Hash the image and evaluate it for the detected issuer
    pub fn evaluate(&self, issuer_id: &str, image: &DynamicImage) -> Result<PhashResult, SignalError> {
        let phash = compute_phash(image)?;
        self.evaluate_hash(issuer_id, phash)
    }

    /// Evaluate an already computed hash for the detected issuer
    pub fn evaluate_hash(
        &self,
        issuer_id: &str,
        phash: PerceptualHash,
    ) -> Result<PhashResult, SignalError> {
        if issuer_id == UNKNOWN_ISSUER {
            let placeholder = self.registry.allocate_unknown(UNKNOWN_ISSUER_NAME, phash)?;
            info!("Unknown issuer, created placeholder baseline {}", placeholder);
            return Ok(PhashResult {
                verdict: PhashVerdict::UnknownBaselineCreated,
                issuer_id: placeholder,
                phash: Some(phash.to_hex()),
                baseline_exists: false,
                baseline_id: None,
                baseline_phash: None,
                hamming_distance: None,
            });
        }

        let templates = self.registry.lookup_all(issuer_id)?;
        let Some((best, distance)) = best_match(&templates, phash) else {
            let name = self
                .names
                .get(issuer_id)
                .cloned()
                .unwrap_or_else(|| display_name_for(issuer_id));
            self.registry.insert_or_replace(issuer_id, &name, phash)?;
            info!("First baseline created for {}", issuer_id);
            return Ok(PhashResult {
                verdict: PhashVerdict::BaselineCreated,
                issuer_id: issuer_id.to_string(),
                phash: Some(phash.to_hex()),
                baseline_exists: false,
                baseline_id: None,
                baseline_phash: None,
                hamming_distance: None,
            });
        };

        let verdict = if distance <= self.config.hamming_threshold {
            PhashVerdict::VisuallyMatching
        } else {
            PhashVerdict::VisuallySuspicious
        };

        debug!(
            "{} best template {} of {} at distance {}",
            issuer_id,
            best.issuer_id,
            templates.len(),
            distance
        );
        info!("Perceptual match for {}: {} (distance {})", issuer_id, verdict, distance);

        Ok(PhashResult {
            verdict,
            issuer_id: issuer_id.to_string(),
            phash: Some(phash.to_hex()),
            baseline_exists: true,
            baseline_id: Some(best.issuer_id.clone()),
            baseline_phash: Some(best.phash.to_hex()),
            hamming_distance: Some(distance),
        })
    }
}

/// Closest template; ties keep the first encountered
pub fn best_match(
    templates: &[BaselineTemplate],
    phash: PerceptualHash,
) -> Option<(&BaselineTemplate, u32)> {
    let mut best: Option<(&BaselineTemplate, u32)> = None;
    for template in templates {
        let distance = template.phash.distance(&phash);
        if best.map_or(true, |(_, d)| distance < d) {
            best = Some((template, distance));
        }
    }
    best
}

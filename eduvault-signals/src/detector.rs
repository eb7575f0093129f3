//! Issuer Detector
//!
//! Classifies a certificate into a known issuer id or `unknown`.
//! - Keyword scan: lowercase OCR text, first issuer (in configured order) with any hit wins
//! - Logo fallback: hash the fixed top-left crop and compare with the logo table

use image::DynamicImage;
use serde::Serialize;
use tracing::{debug, info, warn};

use eduvault_core::{
    compute_region_phash, CropRect, DetectorConfig, IssuerRule, LogoTemplate, UNKNOWN_ISSUER,
};

/// How an issuer was recognised
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum DetectionMethod {
    Keyword { keyword: String },
    Logo { distance: u32 },
    None,
}

/// Outcome of issuer detection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub issuer_id: String,
    #[serde(flatten)]
    pub method: DetectionMethod,
}

impl Detection {
    pub fn unknown() -> Self {
        Self {
            issuer_id: UNKNOWN_ISSUER.to_string(),
            method: DetectionMethod::None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.issuer_id == UNKNOWN_ISSUER
    }
}

/// Keyword and logo based issuer detector
#[derive(Debug, Clone)]
pub struct IssuerDetector {
    issuers: Vec<IssuerRule>,
    logos: Vec<LogoTemplate>,
    logo_crop: CropRect,
    logo_threshold: u32,
}

impl IssuerDetector {
    pub fn new(config: DetectorConfig) -> Self {
        let issuers = config
            .issuers
            .into_iter()
            .map(|mut rule| {
                rule.keywords = rule.keywords.iter().map(|k| k.to_lowercase()).collect();
                rule
            })
            .collect();

        Self {
            issuers,
            logos: config.logos,
            logo_crop: config.logo_crop,
            logo_threshold: config.logo_threshold,
        }
    }

    /// Keyword scan first, logo crop second, `unknown` otherwise
    pub fn detect(&self, ocr_text: &str, image: Option<&DynamicImage>) -> Detection {
        if let Some(detection) = self.detect_by_keywords(ocr_text) {
            info!("Detected issuer {} by keyword", detection.issuer_id);
            return detection;
        }

        if let Some(detection) = image.and_then(|img| self.detect_by_logo(img)) {
            info!("Detected issuer {} by logo", detection.issuer_id);
            return detection;
        }

        debug!("No issuer recognised");
        Detection::unknown()
    }

    /// Case-insensitive substring scan over the ordered issuer table
    pub fn detect_by_keywords(&self, ocr_text: &str) -> Option<Detection> {
        let text = ocr_text.to_lowercase();

        self.issuers.iter().find_map(|rule| {
            rule.keywords
                .iter()
                .find(|kw| text.contains(kw.as_str()))
                .map(|kw| Detection {
                    issuer_id: rule.id.clone(),
                    method: DetectionMethod::Keyword {
                        keyword: kw.clone(),
                    },
                })
        })
    }

    /// First logo template within the logo threshold
    pub fn detect_by_logo(&self, image: &DynamicImage) -> Option<Detection> {
        if self.logos.is_empty() {
            return None;
        }

        let crop_hash = match compute_region_phash(image, &self.logo_crop) {
            Ok(hash) => hash,
            Err(e) => {
                warn!("Logo crop could not be hashed: {}", e);
                return None;
            }
        };

        self.logos.iter().find_map(|logo| {
            let distance = crop_hash.distance(&logo.phash);
            debug!("Logo {} distance {}", logo.issuer_id, distance);
            (distance <= self.logo_threshold).then(|| Detection {
                issuer_id: logo.issuer_id.clone(),
                method: DetectionMethod::Logo { distance },
            })
        })
    }
}

impl Default for IssuerDetector {
    fn default() -> Self {
        Self::new(DetectorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eduvault_core::PerceptualHash;
    use image::{Rgb, RgbImage};

    fn certificate(side: u32) -> DynamicImage {
        let cell = side / 8;
        DynamicImage::ImageRgb8(RgbImage::from_fn(side, side, |x, y| {
            let idx = (y / cell) * 8 + x / cell;
            let v = (idx.wrapping_mul(2_654_435_761) >> 24) as u8;
            Rgb([v, v.wrapping_add(40), 255 - v])
        }))
    }

    fn detector_with_logo(phash: PerceptualHash) -> IssuerDetector {
        IssuerDetector::new(DetectorConfig {
            logos: vec![LogoTemplate {
                issuer_id: "unstop".to_string(),
                phash,
            }],
            ..DetectorConfig::default()
        })
    }

    #[test]
    fn test_keyword_detection_is_case_insensitive() {
        let detector = IssuerDetector::default();
        let detection = detector.detect("Certificate of Completion - UDEMY", None);
        assert_eq!(detection.issuer_id, "udemy");
        assert_eq!(
            detection.method,
            DetectionMethod::Keyword {
                keyword: "udemy".to_string()
            }
        );
    }

    #[test]
    fn test_first_issuer_in_order_wins() {
        let detector = IssuerDetector::default();
        let text = "This official Microsoft Azure certificate was issued via Udemy and Unstop";
        assert_eq!(detector.detect(text, None).issuer_id, "microsoft");
    }

    #[test]
    fn test_order_is_part_of_the_configuration() {
        let detector = IssuerDetector::new(DetectorConfig {
            issuers: vec![
                IssuerRule::new("udemy", &["udemy"]),
                IssuerRule::new("microsoft", &["Microsoft"]),
            ],
            ..DetectorConfig::default()
        });
        let text = "official microsoft certificate on udemy";
        assert_eq!(detector.detect(text, None).issuer_id, "udemy");
    }

    #[test]
    fn test_substring_match_inside_words() {
        let detector = IssuerDetector::default();
        // "iit" is an nptel keyword and matches inside longer words
        assert_eq!(detector.detect("IIT Madras elective", None).issuer_id, "nptel");
    }

    #[test]
    fn test_no_text_no_image_is_unknown() {
        let detector = IssuerDetector::default();
        let detection = detector.detect("", None);
        assert!(detection.is_unknown());
        assert_eq!(detection.method, DetectionMethod::None);
    }

    #[test]
    fn test_logo_fallback_matches_crop_hash() {
        let image = certificate(800);
        let crop_hash = compute_region_phash(&image, &CropRect::LOGO).unwrap();
        let detector = detector_with_logo(crop_hash);

        let detection = detector.detect("blurry text with no issuer", Some(&image));
        assert_eq!(detection.issuer_id, "unstop");
        assert_eq!(detection.method, DetectionMethod::Logo { distance: 0 });
    }

    #[test]
    fn test_logo_beyond_threshold_is_unknown() {
        let image = certificate(800);
        let crop_hash = compute_region_phash(&image, &CropRect::LOGO).unwrap();
        let opposite = PerceptualHash::from_bits(!crop_hash.bits());
        let detector = detector_with_logo(opposite);

        assert!(detector.detect("", Some(&image)).is_unknown());
    }

    #[test]
    fn test_keywords_take_precedence_over_logo() {
        let image = certificate(800);
        let crop_hash = compute_region_phash(&image, &CropRect::LOGO).unwrap();
        let detector = detector_with_logo(crop_hash);

        assert_eq!(detector.detect("NPTEL online course", Some(&image)).issuer_id, "nptel");
    }
}

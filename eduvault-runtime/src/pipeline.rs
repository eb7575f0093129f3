//! Verification Pipeline
//!
//! One run per certificate:
//! - Detector and match engine share the registry and run in one task
//! - Forensics and anomaly scoring run in their own tasks
//! - All three results are joined before the aggregator executes
//!
//! A failing producer does not stop the others from finishing, but the run
//! only produces a report when all three succeeded.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use image::DynamicImage;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::task::{self, JoinError};
use tracing::{debug, info};
use uuid::Uuid;

use eduvault_core::{
    flatten_record, AggregateVerdict, Aggregator, AnomalyResult, ForensicsResult, PhashResult,
    TrustConfig,
};
use eduvault_registry::IssuerRegistry;
use eduvault_signals::{
    AnomalyScorer, Detection, ForensicsScorer, IssuerDetector, MatchEngine, PdfDocument,
    SignalError,
};

/// Errors that abort a verification run
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("signal failed: {0}")]
    Signal(#[from] SignalError),

    #[error("image could not be decoded: {0}")]
    Image(#[from] image::ImageError),

    #[error("signal task failed: {0}")]
    Join(#[from] JoinError),
}

/// Collaborator outputs for one certificate
///
/// Every input is optional; a missing one makes its signal inconclusive
/// instead of failing the run.
#[derive(Debug, Clone, Default)]
pub struct VerificationInput {
    /// OCR text, `None` when no text was found
    pub ocr_text: Option<String>,
    /// Rasterised certificate
    pub image: Option<DynamicImage>,
    /// Encoded image as received, digested into the report
    pub image_bytes: Option<Vec<u8>>,
    /// Parsed source PDF
    pub pdf: Option<PdfDocument>,
    /// Feature-extractor embedding
    pub embedding: Option<Vec<f32>>,
}

impl VerificationInput {
    /// Decode an encoded certificate image and keep its bytes for the digest
    pub fn from_image_bytes(bytes: Vec<u8>) -> Result<Self, PipelineError> {
        let image = image::load_from_memory(&bytes)?;
        Ok(Self {
            image: Some(image),
            image_bytes: Some(bytes),
            ..Self::default()
        })
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.ocr_text = Some(text.into());
        self
    }

    pub fn with_image(mut self, image: DynamicImage) -> Self {
        self.image = Some(image);
        self
    }

    pub fn with_pdf(mut self, pdf: PdfDocument) -> Self {
        self.pdf = Some(pdf);
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }
}

/// Everything one verification run produced
#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    pub run_id: Uuid,
    pub created_at: DateTime<Utc>,
    /// SHA-256 of the encoded certificate image, when its bytes were supplied
    pub image_sha256: Option<String>,
    pub detection: Detection,
    pub pdf: ForensicsResult,
    pub phash: PhashResult,
    pub anomaly: AnomalyResult,
    pub aggregate: AggregateVerdict,
}

impl VerificationReport {
    /// Dotted key/value view for printing and logging
    pub fn to_flat_map(&self) -> Result<BTreeMap<String, Value>, serde_json::Error> {
        flatten_record(self)
    }
}

/// Certificate verifier
///
/// Components are shared read-only between runs; the registry serialises
/// its own writes.
#[derive(Clone)]
pub struct Verifier {
    detector: Arc<IssuerDetector>,
    matcher: Arc<MatchEngine>,
    forensics: Arc<ForensicsScorer>,
    anomaly: Arc<AnomalyScorer>,
    aggregator: Aggregator,
}

impl Verifier {
    /// Assemble a verifier around an already loaded anomaly scorer
    pub fn new(config: &TrustConfig, registry: Arc<IssuerRegistry>, anomaly: AnomalyScorer) -> Self {
        let matcher = MatchEngine::new(registry, config.matching.clone())
            .with_issuer_names(&config.detector.issuers);

        Self {
            detector: Arc::new(IssuerDetector::new(config.detector.clone())),
            matcher: Arc::new(matcher),
            forensics: Arc::new(ForensicsScorer::new(config.forensics.clone())),
            anomaly: Arc::new(anomaly),
            aggregator: Aggregator::new(config.aggregate.clone()),
        }
    }

    /// Load the anomaly model named by the configuration and assemble a verifier
    pub fn from_config(
        config: &TrustConfig,
        registry: Arc<IssuerRegistry>,
    ) -> Result<Self, PipelineError> {
        let anomaly = AnomalyScorer::load(&config.anomaly)?;
        Ok(Self::new(config, registry, anomaly))
    }

    pub fn registry(&self) -> &Arc<IssuerRegistry> {
        self.matcher.registry()
    }

    /// Run every signal and fuse them into a report
    pub async fn verify(&self, input: VerificationInput) -> Result<VerificationReport, PipelineError> {
        let run_id = Uuid::new_v4();
        info!("Verification {} started", run_id);

        let image_sha256 = input
            .image_bytes
            .as_deref()
            .map(|bytes| format!("{:x}", Sha256::digest(bytes)));

        let visual = {
            let detector = Arc::clone(&self.detector);
            let matcher = Arc::clone(&self.matcher);
            let text = input.ocr_text.unwrap_or_default();
            let image = input.image;
            task::spawn_blocking(move || detect_and_match(&detector, &matcher, &text, image.as_ref()))
        };

        let forensic = {
            let scorer = Arc::clone(&self.forensics);
            let pdf = input.pdf;
            task::spawn_blocking(move || scorer.score_optional(pdf.as_ref()))
        };

        let anomalous = {
            let scorer = Arc::clone(&self.anomaly);
            let embedding = input.embedding;
            task::spawn_blocking(move || scorer.score_optional(embedding.as_deref()))
        };

        let (visual, forensic, anomalous) = tokio::join!(visual, forensic, anomalous);
        let (detection, phash) = visual??;
        let pdf = forensic?;
        let anomaly = anomalous??;

        debug!(
            "Signals joined: pdf={} phash={} anomaly={}",
            pdf.verdict, phash.verdict, anomaly.verdict
        );

        let aggregate = self.aggregator.combine(&pdf, &phash, &anomaly);
        info!(
            "Verification {} finished: trust {} ({})",
            run_id, aggregate.trust_score, aggregate.final_verdict
        );

        Ok(VerificationReport {
            run_id,
            created_at: Utc::now(),
            image_sha256,
            detection,
            pdf,
            phash,
            anomaly,
            aggregate,
        })
    }
}

fn detect_and_match(
    detector: &IssuerDetector,
    matcher: &MatchEngine,
    text: &str,
    image: Option<&DynamicImage>,
) -> Result<(Detection, PhashResult), SignalError> {
    let detection = detector.detect(text, image);
    let phash = match image {
        Some(image) => matcher.evaluate(&detection.issuer_id, image)?,
        None => {
            debug!("No image, perceptual match unavailable");
            PhashResult::unavailable(&detection.issuer_id)
        }
    };
    Ok((detection, phash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use eduvault_core::{
        AnomalyConfig, AnomalyVerdict, FinalVerdict, ForensicVerdict, PhashVerdict,
    };
    use eduvault_signals::{ContentBlock, OutlierModel, PdfPage, TextSpan};
    use image::{Rgb, RgbImage};

    /// Decision value is the first embedding component
    struct Echo;

    impl OutlierModel for Echo {
        fn n_features(&self) -> usize {
            4
        }

        fn decision_function(&self, embedding: &[f32]) -> f64 {
            f64::from(embedding[0])
        }
    }

    fn verifier() -> Verifier {
        let mut config = TrustConfig::default();
        // synthetic images must not fall back to a logo match
        config.detector.logos.clear();
        let registry = Arc::new(IssuerRegistry::open_in_memory().unwrap());
        let anomaly = AnomalyScorer::new(
            Arc::new(Echo),
            AnomalyConfig {
                embedding_dim: 4,
                ..AnomalyConfig::default()
            },
        )
        .unwrap();
        Verifier::new(&config, registry, anomaly)
    }

    fn certificate() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(320, 240, |x, y| {
            let idx = (y / 30) * 8 + x / 40;
            let v = (idx.wrapping_mul(2_654_435_761) >> 24) as u8;
            Rgb([v, v, v])
        }))
    }

    fn clean_pdf() -> PdfDocument {
        let mut blocks = vec![ContentBlock::text(vec![TextSpan::new("Jane Doe", "Lato-Bold", 30.0)])];
        blocks.push(ContentBlock::text(vec![TextSpan::new("has completed", "Lato", 12.0)]));
        blocks.push(ContentBlock::text(vec![TextSpan::new("Rust Fundamentals", "Lato", 14.0)]));
        PdfDocument {
            pages: vec![PdfPage {
                blocks,
                fonts: vec!["Lato-Bold".into(), "Lato".into()],
                image_count: 0,
            }],
            ..PdfDocument::default()
        }
    }

    fn genuine_input() -> VerificationInput {
        VerificationInput::default()
            .with_text("Certificate of completion - Udemy")
            .with_image(certificate())
            .with_pdf(clean_pdf())
            .with_embedding(vec![0.5, 0.0, 0.0, 0.0])
    }

    #[tokio::test]
    async fn test_first_run_creates_baseline_then_matches() {
        let verifier = verifier();

        let first = verifier.verify(genuine_input()).await.unwrap();
        assert_eq!(first.detection.issuer_id, "udemy");
        assert_eq!(first.phash.verdict, PhashVerdict::BaselineCreated);
        assert_eq!(first.pdf.verdict, ForensicVerdict::LikelyOriginal);
        assert_eq!(first.anomaly.verdict, AnomalyVerdict::Normal);
        // fresh baseline counts as maximal phash risk
        assert_eq!(first.aggregate.trust_score, 65.0);
        assert_eq!(first.aggregate.final_verdict, FinalVerdict::MostlyTrusted);

        let second = verifier.verify(genuine_input()).await.unwrap();
        assert_eq!(second.phash.verdict, PhashVerdict::VisuallyMatching);
        assert_eq!(second.phash.hamming_distance, Some(0));
        assert_eq!(second.aggregate.trust_score, 95.0);
        assert_eq!(second.aggregate.final_verdict, FinalVerdict::HighlyTrusted);
        assert_ne!(first.run_id, second.run_id);
    }

    #[tokio::test]
    async fn test_missing_inputs_are_inconclusive() {
        let report = verifier().verify(VerificationInput::default()).await.unwrap();

        assert!(report.detection.is_unknown());
        assert_eq!(report.phash.verdict, PhashVerdict::Unavailable);
        assert_eq!(report.pdf.verdict, ForensicVerdict::Unknown);
        assert_eq!(report.anomaly.verdict, AnomalyVerdict::Unavailable);
        assert_eq!(report.aggregate.components.phash_risk, 1.0);
        assert_eq!(report.aggregate.components.cnn_risk, 0.5);
        assert_eq!(report.aggregate.trust_score, 57.5);
        assert_eq!(report.aggregate.final_verdict, FinalVerdict::NeedsReview);
        assert!(report.image_sha256.is_none());
    }

    #[tokio::test]
    async fn test_unknown_issuer_gets_placeholder() {
        let verifier = verifier();
        let input = VerificationInput::default().with_image(certificate());

        let report = verifier.verify(input).await.unwrap();
        assert_eq!(report.phash.verdict, PhashVerdict::UnknownBaselineCreated);
        assert_eq!(report.phash.issuer_id, "unknown_1");
        assert!(verifier.registry().get("unknown_1").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_concurrent_unknown_runs_get_distinct_ids() {
        let verifier = verifier();
        let runs = (0..4).map(|_| {
            let verifier = verifier.clone();
            tokio::spawn(async move {
                let input = VerificationInput::default().with_image(certificate());
                verifier.verify(input).await.unwrap().phash.issuer_id
            })
        });

        let mut ids = Vec::new();
        for run in runs.collect::<Vec<_>>() {
            ids.push(run.await.unwrap());
        }
        ids.sort();
        assert_eq!(ids, vec!["unknown_1", "unknown_2", "unknown_3", "unknown_4"]);
    }

    #[tokio::test]
    async fn test_bad_embedding_fails_the_run() {
        let input = genuine_input().with_embedding(vec![0.1; 3]);
        let err = verifier().verify(input).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Signal(SignalError::EmbeddingDimension { .. })
        ));
    }

    #[tokio::test]
    async fn test_report_flattens_with_digest() {
        let mut bytes = Vec::new();
        certificate()
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        let input = VerificationInput::from_image_bytes(bytes.clone())
            .unwrap()
            .with_text("NPTEL");

        let report = verifier().verify(input).await.unwrap();
        let expected = format!("{:x}", Sha256::digest(&bytes));
        assert_eq!(report.image_sha256.as_deref(), Some(expected.as_str()));

        let flat = report.to_flat_map().unwrap();
        assert_eq!(flat["detection.issuer_id"], "nptel");
        assert_eq!(flat["detection.method"], "keyword");
        assert_eq!(flat["phash.verdict"], "BASELINE_CREATED");
        assert_eq!(flat["aggregate.components.phash_risk"], 1.0);
        assert!(flat.contains_key("aggregate.trust_score"));
        assert!(flat.contains_key("run_id"));
    }

    #[test]
    fn test_undecodable_bytes_are_rejected() {
        let err = VerificationInput::from_image_bytes(b"not an image".to_vec()).unwrap_err();
        assert!(matches!(err, PipelineError::Image(_)));
    }
}

//! PDF Forensics Scorer
//!
//! Looks for authoring traces around the holder's name, taken to be the
//! largest-font text span on the first page. Each cue either fires or not:
//! - producer/creator names a known editing tool (strong)
//! - the name span's font is not embedded (weak)
//! - the name span sits late in structural order (medium)
//! - the page carries raster images (weak)

use tracing::{debug, info};

use eduvault_core::{round_to, ForensicVerdict, ForensicsConfig, ForensicsResult};

use crate::{PdfDocument, PdfPage, TextSpan};

/// Reason reported when the first page holds no name candidate
pub const NAME_NOT_FOUND: &str = "Name text not found";

/// Reason reported when no document was supplied
pub const DOCUMENT_UNAVAILABLE: &str = "PDF document not available";

/// Scores PDF authoring metadata and structure
#[derive(Debug, Clone, Default)]
pub struct ForensicsScorer {
    config: ForensicsConfig,
}

impl ForensicsScorer {
    pub fn new(config: ForensicsConfig) -> Self {
        Self { config }
    }

    /// Score a document, or report UNKNOWN when none was produced upstream
    pub fn score_optional(&self, doc: Option<&PdfDocument>) -> ForensicsResult {
        match doc {
            Some(doc) => self.score(doc),
            None => ForensicsResult::unknown(DOCUMENT_UNAVAILABLE),
        }
    }

    pub fn score(&self, doc: &PdfDocument) -> ForensicsResult {
        let cfg = &self.config;
        let mut score = 0;
        let mut reasons = Vec::new();

        let tool = doc.authoring_tool();
        if let Some(sig) = cfg.editing_tools.iter().find(|sig| tool.contains(&sig.to_lowercase())) {
            score += cfg.producer_weight;
            reasons.push(format!("PDF metadata indicates {sig}"));
        }

        let Some(page) = doc.pages.first() else {
            return ForensicsResult::unknown(NAME_NOT_FOUND);
        };
        let Some(name) = self.find_name_span(page) else {
            return ForensicsResult::unknown(NAME_NOT_FOUND);
        };
        let name_text = name.text.trim().to_string();

        if !doc.embedded_fonts().any(|f| f.contains(name.font.as_str())) {
            score += cfg.font_weight;
            reasons.push("Name font not embedded".to_string());
        }

        if let Some(index) = last_block_with_text(page, &name_text) {
            let late_after = page.blocks.len() as f64 * cfg.late_order_fraction;
            debug!("Name block {} of {} (late after {:.1})", index, page.blocks.len(), late_after);
            if index as f64 > late_after {
                score += cfg.late_order_weight;
                reasons.push("Name text added late in PDF structure".to_string());
            }
        }

        if page.has_raster() {
            score += cfg.raster_weight;
            reasons.push("Raster elements near text".to_string());
        }

        let verdict = if score >= cfg.edited_threshold {
            ForensicVerdict::LikelyEdited
        } else if score >= cfg.suspicious_threshold {
            ForensicVerdict::Suspicious
        } else {
            ForensicVerdict::LikelyOriginal
        };

        info!("PDF forensics: {} (score {}, {} cue(s))", verdict, score, reasons.len());

        ForensicsResult {
            verdict,
            forensic_score: score,
            name_text: Some(name_text),
            name_font: Some(name.font.clone()),
            name_size: Some(round_to(name.size, 2)),
            reasons,
        }
    }

    /// Largest span whose trimmed text is long enough; first one wins on ties
    fn find_name_span<'a>(&self, page: &'a PdfPage) -> Option<&'a TextSpan> {
        page.spans()
            .filter(|span| span.text.trim().chars().count() >= self.config.min_name_chars)
            .fold(None, |best: Option<&TextSpan>, span| match best {
                Some(b) if b.size >= span.size => Some(b),
                _ => Some(span),
            })
    }
}

/// Index (over all blocks) of the last block holding a span with this text
fn last_block_with_text(page: &PdfPage, text: &str) -> Option<usize> {
    page.blocks
        .iter()
        .enumerate()
        .filter(|(_, block)| block.spans().any(|s| s.text.trim() == text))
        .map(|(i, _)| i)
        .last()
}

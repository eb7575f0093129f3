//! Parsed PDF document handle
//!
//! The PDF parser is a collaborator; it hands over this structure (usually
//! as JSON): document metadata, and per page the content blocks in
//! structural order, the font names the page references, and its raster
//! image count.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::SignalError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PdfDocument {
    #[serde(default)]
    pub metadata: PdfMetadata,
    #[serde(default)]
    pub pages: Vec<PdfPage>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PdfMetadata {
    #[serde(default)]
    pub producer: Option<String>,
    #[serde(default)]
    pub creator: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PdfPage {
    /// Content blocks in document structural order
    #[serde(default)]
    pub blocks: Vec<ContentBlock>,
    /// Base names of the fonts embedded for this page
    #[serde(default)]
    pub fonts: Vec<String>,
    /// Raster images referenced by the page
    #[serde(default)]
    pub image_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { lines: Vec<TextLine> },
    Image,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextLine {
    pub spans: Vec<TextSpan>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextSpan {
    pub text: String,
    #[serde(default = "unknown_font")]
    pub font: String,
    #[serde(default)]
    pub size: f64,
}

fn unknown_font() -> String {
    "UNKNOWN".to_string()
}

impl TextSpan {
    pub fn new(text: &str, font: &str, size: f64) -> Self {
        Self {
            text: text.to_string(),
            font: font.to_string(),
            size,
        }
    }
}

impl ContentBlock {
    /// Spans of a text block, nothing for an image block
    pub fn spans(&self) -> impl Iterator<Item = &TextSpan> {
        let lines: &[TextLine] = match self {
            ContentBlock::Text { lines } => lines,
            ContentBlock::Image => &[],
        };
        lines.iter().flat_map(|line| line.spans.iter())
    }

    pub fn text(spans: Vec<TextSpan>) -> Self {
        ContentBlock::Text {
            lines: vec![TextLine { spans }],
        }
    }
}

impl PdfPage {
    pub fn spans(&self) -> impl Iterator<Item = &TextSpan> {
        self.blocks.iter().flat_map(|b| b.spans())
    }

    pub fn has_raster(&self) -> bool {
        self.image_count > 0 || self.blocks.iter().any(|b| matches!(b, ContentBlock::Image))
    }
}

impl PdfDocument {
    pub fn from_json_str(content: &str) -> Result<Self, SignalError> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SignalError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| SignalError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&content)
    }

    /// Producer and creator, concatenated and lowercased
    pub fn authoring_tool(&self) -> String {
        let producer = self.metadata.producer.as_deref().unwrap_or_default();
        let creator = self.metadata.creator.as_deref().unwrap_or_default();
        format!("{producer}{creator}").to_lowercase()
    }

    /// Font names embedded anywhere in the document
    pub fn embedded_fonts(&self) -> impl Iterator<Item = &str> {
        self.pages.iter().flat_map(|p| p.fonts.iter().map(String::as_str))
    }
}

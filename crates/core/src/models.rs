use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{DeserializeFromStr, SerializeDisplay};
use std::fmt;
use std::str::FromStr;

/// Line number of text recovered by OCR from an embedded image, written as `image-N`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, SerializeDisplay, DeserializeFromStr)]
pub struct ImageLine(pub u32);

impl fmt::Display for ImageLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "image-{}", self.0)
    }
}

impl FromStr for ImageLine {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        value
            .strip_prefix("image-")
            .and_then(|number| number.parse::<u32>().ok())
            .filter(|number| *number >= 1)
            .map(ImageLine)
            .ok_or_else(|| format!("expected image-<N>, got {value:?}"))
    }
}

/// Line component of a [`Locator`]: a body-text line number or an OCR line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LineRef {
    Text(u32),
    Image(ImageLine),
}

impl LineRef {
    pub fn image(number: u32) -> Self {
        LineRef::Image(ImageLine(number))
    }
}

impl fmt::Display for LineRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LineRef::Text(number) => write!(f, "{number}"),
            LineRef::Image(image) => write!(f, "{image}"),
        }
    }
}

/// Provenance of a piece of text: file base name, 1-based page and line.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Locator {
    pub file: String,
    pub page: u32,
    pub line: LineRef,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextLine {
    pub text: String,
    pub locator: Locator,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub locator: Locator,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: String,
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
    pub indexed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryHit {
    pub chunk: Chunk,
    pub score: f64,
}

pub type QueryResult = Vec<QueryHit>;

pub const AI_GENERATED_SOURCE: &str = "AI-generated";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub source: String,
    pub page: Option<u32>,
    pub line: Option<LineRef>,
}

impl Citation {
    pub fn ai_generated() -> Self {
        Self {
            source: AI_GENERATED_SOURCE.to_string(),
            page: None,
            line: None,
        }
    }
}

impl From<&Locator> for Citation {
    fn from(locator: &Locator) -> Self {
        Self {
            source: locator.file.clone(),
            page: Some(locator.page),
            line: Some(locator.line),
        }
    }
}

impl fmt::Display for Citation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let page = self
            .page
            .map(|page| page.to_string())
            .unwrap_or_else(|| "None".to_string());
        let line = self
            .line
            .map(|line| line.to_string())
            .unwrap_or_else(|| "None".to_string());
        write!(f, "Source: {}, Page: {}, Line: {}", self.source, page, line)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub text: String,
    pub citations: Vec<Citation>,
}

/// One record of the per-file chunk manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestRecord {
    pub text: String,
    pub metadata: Locator,
}

impl From<&Chunk> for ManifestRecord {
    fn from(chunk: &Chunk) -> Self {
        Self {
            text: chunk.text.clone(),
            metadata: chunk.locator.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestionOptions {
    pub chunk_max_chars: usize,
    pub chunk_overlap_chars: usize,
    pub top_k: usize,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            chunk_max_chars: 500,
            chunk_overlap_chars: 50,
            top_k: 3,
        }
    }
}

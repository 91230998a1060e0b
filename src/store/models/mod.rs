
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Source format a document's text was extracted from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Text,
    Markdown,
    Html,
    Csv,
}

impl DocumentFormat {
    /// Resolve a format from a file name's extension, if it is one we extract
    #[inline]
    pub fn from_filename(filename: &str) -> Option<Self> {
        let extension = Path::new(filename).extension()?.to_str()?;
        Self::from_extension(extension)
    }

    #[inline]
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension
            .trim_start_matches('.')
            .to_ascii_lowercase()
            .as_str()
        {
            "txt" | "text" => Some(Self::Text),
            "md" | "markdown" => Some(Self::Markdown),
            "html" | "htm" => Some(Self::Html),
            "csv" => Some(Self::Csv),
            _ => None,
        }
    }

    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Markdown => "markdown",
            Self::Html => "html",
            Self::Csv => "csv",
        }
    }
}

impl fmt::Display for DocumentFormat {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentFormat {
    type Err = String;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "markdown" => Ok(Self::Markdown),
            "html" => Ok(Self::Html),
            "csv" => Ok(Self::Csv),
            other => Err(format!("unknown document format '{}'", other)),
        }
    }
}

/// An ingested document. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub filename: String,
    pub format: DocumentFormat,
    pub ingested_at: DateTime<Utc>,
    /// Number of chunks; their sequence indices are exactly `0..chunk_count`
    pub chunk_count: u32,
}

/// A chunk as emitted by the chunker, before it is bound to a document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDraft {
    pub sequence_index: u32,
    pub text: String,
    /// Offset of the first character, counted in `char`s of the chunked text
    pub char_start: usize,
    /// Offset one past the last character
    pub char_end: usize,
    pub token_count: usize,
}

impl ChunkDraft {
    #[inline]
    pub fn into_chunk(self, document_id: &str) -> Chunk {
        Chunk {
            id: chunk_id(document_id, self.sequence_index),
            document_id: document_id.to_string(),
            sequence_index: self.sequence_index,
            text: self.text,
            char_start: self.char_start,
            char_end: self.char_end,
            token_count: self.token_count,
        }
    }
}

/// A stored chunk. Never mutated; lives exactly as long as its document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub sequence_index: u32,
    pub text: String,
    pub char_start: usize,
    pub char_end: usize,
    pub token_count: usize,
}

/// Stable chunk identifier derived from its position in the document
#[inline]
pub fn chunk_id(document_id: &str, sequence_index: u32) -> String {
    format!("{}_{}", document_id, sequence_index)
}

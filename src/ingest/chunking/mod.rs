#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::store::models::ChunkDraft;
use crate::{RagError, Result};

const PARAGRAPH_BREAKS: &[&str] = &["\n\n"];
const LINE_BREAKS: &[&str] = &["\n"];
const SENTENCE_ENDS: &[&str] = &[". ", "! ", "? ", ".\n", "!\n", "?\n"];
const WORD_BREAKS: &[&str] = &[" ", "\t", "\n"];

/// Where the chunker prefers to cut when a chunk would exceed `max_size`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundaryPolicy {
    /// Paragraph, then line, then sentence, then word boundaries
    #[default]
    Paragraph,
    /// Sentence, then word boundaries
    Sentence,
    /// Word boundaries only
    Word,
    /// Always cut at exactly `max_size` characters
    Fixed,
}

impl BoundaryPolicy {
    /// Separator tiers in order of preference
    fn tiers(self) -> &'static [&'static [&'static str]] {
        match self {
            Self::Paragraph => &[PARAGRAPH_BREAKS, LINE_BREAKS, SENTENCE_ENDS, WORD_BREAKS],
            Self::Sentence => &[SENTENCE_ENDS, WORD_BREAKS],
            Self::Word => &[WORD_BREAKS],
            Self::Fixed => &[],
        }
    }
}

/// Configuration for text chunking. Sizes are counted in characters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum chunk length
    pub max_size: usize,
    /// Characters repeated from the tail of one chunk at the head of the next
    pub overlap: usize,
    /// Preferred cut points
    pub boundary: BoundaryPolicy,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            max_size: 600,
            overlap: 100,
            boundary: BoundaryPolicy::Paragraph,
        }
    }
}

impl ChunkingConfig {
    #[inline]
    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(RagError::Validation(
                "chunk max_size must be positive".to_string(),
            ));
        }
        if self.overlap >= self.max_size {
            return Err(RagError::Validation(format!(
                "chunk overlap ({}) must be smaller than max_size ({})",
                self.overlap, self.max_size
            )));
        }
        Ok(())
    }
}

/// Character-indexed view of the text being chunked
struct CharIndex<'a> {
    text: &'a str,
    /// Byte offset of every char, plus `text.len()` as a sentinel
    offsets: Vec<usize>,
}

impl<'a> CharIndex<'a> {
    fn new(text: &'a str) -> Self {
        let offsets = text
            .char_indices()
            .map(|(offset, _)| offset)
            .chain(std::iter::once(text.len()))
            .collect();
        Self { text, offsets }
    }

    fn slice(&self, start: usize, end: usize) -> &'a str {
        self.text
            .get(self.offsets[start]..self.offsets[end])
            .unwrap_or_default()
    }

    fn char_at_byte(&self, byte: usize) -> Option<usize> {
        self.offsets.binary_search(&byte).ok()
    }
}

/// Split text into ordered, overlapping chunks.
///
/// Chunk `i + 1` starts exactly `overlap` characters before chunk `i` ends,
/// and each chunk's text is the exact `[char_start, char_end)` slice of the
/// input. Leading and trailing whitespace of the whole text is skipped.
/// Empty or whitespace-only text yields no chunks.
#[inline]
pub fn chunk_text(text: &str, config: &ChunkingConfig) -> Result<Vec<ChunkDraft>> {
    config.validate()?;

    let index = CharIndex::new(text);
    let chars: Vec<char> = text.chars().collect();
    let Some(first) = chars.iter().position(|c| !c.is_whitespace()) else {
        return Ok(Vec::new());
    };
    let last = chars
        .iter()
        .rposition(|c| !c.is_whitespace())
        .map_or(first, |p| p + 1);

    let mut drafts = Vec::new();
    let mut start = first;
    loop {
        let end = if last - start <= config.max_size {
            last
        } else {
            find_boundary(&index, start, config)
        };

        let chunk = index.slice(start, end);
        drafts.push(ChunkDraft {
            sequence_index: u32::try_from(drafts.len()).map_err(|_| {
                RagError::Validation("document produces too many chunks".to_string())
            })?,
            text: chunk.to_string(),
            char_start: start,
            char_end: end,
            token_count: estimate_token_count(chunk),
        });

        if end == last {
            break;
        }
        // find_boundary never cuts within the first `overlap + 1` characters
        start = end - config.overlap;
    }

    debug!(
        "Chunked {} characters into {} chunks",
        last - first,
        drafts.len()
    );

    Ok(drafts)
}

/// Choose where the chunk starting at `start` ends.
///
/// Cuts land just after a separator, searching the upper part of the window
/// for each tier in turn; without any separator the cut is a hard one at
/// `start + max_size`.
fn find_boundary(index: &CharIndex<'_>, start: usize, config: &ChunkingConfig) -> usize {
    let upper = start + config.max_size;
    let lower = start + (config.overlap + 1).max(config.max_size / 2);
    let window = index.slice(start, upper);
    let window_offset = index.offsets[start];

    for tier in config.boundary.tiers() {
        let best = tier
            .iter()
            .filter_map(|separator| {
                let found = window.rfind(separator)?;
                index.char_at_byte(window_offset + found + separator.len())
            })
            .filter(|end| *end >= lower)
            .max();

        if let Some(end) = best {
            return end;
        }
    }

    upper
}

/// Estimate token count using a simple heuristic
/// This is a rough approximation - actual tokenization would be more accurate
#[inline]
pub fn estimate_token_count(text: &str) -> usize {
    // Rough heuristic: 1 token ≈ 0.75 words for English text
    // Add extra tokens for punctuation and special characters
    let word_count = text.split_whitespace().count();
    let punct_count = text.chars().filter(|c| c.is_ascii_punctuation()).count();

    (punct_count as f64).mul_add(0.1, word_count as f64 / 0.75) as usize
}

// Prompt assembly
// Renders a context set into a budgeted prompt for the answer synthesizer

#[cfg(test)]
mod tests;

use std::ops::RangeInclusive;

use tracing::{debug, warn};

use crate::retrieval::{ContextBlock, ContextSet, RetrievalHit};
use crate::store::Chunk;
use crate::{RagError, Result};

pub const DEFAULT_INSTRUCTION: &str = "Answer the question using ONLY the information in the context.\n\
If the answer is not in the context, say clearly that you do not know.";

const BLOCK_SEPARATOR: &str = "\n---\n";
const TRUNCATION_MARKER: &str = "\n\n[... context truncated to fit the prompt budget ...]";

/// Where one rendered block came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSpan {
    pub document_id: String,
    pub filename: String,
    pub sequence: RangeInclusive<u32>,
    /// How many chunks in the span were direct matches
    pub matched: usize,
}

/// A prompt ready for the answer synthesizer
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledPrompt {
    pub prompt: String,
    /// Blocks that made it into the prompt, in prompt order
    pub sources: Vec<SourceSpan>,
    /// Blocks dropped to satisfy the budget
    pub trimmed_blocks: usize,
    /// The similarity matches behind the context
    pub hits: Vec<RetrievalHit>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptAssembler {
    instruction: String,
}

impl Default for PromptAssembler {
    #[inline]
    fn default() -> Self {
        Self::new(DEFAULT_INSTRUCTION)
    }
}

struct RenderedBlock {
    text: String,
    chars: usize,
    source: SourceSpan,
}

impl PromptAssembler {
    #[inline]
    pub fn new(instruction: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
        }
    }

    #[inline]
    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    /// Render `context` and `query` into a prompt of at most `budget` characters.
    ///
    /// Blocks keep the context set's order. When everything does not fit,
    /// whole blocks are dropped from the end; a chunk is never cut.
    #[inline]
    pub fn assemble(
        &self,
        context: &ContextSet,
        query: &str,
        budget: usize,
    ) -> Result<AssembledPrompt> {
        let query = query.trim();
        if query.is_empty() {
            return Err(RagError::Validation("query must not be empty".to_string()));
        }
        if budget == 0 {
            return Err(RagError::Validation(
                "prompt budget must be positive".to_string(),
            ));
        }
        if context.is_empty() {
            return Err(RagError::EmptyContext);
        }

        let mut blocks: Vec<RenderedBlock> = context
            .blocks
            .iter()
            .filter_map(render_block)
            .collect();

        let frame_chars = self.render(&[], query, false).chars().count();
        let separator_chars = BLOCK_SEPARATOR.chars().count();
        let marker_chars = TRUNCATION_MARKER.chars().count();

        let full_context_chars = blocks.iter().map(|block| block.chars).sum::<usize>()
            + separator_chars * blocks.len().saturating_sub(1);

        let kept = if frame_chars + full_context_chars <= budget {
            blocks.len()
        } else {
            // Something is dropped, so the marker is part of every candidate prompt
            let mut kept = 0;
            let mut context_chars = 0;
            for (position, block) in blocks.iter().enumerate().take(blocks.len() - 1) {
                let separator = if position == 0 { 0 } else { separator_chars };
                let with_block = context_chars + separator + block.chars;
                if frame_chars + with_block + marker_chars > budget {
                    break;
                }
                context_chars = with_block;
                kept = position + 1;
            }
            kept
        };

        if kept == 0 {
            let marker = if blocks.len() > 1 { marker_chars } else { 0 };
            let required = frame_chars + blocks.first().map_or(0, |block| block.chars) + marker;
            warn!(
                "Prompt budget of {} characters cannot fit the first block ({} needed)",
                budget, required
            );
            return Err(RagError::BudgetExhausted { budget, required });
        }

        let trimmed_blocks = blocks.len() - kept;
        blocks.truncate(kept);
        let prompt = self.render(&blocks, query, trimmed_blocks > 0);

        if trimmed_blocks > 0 {
            debug!("Trimmed {} blocks to fit the prompt budget", trimmed_blocks);
        }
        debug!(
            "Assembled prompt of {} characters from {} blocks",
            prompt.chars().count(),
            blocks.len()
        );

        Ok(AssembledPrompt {
            prompt,
            sources: blocks.into_iter().map(|block| block.source).collect(),
            trimmed_blocks,
            hits: context.hits.clone(),
        })
    }

    fn render(&self, blocks: &[RenderedBlock], query: &str, truncated: bool) -> String {
        let context = blocks
            .iter()
            .map(|block| block.text.as_str())
            .collect::<Vec<_>>()
            .join(BLOCK_SEPARATOR);
        let marker = if truncated { TRUNCATION_MARKER } else { "" };

        format!(
            "{}\n\nContext:\n{}{}\n\nQuestion:\n{}\n\nAnswer:",
            self.instruction, context, marker, query
        )
    }
}

fn render_block(block: &ContextBlock) -> Option<RenderedBlock> {
    let sequence = block.span()?;
    let body = stitch_chunks(block.chunks.iter().map(|c| &c.chunk));
    let text = format!(
        "[Source: {}, chunks {}-{}]\n{}",
        block.filename,
        sequence.start(),
        sequence.end(),
        body.trim()
    );

    Some(RenderedBlock {
        chars: text.chars().count(),
        text,
        source: SourceSpan {
            document_id: block.document_id.clone(),
            filename: block.filename.clone(),
            sequence,
            matched: block
                .chunks
                .iter()
                .filter(|c| c.provenance.is_matched())
                .count(),
        },
    })
}

/// Join consecutive chunks, dropping the text each one repeats from its predecessor
#[inline]
pub fn stitch_chunks<'a>(chunks: impl IntoIterator<Item = &'a Chunk>) -> String {
    let mut text = String::new();
    let mut covered_until: Option<usize> = None;

    for chunk in chunks {
        let repeated = covered_until.map_or(0, |end| end.saturating_sub(chunk.char_start));
        text.extend(chunk.text.chars().skip(repeated));
        covered_until = Some(covered_until.map_or(chunk.char_end, |end| end.max(chunk.char_end)));
    }

    text
}

// Retrieval module
// Semantic search followed by neighbor expansion within each matched document


use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::embeddings::EmbeddingGateway;
use crate::gateway::call_with_timeout;
use crate::store::{Chunk, ChunkStore, VectorIndex};
use crate::{RagError, Result};

/// One retrieval query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalRequest {
    pub query: String,
    /// Number of nearest chunks to match
    pub k: usize,
    /// Neighbors pulled in on each side of a match; 0 disables expansion
    pub window: u32,
    /// Restrict matches to one document
    pub document_id: Option<String>,
}

impl RetrievalRequest {
    #[inline]
    pub fn new(query: impl Into<String>, k: usize, window: u32) -> Self {
        Self {
            query: query.into(),
            k,
            window,
            document_id: None,
        }
    }

    #[inline]
    #[must_use]
    pub fn scoped_to(mut self, document_id: impl Into<String>) -> Self {
        self.document_id = Some(document_id.into());
        self
    }

    fn validate(&self) -> Result<()> {
        if self.query.trim().is_empty() {
            return Err(RagError::Validation("query must not be empty".to_string()));
        }
        if self.k == 0 {
            return Err(RagError::Validation("k must be positive".to_string()));
        }
        Ok(())
    }
}

/// A chunk returned directly by the similarity search
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalHit {
    pub chunk_id: String,
    pub document_id: String,
    pub sequence_index: u32,
    pub score: f32,
    /// 1 for the best match
    pub rank: usize,
}

/// How a chunk entered the context
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Provenance {
    Matched { score: f32, rank: usize },
    Expanded,
}

impl Provenance {
    #[inline]
    pub fn is_matched(&self) -> bool {
        matches!(self, Self::Matched { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContextChunk {
    pub chunk: Chunk,
    pub provenance: Provenance,
}

/// A contiguous run of chunks from one document
#[derive(Debug, Clone, PartialEq)]
pub struct ContextBlock {
    pub document_id: String,
    pub filename: String,
    pub chunks: Vec<ContextChunk>,
}

impl ContextBlock {
    /// Inclusive sequence range covered by the block
    #[inline]
    pub fn span(&self) -> Option<RangeInclusive<u32>> {
        let first = self.chunks.first()?.chunk.sequence_index;
        let last = self.chunks.last()?.chunk.sequence_index;
        Some(first..=last)
    }
}

/// Matched chunks plus their neighbors, ordered for reading.
///
/// Blocks are grouped by document, documents ordered by their best match,
/// and blocks within a document ordered by sequence index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextSet {
    pub hits: Vec<RetrievalHit>,
    pub blocks: Vec<ContextBlock>,
}

impl ContextSet {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.blocks.iter().all(|block| block.chunks.is_empty())
    }

    /// Every chunk in reading order
    #[inline]
    pub fn chunks(&self) -> impl Iterator<Item = &ContextChunk> {
        self.blocks.iter().flat_map(|block| block.chunks.iter())
    }
}

/// Merge the expansion windows around `positions` into disjoint ranges.
///
/// Windows are clamped to `[0, chunk_count - 1]`; windows that overlap or
/// touch collapse into one range. The result is ascending.
#[inline]
pub fn merge_windows(
    positions: &[u32],
    window: u32,
    chunk_count: u32,
) -> Vec<RangeInclusive<u32>> {
    let Some(max_index) = chunk_count.checked_sub(1) else {
        return Vec::new();
    };

    let mut sorted: Vec<u32> = positions
        .iter()
        .copied()
        .filter(|p| *p <= max_index)
        .collect();
    sorted.sort_unstable();

    let mut merged: Vec<RangeInclusive<u32>> = Vec::new();
    for position in sorted {
        let lo = position.saturating_sub(window);
        let hi = position.saturating_add(window).min(max_index);
        match merged.last_mut() {
            Some(last) if lo <= last.end().saturating_add(1) => {
                *last = *last.start()..=hi.max(*last.end());
            }
            _ => merged.push(lo..=hi),
        }
    }
    merged
}

/// Embeds queries, searches the vector index, and expands matches
#[derive(Clone)]
pub struct Retriever {
    chunks: Arc<dyn ChunkStore>,
    vectors: Arc<dyn VectorIndex>,
    embeddings: Arc<dyn EmbeddingGateway>,
    embed_timeout: Duration,
}

impl Retriever {
    #[inline]
    pub fn new(
        chunks: Arc<dyn ChunkStore>,
        vectors: Arc<dyn VectorIndex>,
        embeddings: Arc<dyn EmbeddingGateway>,
        embed_timeout: Duration,
    ) -> Self {
        Self {
            chunks,
            vectors,
            embeddings,
            embed_timeout,
        }
    }

    #[inline]
    pub async fn retrieve(&self, request: &RetrievalRequest) -> Result<ContextSet> {
        request.validate()?;

        if let Some(document_id) = request.document_id.as_deref() {
            if self.chunks.get_document(document_id).await?.is_none() {
                return Err(RagError::NotFound(format!("document '{}'", document_id)));
            }
        }

        let query_vector = call_with_timeout(
            "embedding",
            self.embed_timeout,
            self.embeddings.embed(&request.query),
        )
        .await?;

        let scored = self
            .vectors
            .search(&query_vector, request.k, request.document_id.as_deref())
            .await?;
        debug!("Vector search returned {} candidates", scored.len());

        let mut hits = Vec::with_capacity(scored.len());
        for candidate in scored {
            let Some(chunk) = self.chunks.get_chunk(&candidate.chunk_id).await? else {
                warn!(
                    "Vector index returned unknown chunk {}, skipping",
                    candidate.chunk_id
                );
                continue;
            };
            hits.push(RetrievalHit {
                chunk_id: chunk.id,
                document_id: chunk.document_id,
                sequence_index: chunk.sequence_index,
                score: candidate.score,
                rank: hits.len() + 1,
            });
        }

        let blocks = self.expand(&hits, request.window).await?;
        info!(
            "Retrieved {} matches expanded into {} blocks",
            hits.len(),
            blocks.len()
        );

        Ok(ContextSet { hits, blocks })
    }

    async fn expand(&self, hits: &[RetrievalHit], window: u32) -> Result<Vec<ContextBlock>> {
        // Hits arrive best first, so first appearance orders the documents
        let mut document_order: Vec<&str> = Vec::new();
        let mut matched: HashMap<&str, HashMap<u32, Provenance>> = HashMap::new();
        for hit in hits {
            let entry = matched.entry(hit.document_id.as_str()).or_insert_with(|| {
                document_order.push(hit.document_id.as_str());
                HashMap::new()
            });
            entry.entry(hit.sequence_index).or_insert(Provenance::Matched {
                score: hit.score,
                rank: hit.rank,
            });
        }

        let mut blocks = Vec::new();
        for document_id in document_order {
            let Some(document) = self.chunks.get_document(document_id).await? else {
                warn!("Document {} vanished during retrieval", document_id);
                continue;
            };
            let Some(provenances) = matched.get(document_id) else {
                continue;
            };

            let positions: Vec<u32> = provenances.keys().copied().collect();
            for range in merge_windows(&positions, window, document.chunk_count) {
                let chunks = self.chunks.chunk_range(document_id, range).await?;
                if chunks.is_empty() {
                    continue;
                }
                let chunks = chunks
                    .into_iter()
                    .map(|chunk| ContextChunk {
                        provenance: provenances
                            .get(&chunk.sequence_index)
                            .copied()
                            .unwrap_or(Provenance::Expanded),
                        chunk,
                    })
                    .collect();
                blocks.push(ContextBlock {
                    document_id: document.id.clone(),
                    filename: document.filename.clone(),
                    chunks,
                });
            }
        }

        Ok(blocks)
    }
}

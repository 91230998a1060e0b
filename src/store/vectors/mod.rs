
pub mod lancedb;

use std::cmp::Ordering;
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::debug;

use crate::{RagError, Result};

pub use self::lancedb::LanceVectorIndex;

/// One embedding record: the vector for a stored chunk
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub chunk_id: String,
    /// Owning document, kept so searches can be scoped to one document
    pub document_id: String,
    pub vector: Vec<f32>,
}

/// A search hit, higher score means more similar
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk_id: String,
    pub score: f32,
}

/// k-nearest-neighbour index over chunk embeddings.
///
/// Search results are ordered by descending score with ties broken by
/// insertion order. `k` larger than the index is clamped; an empty index
/// yields an empty result.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert a whole batch so that it becomes searchable all at once
    async fn insert_batch(&self, entries: Vec<IndexEntry>) -> Result<()>;

    #[inline]
    async fn insert(&self, chunk_id: &str, document_id: &str, vector: Vec<f32>) -> Result<()> {
        self.insert_batch(vec![IndexEntry {
            chunk_id: chunk_id.to_string(),
            document_id: document_id.to_string(),
            vector,
        }])
        .await
    }

    /// Top `k` entries most similar to `query`, optionally limited to one document
    async fn search(
        &self,
        query: &[f32],
        k: usize,
        document_scope: Option<&str>,
    ) -> Result<Vec<ScoredChunk>>;

    async fn len(&self) -> Result<usize>;

    #[inline]
    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}

/// Cosine similarity; zero vectors are similar to nothing
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;
    for (x, y) in a.iter().zip(b) {
        dot = x.mul_add(*y, dot);
        norm_a = x.mul_add(*x, norm_a);
        norm_b = y.mul_add(*y, norm_b);
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Order by descending score, then ascending insertion sequence
pub(crate) fn rank_order(a: (f32, u64), b: (f32, u64)) -> Ordering {
    b.0.partial_cmp(&a.0)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.1.cmp(&b.1))
}

#[derive(Debug, Default)]
struct FlatState {
    dimension: Option<usize>,
    entries: Vec<IndexEntry>,
}

/// Exact, in-memory vector index that scores every entry on each query
#[derive(Debug, Default)]
pub struct FlatVectorIndex {
    state: RwLock<FlatState>,
}

impl FlatVectorIndex {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for FlatVectorIndex {
    async fn insert_batch(&self, entries: Vec<IndexEntry>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut state = self
            .state
            .write()
            .map_err(|_| RagError::Storage("vector index lock poisoned".to_string()))?;

        let dimension = state.dimension.unwrap_or(entries[0].vector.len());
        if let Some(bad) = entries.iter().find(|e| e.vector.len() != dimension) {
            return Err(RagError::Validation(format!(
                "embedding for {} has {} dimensions, index expects {}",
                bad.chunk_id,
                bad.vector.len(),
                dimension
            )));
        }

        state.dimension = Some(dimension);
        debug!("Indexing batch of {} vectors", entries.len());
        state.entries.extend(entries);
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        k: usize,
        document_scope: Option<&str>,
    ) -> Result<Vec<ScoredChunk>> {
        let state = self
            .state
            .read()
            .map_err(|_| RagError::Storage("vector index lock poisoned".to_string()))?;

        if let Some(dimension) = state.dimension.filter(|d| *d != query.len()) {
            return Err(RagError::Validation(format!(
                "query vector has {} dimensions, index expects {}",
                query.len(),
                dimension
            )));
        }

        let mut scored: Vec<(f32, u64, &IndexEntry)> = state
            .entries
            .iter()
            .zip(0_u64..)
            .filter(|(entry, _)| document_scope.is_none_or(|scope| entry.document_id == scope))
            .map(|(entry, seq)| (cosine_similarity(query, &entry.vector), seq, entry))
            .collect();

        scored.sort_by(|a, b| rank_order((a.0, a.1), (b.0, b.1)));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(score, _, entry)| ScoredChunk {
                chunk_id: entry.chunk_id.clone(),
                score,
            })
            .collect())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self
            .state
            .read()
            .map_err(|_| RagError::Storage("vector index lock poisoned".to_string()))?
            .entries
            .len())
    }
}

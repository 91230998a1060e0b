
pub mod sqlite;

use std::collections::{BTreeMap, HashMap};
use std::ops::RangeInclusive;
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::debug;

use crate::store::models::{Chunk, Document};
use crate::{RagError, Result};

pub use sqlite::SqliteChunkStore;

/// Ordered, per-document record of chunks.
///
/// Implementations must make `insert_document` atomic: a reader either sees
/// the document with all of its chunks or does not see it at all.
///
/// The store is written before the vector index, so a document here is not
/// necessarily searchable yet. If the process dies between the two writes a
/// persistent store keeps the rows without vectors; retrieval never reaches
/// them, and re-ingesting under the same id reports a duplicate.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Store a document together with its complete chunk batch.
    /// Fails with `Validation` if the document id is already present.
    async fn insert_document(&self, document: Document, chunks: Vec<Chunk>) -> Result<()>;

    /// Drop a document whose vectors could not be committed.
    /// Returns whether anything was removed.
    async fn discard_document(&self, document_id: &str) -> Result<bool>;

    async fn get_document(&self, document_id: &str) -> Result<Option<Document>>;

    /// All documents, most recently ingested first
    async fn list_documents(&self) -> Result<Vec<Document>>;

    async fn get_chunk(&self, chunk_id: &str) -> Result<Option<Chunk>>;

    /// Chunks of one document whose sequence index falls in `range`, ascending
    async fn chunk_range(
        &self,
        document_id: &str,
        range: RangeInclusive<u32>,
    ) -> Result<Vec<Chunk>>;
}

pub(crate) fn validate_batch(document: &Document, chunks: &[Chunk]) -> Result<()> {
    if chunks.len() != document.chunk_count as usize {
        return Err(RagError::Validation(format!(
            "document {} declares {} chunks but {} were supplied",
            document.id,
            document.chunk_count,
            chunks.len()
        )));
    }

    for (expected, chunk) in chunks.iter().enumerate() {
        if chunk.document_id != document.id {
            return Err(RagError::Validation(format!(
                "chunk {} belongs to document {}, not {}",
                chunk.id, chunk.document_id, document.id
            )));
        }
        if chunk.sequence_index as usize != expected {
            return Err(RagError::Validation(format!(
                "chunk {} has sequence index {} where {} was expected",
                chunk.id, chunk.sequence_index, expected
            )));
        }
    }

    Ok(())
}

#[derive(Debug, Default)]
struct MemoryState {
    documents: HashMap<String, Document>,
    chunks: BTreeMap<(String, u32), Chunk>,
    positions: HashMap<String, (String, u32)>,
}

/// Process-local chunk store keyed by `(document_id, sequence_index)`
#[derive(Debug, Default)]
pub struct MemoryChunkStore {
    state: RwLock<MemoryState>,
}

impl MemoryChunkStore {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, MemoryState>> {
        self.state
            .read()
            .map_err(|_| RagError::Storage("chunk store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, MemoryState>> {
        self.state
            .write()
            .map_err(|_| RagError::Storage("chunk store lock poisoned".to_string()))
    }
}

#[async_trait]
impl ChunkStore for MemoryChunkStore {
    async fn insert_document(&self, document: Document, chunks: Vec<Chunk>) -> Result<()> {
        validate_batch(&document, &chunks)?;

        // Everything is prepared before the lock is taken; the swap-in is the commit point
        let staged: Vec<((String, u32), Chunk)> = chunks
            .into_iter()
            .map(|chunk| ((chunk.document_id.clone(), chunk.sequence_index), chunk))
            .collect();

        let mut state = self.write()?;
        if state.documents.contains_key(&document.id) {
            return Err(RagError::Validation(format!(
                "document {} has already been ingested",
                document.id
            )));
        }

        for (key, chunk) in staged {
            state.positions.insert(chunk.id.clone(), key.clone());
            state.chunks.insert(key, chunk);
        }
        debug!(
            "Stored document {} with {} chunks",
            document.id, document.chunk_count
        );
        state.documents.insert(document.id.clone(), document);

        Ok(())
    }

    async fn discard_document(&self, document_id: &str) -> Result<bool> {
        let mut state = self.write()?;
        let Some(document) = state.documents.remove(document_id) else {
            return Ok(false);
        };

        for index in 0..document.chunk_count {
            if let Some(chunk) = state.chunks.remove(&(document.id.clone(), index)) {
                state.positions.remove(&chunk.id);
            }
        }

        Ok(true)
    }

    async fn get_document(&self, document_id: &str) -> Result<Option<Document>> {
        Ok(self.read()?.documents.get(document_id).cloned())
    }

    async fn list_documents(&self) -> Result<Vec<Document>> {
        let mut documents: Vec<Document> = self.read()?.documents.values().cloned().collect();
        documents.sort_by(|a, b| {
            b.ingested_at
                .cmp(&a.ingested_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(documents)
    }

    async fn get_chunk(&self, chunk_id: &str) -> Result<Option<Chunk>> {
        let state = self.read()?;
        Ok(state
            .positions
            .get(chunk_id)
            .and_then(|key| state.chunks.get(key))
            .cloned())
    }

    async fn chunk_range(
        &self,
        document_id: &str,
        range: RangeInclusive<u32>,
    ) -> Result<Vec<Chunk>> {
        let (start, end) = range.into_inner();
        if start > end {
            return Ok(Vec::new());
        }

        let state = self.read()?;
        Ok(state
            .chunks
            .range((document_id.to_string(), start)..=(document_id.to_string(), end))
            .map(|(_, chunk)| chunk.clone())
            .collect())
    }
}

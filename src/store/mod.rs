// Storage module
// Chunk Store (ordered per-document chunk records) and Vector Index (chunk embeddings)

pub mod chunks;
pub mod models;
pub mod vectors;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::config::Config;

pub use chunks::{ChunkStore, MemoryChunkStore, SqliteChunkStore};
pub use models::{Chunk, ChunkDraft, Document, DocumentFormat};
pub use vectors::{FlatVectorIndex, IndexEntry, LanceVectorIndex, ScoredChunk, VectorIndex};

/// Which storage technology backs the two stores
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Process-local stores, lost on exit
    Memory,
    /// SQLite chunk store plus LanceDB vector index under the base directory
    #[default]
    Persistent,
}

/// Open both stores for the configured backend
#[inline]
pub async fn open_stores(config: &Config) -> Result<(Arc<dyn ChunkStore>, Arc<dyn VectorIndex>)> {
    match config.storage.backend {
        StorageBackend::Memory => Ok((
            Arc::new(MemoryChunkStore::new()),
            Arc::new(FlatVectorIndex::new()),
        )),
        StorageBackend::Persistent => {
            let chunks = SqliteChunkStore::initialize_from_config_dir(config.get_base_dir()).await?;
            let vectors = LanceVectorIndex::open(&config.vector_database_path()).await?;
            Ok((Arc::new(chunks), Arc::new(vectors)))
        }
    }
}

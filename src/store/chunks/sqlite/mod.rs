
use std::ops::RangeInclusive;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, Pool, Sqlite};
use tracing::{debug, info};

use super::{ChunkStore, validate_batch};
use crate::store::models::{Chunk, Document, DocumentFormat};
use crate::{RagError, Result};

pub type DbPool = Pool<Sqlite>;

#[derive(Debug, FromRow)]
struct DocumentRow {
    id: String,
    filename: String,
    format: String,
    chunk_count: i64,
    ingested_at: DateTime<Utc>,
}

impl TryFrom<DocumentRow> for Document {
    type Error = RagError;

    fn try_from(row: DocumentRow) -> Result<Self> {
        let format: DocumentFormat = row.format.parse().map_err(RagError::Storage)?;
        Ok(Self {
            id: row.id,
            filename: row.filename,
            format,
            chunk_count: to_u32(row.chunk_count, "chunk_count")?,
            ingested_at: row.ingested_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ChunkRow {
    id: String,
    document_id: String,
    sequence_index: i64,
    text: String,
    char_start: i64,
    char_end: i64,
    token_count: i64,
}

impl TryFrom<ChunkRow> for Chunk {
    type Error = RagError;

    fn try_from(row: ChunkRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            document_id: row.document_id,
            sequence_index: to_u32(row.sequence_index, "sequence_index")?,
            text: row.text,
            char_start: to_usize(row.char_start, "char_start")?,
            char_end: to_usize(row.char_end, "char_end")?,
            token_count: to_usize(row.token_count, "token_count")?,
        })
    }
}

fn to_u32(value: i64, column: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| RagError::Storage(format!("{} out of range: {}", column, value)))
}

fn to_usize(value: i64, column: &str) -> Result<usize> {
    usize::try_from(value)
        .map_err(|_| RagError::Storage(format!("{} out of range: {}", column, value)))
}

fn to_i64(value: usize) -> Result<i64> {
    i64::try_from(value).map_err(|_| RagError::Storage(format!("value out of range: {}", value)))
}

fn storage_error(action: &str) -> impl FnOnce(sqlx::Error) -> RagError + '_ {
    move |e| RagError::Storage(format!("Failed to {}: {}", action, e))
}

/// Chunk store persisted in SQLite.
///
/// A document and its chunks are written in one transaction, so readers never
/// observe a partially stored batch.
#[derive(Debug, Clone)]
pub struct SqliteChunkStore {
    pool: DbPool,
}

impl SqliteChunkStore {
    #[inline]
    pub async fn new<P: AsRef<Path>>(database_path: P) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .map_err(storage_error("create database connection pool"))?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    #[inline]
    pub async fn initialize_from_config_dir(config_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(config_dir).map_err(|e| {
            RagError::Storage(format!(
                "Failed to create config directory {}: {}",
                config_dir.display(),
                e
            ))
        })?;

        Self::new(config_dir.join("metadata.db")).await
    }

    #[inline]
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    #[inline]
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running chunk store migrations");

        sqlx::migrate!("src/store/chunks/sqlite/migrations")
            .run(&self.pool)
            .await
            .map_err(|e| RagError::Storage(format!("Failed to run schema migration: {}", e)))?;

        debug!("Chunk store migrations completed successfully");
        Ok(())
    }
}

#[async_trait]
impl ChunkStore for SqliteChunkStore {
    async fn insert_document(&self, document: Document, chunks: Vec<Chunk>) -> Result<()> {
        validate_batch(&document, &chunks)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(storage_error("begin transaction"))?;

        let inserted = sqlx::query(
            "INSERT INTO documents (id, filename, format, chunk_count, ingested_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&document.id)
        .bind(&document.filename)
        .bind(document.format.as_str())
        .bind(i64::from(document.chunk_count))
        .bind(document.ingested_at)
        .execute(&mut *tx)
        .await;

        if let Err(e) = inserted {
            if e.as_database_error()
                .is_some_and(|db| db.is_unique_violation())
            {
                return Err(RagError::Validation(format!(
                    "document {} has already been ingested",
                    document.id
                )));
            }
            return Err(storage_error("insert document")(e));
        }

        for chunk in &chunks {
            sqlx::query(
                "INSERT INTO chunks (id, document_id, sequence_index, text, char_start, char_end, token_count) VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(i64::from(chunk.sequence_index))
            .bind(&chunk.text)
            .bind(to_i64(chunk.char_start)?)
            .bind(to_i64(chunk.char_end)?)
            .bind(to_i64(chunk.token_count)?)
            .execute(&mut *tx)
            .await
            .map_err(storage_error("insert chunk"))?;
        }

        tx.commit()
            .await
            .map_err(storage_error("commit document"))?;

        debug!(
            "Stored document {} with {} chunks",
            document.id,
            chunks.len()
        );
        Ok(())
    }

    async fn discard_document(&self, document_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(document_id)
            .execute(&self.pool)
            .await
            .map_err(storage_error("discard document"))?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_document(&self, document_id: &str) -> Result<Option<Document>> {
        let row = sqlx::query_as::<_, DocumentRow>(
            "SELECT id, filename, format, chunk_count, ingested_at FROM documents WHERE id = ?",
        )
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error("get document"))?;

        row.map(Document::try_from).transpose()
    }

    async fn list_documents(&self) -> Result<Vec<Document>> {
        let rows = sqlx::query_as::<_, DocumentRow>(
            "SELECT id, filename, format, chunk_count, ingested_at FROM documents ORDER BY ingested_at DESC, id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error("list documents"))?;

        rows.into_iter().map(Document::try_from).collect()
    }

    async fn get_chunk(&self, chunk_id: &str) -> Result<Option<Chunk>> {
        let row = sqlx::query_as::<_, ChunkRow>(
            "SELECT id, document_id, sequence_index, text, char_start, char_end, token_count FROM chunks WHERE id = ?",
        )
        .bind(chunk_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error("get chunk"))?;

        row.map(Chunk::try_from).transpose()
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

        // Served by the UNIQUE (document_id, sequence_index) index
        let rows = sqlx::query_as::<_, ChunkRow>(
            r#"
            SELECT id, document_id, sequence_index, text, char_start, char_end, token_count
            FROM chunks
            WHERE document_id = ? AND sequence_index BETWEEN ? AND ?
            ORDER BY sequence_index ASC
            "#,
        )
        .bind(document_id)
        .bind(i64::from(start))
        .bind(i64::from(end))
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error("read chunk range"))?;

        rows.into_iter().map(Chunk::try_from).collect()
    }
}

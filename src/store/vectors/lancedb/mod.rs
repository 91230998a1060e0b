
use std::path::Path;
use std::sync::Arc;

use arrow::array::{
    Array, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray, UInt64Array,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{Connection, DistanceType, Table};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{IndexEntry, ScoredChunk, VectorIndex, rank_order};
use crate::{RagError, Result};

const TABLE_NAME: &str = "embeddings";

/// Extra rows fetched beyond `k` so equal scores at the cut-off can be
/// re-ranked by insertion sequence. Search widens past it when the tie
/// group fills the whole page.
const TIE_SLACK: usize = 16;

#[derive(Debug)]
struct WriterState {
    dimension: Option<usize>,
    next_sequence: u64,
}

/// Vector index persisted with LanceDB.
///
/// Every batch is appended with a single `add`, which LanceDB commits as one
/// table version, so a batch is searchable all at once or not at all.
pub struct LanceVectorIndex {
    connection: Connection,
    writer: Mutex<WriterState>,
}

fn database_error(action: &str) -> impl FnOnce(lancedb::Error) -> RagError + '_ {
    move |e| RagError::Storage(format!("Failed to {}: {}", action, e))
}

fn arrow_error(action: &str) -> impl FnOnce(arrow::error::ArrowError) -> RagError + '_ {
    move |e| RagError::Storage(format!("Failed to {}: {}", action, e))
}

impl LanceVectorIndex {
    /// Open (or create) the vector database rooted at `db_path`
    #[inline]
    pub async fn open(db_path: &Path) -> Result<Self> {
        debug!("Initializing LanceDB at path: {:?}", db_path);

        std::fs::create_dir_all(db_path).map_err(|e| {
            RagError::Storage(format!("Failed to create vector database directory: {}", e))
        })?;

        let uri = format!("file://{}", db_path.display());
        let connection = lancedb::connect(&uri)
            .execute()
            .await
            .map_err(database_error("connect to LanceDB"))?;

        let index = Self {
            connection,
            writer: Mutex::new(WriterState {
                dimension: None,
                next_sequence: 0,
            }),
        };

        if let Some(table) = index.open_table().await? {
            let dimension = detect_vector_dimension(&table).await?;
            let rows = table
                .count_rows(None)
                .await
                .map_err(database_error("count rows"))?;
            let mut writer = index.writer.lock().await;
            writer.dimension = Some(dimension);
            writer.next_sequence = rows as u64;
            info!(
                "Opened vector index with {} entries of dimension {}",
                rows, dimension
            );
        }

        Ok(index)
    }

    async fn open_table(&self) -> Result<Option<Table>> {
        let table_names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(database_error("list tables"))?;

        if !table_names.iter().any(|name| name == TABLE_NAME) {
            return Ok(None);
        }

        self.connection
            .open_table(TABLE_NAME)
            .execute()
            .await
            .map(Some)
            .map_err(database_error("open table"))
    }

    fn create_record_batch(
        entries: &[IndexEntry],
        dimension: usize,
        first_sequence: u64,
    ) -> Result<RecordBatch> {
        let schema = create_schema(dimension)?;

        let mut flat_values = Vec::with_capacity(entries.len() * dimension);
        for entry in entries {
            flat_values.extend_from_slice(&entry.vector);
        }
        let field = Arc::new(Field::new("item", DataType::Float32, false));
        let vector_array = FixedSizeListArray::try_new(
            field,
            list_size(dimension)?,
            Arc::new(Float32Array::from(flat_values)),
            None,
        )
        .map_err(arrow_error("create vector array"))?;

        let chunk_ids: Vec<&str> = entries.iter().map(|e| e.chunk_id.as_str()).collect();
        let document_ids: Vec<&str> = entries.iter().map(|e| e.document_id.as_str()).collect();
        let sequences: Vec<u64> = (first_sequence..).take(entries.len()).collect();

        let arrays: Vec<Arc<dyn Array>> = vec![
            Arc::new(StringArray::from(chunk_ids)),
            Arc::new(StringArray::from(document_ids)),
            Arc::new(UInt64Array::from(sequences)),
            Arc::new(vector_array),
        ];

        RecordBatch::try_new(schema, arrays).map_err(arrow_error("create record batch"))
    }
}

fn list_size(dimension: usize) -> Result<i32> {
    i32::try_from(dimension)
        .map_err(|_| RagError::Validation(format!("unsupported dimension {}", dimension)))
}

fn create_schema(dimension: usize) -> Result<Arc<Schema>> {
    Ok(Arc::new(Schema::new(vec![
        Field::new("chunk_id", DataType::Utf8, false),
        Field::new("document_id", DataType::Utf8, false),
        Field::new("sequence", DataType::UInt64, false),
        Field::new(
            "vector",
            DataType::FixedSizeList(
                Arc::new(Field::new("item", DataType::Float32, false)),
                list_size(dimension)?,
            ),
            false,
        ),
    ])))
}

async fn detect_vector_dimension(table: &Table) -> Result<usize> {
    let schema = table
        .schema()
        .await
        .map_err(database_error("get table schema"))?;

    schema
        .fields()
        .iter()
        .find(|field| field.name() == "vector")
        .and_then(|field| match field.data_type() {
            DataType::FixedSizeList(_, size) => usize::try_from(*size).ok(),
            _ => None,
        })
        .ok_or_else(|| {
            RagError::Storage("Could not find vector column or determine dimension".to_string())
        })
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .ok_or_else(|| RagError::Storage(format!("Missing {} column", name)))?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| RagError::Storage(format!("Invalid {} column type", name)))
}

async fn fetch_nearest(
    table: &Table,
    query: &[f32],
    limit: usize,
    document_scope: Option<&str>,
) -> Result<Vec<(f32, u64, String)>> {
    let mut vector_query = table
        .vector_search(query)
        .map_err(database_error("create vector search"))?
        .column("vector")
        .distance_type(DistanceType::Cosine)
        .limit(limit);

    if let Some(document_id) = document_scope {
        vector_query = vector_query.only_if(format!(
            "document_id = '{}'",
            escape_literal(document_id)
        ));
    }

    let mut stream = vector_query
        .execute()
        .await
        .map_err(database_error("execute search"))?;

    let mut hits = Vec::new();
    while let Some(batch) = stream
        .try_next()
        .await
        .map_err(database_error("read result stream"))?
    {
        hits.extend(parse_search_batch(&batch)?);
    }
    Ok(hits)
}

fn parse_search_batch(batch: &RecordBatch) -> Result<Vec<(f32, u64, String)>> {
    let chunk_ids = string_column(batch, "chunk_id")?;
    let sequences = batch
        .column_by_name("sequence")
        .ok_or_else(|| RagError::Storage("Missing sequence column".to_string()))?
        .as_any()
        .downcast_ref::<UInt64Array>()
        .ok_or_else(|| RagError::Storage("Invalid sequence column type".to_string()))?;
    let distances = batch
        .column_by_name("_distance")
        .and_then(|col| col.as_any().downcast_ref::<Float32Array>());

    Ok((0..batch.num_rows())
        .map(|row| {
            let distance =
                distances.map_or(0.0, |d| if d.is_null(row) { 0.0 } else { d.value(row) });
            // Cosine distance is 1 - cosine similarity
            (
                1.0 - distance,
                sequences.value(row),
                chunk_ids.value(row).to_string(),
            )
        })
        .collect())
}

fn escape_literal(value: &str) -> String {
    value.replace('\'', "''")
}

#[async_trait]
impl VectorIndex for LanceVectorIndex {
    async fn insert_batch(&self, entries: Vec<IndexEntry>) -> Result<()> {
        if entries.is_empty() {
            debug!("No embeddings to store");
            return Ok(());
        }

        // Serialise writers so sequence numbers are handed out without gaps
        let mut writer = self.writer.lock().await;

        let dimension = writer.dimension.unwrap_or(entries[0].vector.len());
        if let Some(bad) = entries.iter().find(|e| e.vector.len() != dimension) {
            return Err(RagError::Validation(format!(
                "embedding for {} has {} dimensions, index expects {}",
                bad.chunk_id,
                bad.vector.len(),
                dimension
            )));
        }

        let table = match self.open_table().await? {
            Some(table) => table,
            None => {
                info!("Creating embeddings table with {} dimensions", dimension);
                self.connection
                    .create_empty_table(TABLE_NAME, create_schema(dimension)?)
                    .execute()
                    .await
                    .map_err(database_error("create table"))?
            }
        };

        let record_batch = Self::create_record_batch(&entries, dimension, writer.next_sequence)?;
        let schema = record_batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(record_batch)), schema);
        table
            .add(reader)
            .execute()
            .await
            .map_err(database_error("insert embeddings"))?;

        writer.dimension = Some(dimension);
        writer.next_sequence += entries.len() as u64;
        info!("Successfully stored {} embeddings", entries.len());
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        k: usize,
        document_scope: Option<&str>,
    ) -> Result<Vec<ScoredChunk>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let Some(table) = self.open_table().await? else {
            return Ok(Vec::new());
        };
        let rows = table
            .count_rows(None)
            .await
            .map_err(database_error("count rows"))?;
        if rows == 0 {
            return Ok(Vec::new());
        }

        let dimension = self.writer.lock().await.dimension;
        if let Some(expected) = dimension.filter(|d| *d != query.len()) {
            return Err(RagError::Validation(format!(
                "query vector has {} dimensions, index expects {}",
                query.len(),
                expected
            )));
        }

        debug!("Searching for similar vectors with limit: {}", k);
        let mut limit = k.min(rows) + TIE_SLACK;
        let mut hits = loop {
            let mut hits = fetch_nearest(&table, query, limit, document_scope).await?;
            hits.sort_by(|a, b| rank_order((a.0, a.1), (b.0, b.1)));

            // A full page whose tail still ties the k-th score may hide
            // earlier-inserted rows of the same score
            let tie_reaches_limit = hits.len() == limit
                && hits.len() > k
                && hits[k - 1].0.total_cmp(&hits[hits.len() - 1].0).is_eq();
            if !tie_reaches_limit || limit >= rows {
                break hits;
            }
            limit = limit.saturating_mul(2).min(rows);
            debug!("Tie group spans the fetch limit, widening to {}", limit);
        };
        hits.truncate(k);
        debug!("Parsed {} search results", hits.len());

        Ok(hits
            .into_iter()
            .map(|(score, _, chunk_id)| ScoredChunk { chunk_id, score })
            .collect())
    }

    async fn len(&self) -> Result<usize> {
        match self.open_table().await? {
            Some(table) => table
                .count_rows(None)
                .await
                .map_err(database_error("count rows")),
            None => Ok(0),
        }
    }
}

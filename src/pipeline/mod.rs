// Pipeline module
// Caller-facing ingest and ask operations over the chunk store and vector index


use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use futures::StreamExt;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{Config, RetrievalConfig};
use crate::embeddings::{EmbeddingGateway, OllamaClient};
use crate::gateway::{DEFAULT_RETRY_ATTEMPTS, call_with_timeout};
use crate::ingest::{ChunkingConfig, FormatExtractor, TextExtractor, chunk_text};
use crate::prompt::{AssembledPrompt, PromptAssembler, stitch_chunks};
use crate::retrieval::{RetrievalRequest, Retriever};
use crate::store::{
    Chunk, ChunkStore, Document, DocumentFormat, IndexEntry, VectorIndex, open_stores,
};
use crate::synthesis::AnswerSynthesizer;
use crate::{RagError, Result};

/// Chunks embedded per gateway call during ingestion
const EMBED_GROUP_SIZE: usize = 32;
/// Documents ingested at once by `ingest_batch`
const MAX_CONCURRENT_INGESTS: usize = 4;

/// Generate an id for a document the caller did not name
#[inline]
pub fn new_document_id() -> String {
    Uuid::new_v4().to_string()
}

/// A file handed to `ingest_batch`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Generated when absent
    pub document_id: Option<String>,
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Result of ingesting one document from a batch
#[derive(Debug)]
pub struct IngestOutcome {
    pub document_id: String,
    pub filename: String,
    /// Number of chunks stored
    pub result: Result<usize>,
}

/// Parameters of one question; unset fields fall back to the pipeline defaults
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AskRequest {
    pub query: String,
    pub k: Option<usize>,
    pub window: Option<u32>,
    pub budget: Option<usize>,
    pub document_id: Option<String>,
}

impl AskRequest {
    #[inline]
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }
}

/// An answer together with the prompt that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub text: String,
    pub prompt: AssembledPrompt,
}

#[derive(Clone)]
pub struct RagPipeline {
    chunks: Arc<dyn ChunkStore>,
    vectors: Arc<dyn VectorIndex>,
    embeddings: Arc<dyn EmbeddingGateway>,
    extractor: Arc<dyn TextExtractor>,
    chunking: ChunkingConfig,
    retrieval: RetrievalConfig,
    assembler: PromptAssembler,
    embed_timeout: Duration,
    completion_timeout: Duration,
    /// Documents whose chunk rows are written but whose vectors are not yet committed
    committing: Arc<RwLock<HashSet<String>>>,
}

impl RagPipeline {
    #[inline]
    pub fn new(
        chunks: Arc<dyn ChunkStore>,
        vectors: Arc<dyn VectorIndex>,
        embeddings: Arc<dyn EmbeddingGateway>,
    ) -> Self {
        let retrieval = RetrievalConfig::default();
        Self {
            chunks,
            vectors,
            embeddings,
            extractor: Arc::new(FormatExtractor),
            chunking: ChunkingConfig::default(),
            assembler: PromptAssembler::new(retrieval.instruction.clone()),
            retrieval,
            embed_timeout: Duration::from_secs(30),
            completion_timeout: Duration::from_secs(180),
            committing: Arc::default(),
        }
    }

    /// Open the configured stores and connect to the configured Ollama server
    #[inline]
    pub async fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        let (chunks, vectors) = open_stores(config).await?;
        let embeddings = Arc::new(OllamaClient::new(&config.ollama)?);

        // One embedding group may span several Ollama batches
        let batches_per_group = EMBED_GROUP_SIZE.div_ceil(config.ollama.batch_size.max(1) as usize);
        let embed_timeout = Duration::from_secs(config.ollama.timeout_secs)
            .saturating_mul(DEFAULT_RETRY_ATTEMPTS)
            .saturating_mul(u32::try_from(batches_per_group).unwrap_or(u32::MAX));
        let completion_timeout = Duration::from_secs(config.completion.timeout_secs)
            .saturating_mul(DEFAULT_RETRY_ATTEMPTS);

        Ok(Self::new(chunks, vectors, embeddings)
            .with_chunking(config.chunking.clone())
            .with_retrieval_defaults(config.retrieval.clone())
            .with_embed_timeout(embed_timeout)
            .with_completion_timeout(completion_timeout))
    }

    #[inline]
    #[must_use]
    pub fn with_chunking(mut self, chunking: ChunkingConfig) -> Self {
        self.chunking = chunking;
        self
    }

    /// Default k, window and budget for `ask`, plus the prompt instruction
    #[inline]
    #[must_use]
    pub fn with_retrieval_defaults(mut self, retrieval: RetrievalConfig) -> Self {
        self.assembler = PromptAssembler::new(retrieval.instruction.clone());
        self.retrieval = retrieval;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Bound on each embedding call
    #[inline]
    #[must_use]
    pub fn with_embed_timeout(mut self, timeout: Duration) -> Self {
        self.embed_timeout = timeout;
        self
    }

    /// Bound on each answer synthesis call
    #[inline]
    #[must_use]
    pub fn with_completion_timeout(mut self, timeout: Duration) -> Self {
        self.completion_timeout = timeout;
        self
    }

    #[inline]
    pub fn retrieval_defaults(&self) -> &RetrievalConfig {
        &self.retrieval
    }

    /// Chunk, embed and index already-extracted text.
    ///
    /// Returns the number of chunks stored. Text without any content stores
    /// nothing and returns 0.
    #[inline]
    pub async fn ingest(&self, document_id: &str, filename: &str, text: &str) -> Result<usize> {
        let format = DocumentFormat::from_filename(filename).unwrap_or(DocumentFormat::Text);
        self.ingest_text(document_id, filename, format, text).await
    }

    /// Extract text from file contents, then ingest it.
    ///
    /// Unlike [`Self::ingest`], a file that yields no text is a `Validation` error.
    #[inline]
    pub async fn ingest_bytes(
        &self,
        document_id: &str,
        filename: &str,
        bytes: &[u8],
    ) -> Result<usize> {
        let extracted = self.extractor.extract(bytes, filename)?;
        if extracted.text.trim().is_empty() {
            return Err(RagError::Validation(format!(
                "{} contains no extractable text",
                filename
            )));
        }
        self.ingest_text(document_id, filename, extracted.format, &extracted.text)
            .await
    }

    /// Read a file from disk and ingest it, generating an id when none is given.
    ///
    /// Returns the document id and chunk count.
    #[inline]
    pub async fn ingest_file(
        &self,
        path: &Path,
        document_id: Option<String>,
    ) -> Result<(String, usize)> {
        let filename = file_name(path)?;
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let document_id = document_id.unwrap_or_else(new_document_id);

        let count = self.ingest_bytes(&document_id, &filename, &bytes).await?;
        Ok((document_id, count))
    }

    /// Ingest several files concurrently.
    ///
    /// Every file gets its own outcome, in input order; one failure does not
    /// affect the others.
    #[inline]
    pub async fn ingest_batch(&self, files: Vec<SourceFile>) -> Vec<IngestOutcome> {
        futures::stream::iter(files)
            .map(|file| async move {
                let document_id = file.document_id.unwrap_or_else(new_document_id);
                let result = self
                    .ingest_bytes(&document_id, &file.filename, &file.bytes)
                    .await;
                if let Err(e) = &result {
                    warn!("Failed to ingest {}: {}", file.filename, e);
                }
                IngestOutcome {
                    document_id,
                    filename: file.filename,
                    result,
                }
            })
            .buffered(MAX_CONCURRENT_INGESTS)
            .collect()
            .await
    }

    async fn ingest_text(
        &self,
        document_id: &str,
        filename: &str,
        format: DocumentFormat,
        text: &str,
    ) -> Result<usize> {
        if document_id.trim().is_empty() {
            return Err(RagError::Validation(
                "document id must not be empty".to_string(),
            ));
        }
        if filename.trim().is_empty() {
            return Err(RagError::Validation("filename must not be empty".to_string()));
        }
        if self.chunks.get_document(document_id).await?.is_some() {
            return Err(RagError::Validation(format!(
                "document {} has already been ingested",
                document_id
            )));
        }

        let drafts = chunk_text(text, &self.chunking)?;
        if drafts.is_empty() {
            info!("Document {} has no text, nothing stored", document_id);
            return Ok(0);
        }
        let chunk_count = u32::try_from(drafts.len())
            .map_err(|_| RagError::Validation("document produces too many chunks".to_string()))?;

        // Every vector exists before anything is written
        let texts: Vec<String> = drafts.iter().map(|d| d.text.clone()).collect();
        let vectors = self.embed_all(&texts).await?;

        let chunks: Vec<Chunk> = drafts
            .into_iter()
            .map(|draft| draft.into_chunk(document_id))
            .collect();
        let entries: Vec<IndexEntry> = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexEntry {
                chunk_id: chunk.id.clone(),
                document_id: document_id.to_string(),
                vector,
            })
            .collect();
        let document = Document {
            id: document_id.to_string(),
            filename: filename.to_string(),
            format,
            ingested_at: Utc::now(),
            chunk_count,
        };

        // Detached so a dropped caller cannot interrupt the commit halfway
        let chunk_store = Arc::clone(&self.chunks);
        let vector_index = Arc::clone(&self.vectors);
        let committing = Arc::clone(&self.committing);
        tokio::spawn(async move {
            committing.write().await.insert(document.id.clone());
            let document_id = document.id.clone();
            let result =
                commit_document(chunk_store, vector_index, document, chunks, entries).await;
            committing.write().await.remove(&document_id);
            result
        })
        .await
        .map_err(|e| RagError::Storage(format!("ingestion task failed: {}", e)))??;

        info!(
            "Ingested document {} ({}) as {} chunks",
            document_id, filename, chunk_count
        );
        Ok(chunk_count as usize)
    }

    async fn embed_all(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for group in texts.chunks(EMBED_GROUP_SIZE) {
            let embedded = call_with_timeout(
                "embedding",
                self.embed_timeout,
                self.embeddings.embed_batch(group),
            )
            .await?;
            if embedded.len() != group.len() {
                return Err(RagError::Gateway(format!(
                    "embedding gateway returned {} vectors for {} chunks",
                    embedded.len(),
                    group.len()
                )));
            }
            vectors.extend(embedded);
        }
        debug!("Embedded {} chunks", vectors.len());
        Ok(vectors)
    }

    /// Retrieve context for a question and assemble the prompt.
    ///
    /// Fails with `EmptyContext` when nothing relevant is indexed.
    #[inline]
    pub async fn ask(&self, request: &AskRequest) -> Result<AssembledPrompt> {
        let mut retrieval = RetrievalRequest::new(
            request.query.clone(),
            request.k.unwrap_or(self.retrieval.top_k),
            request.window.unwrap_or(self.retrieval.window),
        );
        retrieval.document_id.clone_from(&request.document_id);
        let budget = request.budget.unwrap_or(self.retrieval.budget);

        let retriever = Retriever::new(
            Arc::clone(&self.chunks),
            Arc::clone(&self.vectors),
            Arc::clone(&self.embeddings),
            self.embed_timeout,
        );
        let context = retriever.retrieve(&retrieval).await?;

        self.assembler.assemble(&context, &request.query, budget)
    }

    /// Ask, then have `synthesizer` answer from the assembled prompt.
    ///
    /// The synthesizer is never called when no context was found.
    #[inline]
    pub async fn answer(
        &self,
        request: &AskRequest,
        synthesizer: &dyn AnswerSynthesizer,
    ) -> Result<Answer> {
        let prompt = self.ask(request).await?;
        let text = call_with_timeout(
            "completion",
            self.completion_timeout,
            synthesizer.complete(&prompt.prompt),
        )
        .await?;
        Ok(Answer { text, prompt })
    }

    /// Every ingested document, most recent first.
    ///
    /// Documents still waiting for their vectors are left out.
    #[inline]
    pub async fn list_documents(&self) -> Result<Vec<Document>> {
        let mut documents = self.chunks.list_documents().await?;
        let committing = self.committing.read().await;
        documents.retain(|document| !committing.contains(&document.id));
        Ok(documents)
    }

    /// A document's text rebuilt from its chunks
    #[inline]
    pub async fn document_text(&self, document_id: &str) -> Result<String> {
        let committed = if self.committing.read().await.contains(document_id) {
            None
        } else {
            self.chunks.get_document(document_id).await?
        };
        let document = committed
            .ok_or_else(|| RagError::NotFound(format!("document '{}'", document_id)))?;

        let Some(last) = document.chunk_count.checked_sub(1) else {
            return Ok(String::new());
        };
        let chunks = self.chunks.chunk_range(document_id, 0..=last).await?;
        if chunks.len() != document.chunk_count as usize {
            return Err(RagError::Storage(format!(
                "document {} should have {} chunks but {} were found",
                document_id,
                document.chunk_count,
                chunks.len()
            )));
        }

        Ok(stitch_chunks(&chunks))
    }
}

/// Publish a fully prepared document. The vector batch is the commit point;
/// if it fails the chunk rows are removed again.
///
/// Chunk rows land first, so the caller hides the document from catalogue
/// reads until this returns.
async fn commit_document(
    chunk_store: Arc<dyn ChunkStore>,
    vector_index: Arc<dyn VectorIndex>,
    document: Document,
    chunks: Vec<Chunk>,
    entries: Vec<IndexEntry>,
) -> Result<()> {
    let document_id = document.id.clone();
    chunk_store.insert_document(document, chunks).await?;

    if let Err(e) = vector_index.insert_batch(entries).await {
        error!(
            "Indexing vectors for {} failed, rolling back: {}",
            document_id, e
        );
        if let Err(rollback) = chunk_store.discard_document(&document_id).await {
            error!("Rollback of {} failed: {}", document_id, rollback);
        }
        return Err(e);
    }

    Ok(())
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| RagError::Validation(format!("{} is not a file path", path.display())))
}

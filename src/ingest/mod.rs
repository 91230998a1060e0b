// Ingestion module
// Text extraction from source files and chunking of the extracted text

pub mod chunking;
pub mod extract;

pub use chunking::{BoundaryPolicy, ChunkingConfig, chunk_text, estimate_token_count};
pub use extract::{ExtractedText, FormatExtractor, TextExtractor, normalize_text};

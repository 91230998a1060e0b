use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RagError>;

#[derive(Error, Debug)]
pub enum RagError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Corrupt file: {0}")]
    CorruptFile(String),

    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("{operation} timed out after {timeout:?}")]
    GatewayTimeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("No answerable context was retrieved for the query")]
    EmptyContext,

    #[error("Prompt budget of {budget} characters cannot fit {required} characters")]
    BudgetExhausted { budget: usize, required: usize },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl RagError {
    /// Whether the failed operation may succeed if the caller tries again.
    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Gateway(_) | Self::GatewayTimeout { .. } | Self::RateLimited(_)
        )
    }
}

impl From<config::ConfigError> for RagError {
    #[inline]
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

pub mod commands;
pub mod config;
pub mod embeddings;
pub mod gateway;
pub mod ingest;
pub mod pipeline;
pub mod prompt;
pub mod retrieval;
pub mod store;
pub mod synthesis;

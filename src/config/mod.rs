// Configuration management module
// TOML settings for the embedding and completion endpoints, chunking, retrieval and storage

pub mod settings;


pub use settings::{
    CompletionConfig, Config, ConfigError, OllamaConfig, RetrievalConfig, StorageConfig,
};

/// Get the configuration directory path
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    Config::config_dir()
}

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info, warn};

use crate::RagError;
use crate::config::Config;
use crate::embeddings::OllamaClient;
use crate::pipeline::{AskRequest, RagPipeline, SourceFile};
use crate::synthesis::ChatCompletionClient;

/// Options of the `ask` command that override the configured retrieval defaults
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AskOptions {
    pub k: Option<usize>,
    pub window: Option<u32>,
    pub budget: Option<usize>,
    pub document: Option<String>,
    /// Print the assembled prompt instead of calling the completion model
    pub prompt_only: bool,
}

/// Print the effective configuration
#[inline]
pub fn show_config(config: &Config) -> Result<()> {
    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("Embeddings (Ollama):").bold().yellow());
    match config.ollama_url() {
        Ok(url) => eprintln!("  URL: {}", style(url).cyan()),
        Err(e) => eprintln!("  URL: {} ({})", style("Invalid").red(), e),
    }
    eprintln!("  Model: {}", style(&config.ollama.model).cyan());
    eprintln!("  Batch Size: {}", style(config.ollama.batch_size).cyan());
    eprintln!(
        "  Dimension: {}",
        style(config.ollama.embedding_dimension).cyan()
    );

    eprintln!();
    eprintln!("{}", style("Completion:").bold().yellow());
    eprintln!("  Endpoint: {}", style(&config.completion.base_url).cyan());
    eprintln!("  Model: {}", style(&config.completion.model).cyan());
    eprintln!(
        "  Temperature: {}",
        style(config.completion.temperature).cyan()
    );
    let key_state = if std::env::var(&config.completion.api_key_env).is_ok() {
        style("set").green()
    } else {
        style("missing").red()
    };
    eprintln!(
        "  API key: ${} ({})",
        style(&config.completion.api_key_env).cyan(),
        key_state
    );

    eprintln!();
    eprintln!("{}", style("Chunking & Retrieval:").bold().yellow());
    eprintln!(
        "  Chunks: {} chars, {} overlap, {:?} boundaries",
        style(config.chunking.max_size).cyan(),
        style(config.chunking.overlap).cyan(),
        config.chunking.boundary
    );
    eprintln!(
        "  Top-k: {}, window: {}, budget: {} chars",
        style(config.retrieval.top_k).cyan(),
        style(config.retrieval.window).cyan(),
        style(config.retrieval.budget).cyan()
    );
    eprintln!("  Storage: {:?}", config.storage.backend);

    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );

    Ok(())
}

/// Write the configuration file if it does not exist yet and check the embedding server
#[inline]
pub fn init_config(config: &Config) -> Result<()> {
    let config_path = config.config_file_path();
    if config_path.exists() {
        eprintln!("{}", style("Found existing configuration.").green());
    } else {
        config.save().context("Failed to save configuration")?;
        eprintln!("{}", style("✓ Default configuration written").green());
    }
    eprintln!("Config file: {}", style(config_path.display()).cyan());

    eprintln!("{}", style("Testing embedding server...").yellow());
    match OllamaClient::new(&config.ollama).and_then(|client| client.health_check()) {
        Ok(()) => eprintln!("{}", style("✓ Ollama connection successful!").green()),
        Err(e) => {
            eprintln!(
                "{}",
                style("⚠ Warning: Could not connect to Ollama").yellow()
            );
            eprintln!("  Error: {}", e);
        }
    }

    Ok(())
}

/// Ingest files from disk. Every file is attempted; failures are reported at the end.
#[inline]
pub async fn ingest_files(
    config: &Config,
    paths: Vec<PathBuf>,
    document_id: Option<String>,
) -> Result<()> {
    if document_id.is_some() && paths.len() > 1 {
        bail!("--id can only be used when ingesting a single file");
    }

    let pipeline = RagPipeline::from_config(config).await?;

    let mut files = Vec::with_capacity(paths.len());
    let mut failures = 0_usize;
    for path in &paths {
        let Some(filename) = path.file_name().and_then(|n| n.to_str()) else {
            eprintln!("{} {}: not a file", style("✗").red(), path.display());
            failures += 1;
            continue;
        };
        match tokio::fs::read(path).await {
            Ok(bytes) => files.push(SourceFile {
                document_id: document_id.clone(),
                filename: filename.to_string(),
                bytes,
            }),
            Err(e) => {
                error!("Failed to read {}: {}", path.display(), e);
                eprintln!("{} {}: {}", style("✗").red(), path.display(), e);
                failures += 1;
            }
        }
    }

    let bar = if console::user_attended_stderr() {
        ProgressBar::new_spinner().with_style(
            ProgressStyle::with_template("{spinner} Ingesting {msg}")
                .expect("style template is valid"),
        )
    } else {
        ProgressBar::hidden()
    };
    bar.set_message(format!("{} files", files.len()));
    bar.enable_steady_tick(Duration::from_millis(120));

    let outcomes = pipeline.ingest_batch(files).await;
    bar.finish_and_clear();

    for outcome in &outcomes {
        match &outcome.result {
            Ok(count) => println!(
                "{} {} → {} ({} chunks)",
                style("✓").green(),
                outcome.filename,
                style(&outcome.document_id).cyan(),
                count
            ),
            Err(e) => {
                failures += 1;
                eprintln!("{} {}: {}", style("✗").red(), outcome.filename, e);
            }
        }
    }

    info!(
        "Ingested {} of {} files",
        outcomes.iter().filter(|o| o.result.is_ok()).count(),
        paths.len()
    );
    if failures > 0 {
        bail!("{} of {} files could not be ingested", failures, paths.len());
    }

    Ok(())
}

/// Answer a question from the ingested documents
#[inline]
pub async fn ask_question(config: &Config, question: String, options: AskOptions) -> Result<()> {
    let pipeline = RagPipeline::from_config(config).await?;
    let request = AskRequest {
        query: question,
        k: options.k,
        window: options.window,
        budget: options.budget,
        document_id: options.document,
    };
    let defaults = pipeline.retrieval_defaults();
    info!(
        "Retrieving top {} chunks with window {} and a {} character budget",
        request.k.unwrap_or(defaults.top_k),
        request.window.unwrap_or(defaults.window),
        request.budget.unwrap_or(defaults.budget)
    );

    let result = if options.prompt_only {
        pipeline.ask(&request).await.map(|prompt| (prompt, None))
    } else {
        let synthesizer = ChatCompletionClient::new(&config.completion)?;
        pipeline
            .answer(&request, &synthesizer)
            .await
            .map(|answer| (answer.prompt, Some(answer.text)))
    };

    let (prompt, answer) = match result {
        Ok(result) => result,
        Err(RagError::EmptyContext) => {
            println!("No information about this was found in the ingested documents.");
            bail!("no relevant context for the question");
        }
        Err(e) => return Err(e.into()),
    };

    match answer {
        Some(answer) => println!("{}", answer),
        None => println!("{}", prompt.prompt),
    }

    eprintln!();
    eprintln!("{}", style("Sources:").bold().yellow());
    for source in &prompt.sources {
        eprintln!(
            "  {} ({}) chunks {}-{}, {} matched",
            style(&source.filename).cyan(),
            source.document_id,
            source.sequence.start(),
            source.sequence.end(),
            source.matched
        );
    }
    if prompt.trimmed_blocks > 0 {
        warn!(
            "{} context blocks did not fit the prompt budget",
            prompt.trimmed_blocks
        );
        eprintln!(
            "  {}",
            style(format!(
                "{} more blocks left out to fit the budget",
                prompt.trimmed_blocks
            ))
            .dim()
        );
    }
    for hit in &prompt.hits {
        eprintln!(
            "  #{} {} score {:.3}",
            hit.rank,
            style(&hit.chunk_id).dim(),
            hit.score
        );
    }

    Ok(())
}

/// List every ingested document
#[inline]
pub async fn list_documents(config: &Config) -> Result<()> {
    let pipeline = RagPipeline::from_config(config).await?;
    let documents = pipeline.list_documents().await?;

    if documents.is_empty() {
        println!("No documents have been ingested yet.");
        println!("Use 'docs-rag ingest <file>' to add one.");
        return Ok(());
    }

    println!("Documents ({} total):", documents.len());
    println!();
    for document in &documents {
        println!("📄 {} (ID: {})", document.filename, document.id);
        println!("   Format: {}", document.format.as_str());
        println!("   Chunks: {}", document.chunk_count);
        println!(
            "   Ingested: {}",
            document.ingested_at.format("%Y-%m-%d %H:%M:%S")
        );
        println!();
    }

    Ok(())
}

/// Print a document's text rebuilt from its chunks
#[inline]
pub async fn show_document(config: &Config, document_id: &str) -> Result<()> {
    let pipeline = RagPipeline::from_config(config).await?;
    let text = pipeline
        .document_text(document_id)
        .await
        .with_context(|| format!("Failed to load document {}", document_id))?;
    println!("{}", text);
    Ok(())
}

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use docs_rag::Result;
use docs_rag::commands::{
    AskOptions, ask_question, ingest_files, init_config, list_documents, show_config,
    show_document,
};
use docs_rag::config::{Config, get_config_dir};

#[derive(Parser)]
#[command(name = "docs-rag")]
#[command(about = "Ask questions about your own documents using retrieval-augmented generation")]
#[command(version)]
struct Cli {
    /// Directory holding config.toml and the stores (defaults to ~/.docs-rag)
    #[arg(long, global = true, env = "DOCS_RAG_HOME")]
    home: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default configuration and check the embedding server
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Extract, chunk, embed and index files
    Ingest {
        /// Files to ingest (.txt, .md, .html, .csv)
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Document id to use instead of a generated one (single file only)
        #[arg(long)]
        id: Option<String>,
    },
    /// Answer a question from the ingested documents
    Ask {
        question: String,
        /// Number of chunks to match
        #[arg(long)]
        k: Option<usize>,
        /// Neighboring chunks included on each side of a match
        #[arg(long)]
        window: Option<u32>,
        /// Maximum prompt size in characters
        #[arg(long)]
        budget: Option<usize>,
        /// Only search this document
        #[arg(long)]
        document: Option<String>,
        /// Print the assembled prompt without calling the completion model
        #[arg(long)]
        prompt_only: bool,
    },
    /// List ingested documents
    List,
    /// Print the text of an ingested document
    Show {
        /// Document id
        document_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let home = match cli.home {
        Some(home) => home,
        None => get_config_dir()?,
    };
    let config = Config::load(&home)?;

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config(&config)?;
            } else {
                init_config(&config)?;
            }
        }
        Commands::Ingest { paths, id } => {
            ingest_files(&config, paths, id).await?;
        }
        Commands::Ask {
            question,
            k,
            window,
            budget,
            document,
            prompt_only,
        } => {
            let options = AskOptions {
                k,
                window,
                budget,
                document,
                prompt_only,
            };
            ask_question(&config, question, options).await?;
        }
        Commands::List => {
            list_documents(&config).await?;
        }
        Commands::Show { document_id } => {
            show_document(&config, &document_id).await?;
        }
    }

    Ok(())
}

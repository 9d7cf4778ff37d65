use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use docshelf::chunk::Chunker;
use docshelf::config::{load_config, Config};
use docshelf::embedding::{create_provider, EmbeddingProvider};
use docshelf::ingest::{BulkIngestResult, Ingestor};
use docshelf::search::{print_hits, SearchMode};
use docshelf::store::Store;
use docshelf::token::create_measurer;
use docshelf::{catalog, search};

#[derive(Parser)]
#[command(name = "docshelf", version, about = "Ingest and search documents as embedded chunks")]
struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true, default_value = "./docshelf.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and schema
    Init,

    /// Ingest files, folders, or URLs
    Ingest {
        /// File paths, folder paths, or http(s) URLs
        #[arg(required = true)]
        paths: Vec<String>,

        /// Library to ingest into
        #[arg(long)]
        library: Option<String>,

        /// Do not descend into subdirectories of folder arguments
        #[arg(long)]
        no_recursive: bool,

        /// Maximum files ingested concurrently per folder
        #[arg(long)]
        max_concurrency: Option<usize>,
    },

    /// Search indexed chunks
    Search {
        query: String,

        /// keyword, semantic, or hybrid
        #[arg(long, default_value = "keyword")]
        mode: String,

        /// Restrict to one library
        #[arg(long)]
        library: Option<String>,

        /// Maximum results
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Print one document's metadata and chunks
    Get { doc_id: String },

    /// List indexed documents
    Documents {
        #[arg(long)]
        library: Option<String>,

        #[arg(long, default_value_t = 50)]
        limit: i64,

        #[arg(long, default_value_t = 0)]
        offset: i64,
    },

    /// List libraries with document and chunk counts
    Libraries,

    /// Delete all chunks of one document
    Delete { doc_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("docshelf=info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let store = Store::open(&config.db.path).await?;
            store.close().await;
            println!("Initialized database at {}", config.db.path.display());
            Ok(())
        }

        Commands::Ingest {
            paths,
            library,
            no_recursive,
            max_concurrency,
        } => {
            let library = library.unwrap_or_else(|| config.ingest.default_library.clone());
            let max_concurrency = max_concurrency.unwrap_or(config.ingest.max_concurrency);
            let failed = run_ingest(&config, &paths, &library, !no_recursive, max_concurrency).await?;
            if failed > 0 {
                std::process::exit(1);
            }
            Ok(())
        }

        Commands::Search {
            query,
            mode,
            library,
            limit,
        } => {
            let mode: SearchMode = mode.parse()?;
            let store = Store::open(&config.db.path).await?;
            let embedder = create_provider(&config.embedding)
                .context("Failed to create embedding provider")?;
            let hits = search::search(
                &store,
                &embedder,
                &config.retrieval,
                &query,
                mode,
                library.as_deref(),
                limit.unwrap_or(config.retrieval.final_limit as usize),
            )
            .await?;
            print_hits(&hits);
            store.close().await;
            Ok(())
        }

        Commands::Get { doc_id } => {
            let store = Store::open(&config.db.path).await?;
            catalog::run_get(&store, &doc_id).await?;
            store.close().await;
            Ok(())
        }

        Commands::Documents {
            library,
            limit,
            offset,
        } => {
            let store = Store::open(&config.db.path).await?;
            catalog::run_documents(&store, library.as_deref(), limit, offset).await?;
            store.close().await;
            Ok(())
        }

        Commands::Libraries => {
            let store = Store::open(&config.db.path).await?;
            catalog::run_libraries(&store).await?;
            store.close().await;
            Ok(())
        }

        Commands::Delete { doc_id } => {
            let store = Store::open(&config.db.path).await?;
            catalog::run_delete(&store, &doc_id).await?;
            store.close().await;
            Ok(())
        }
    }
}

/// Run ingestion for a mix of file, folder, and URL arguments. Returns the
/// number of failed items.
async fn run_ingest(
    config: &Config,
    paths: &[String],
    library: &str,
    recursive: bool,
    max_concurrency: usize,
) -> Result<usize> {
    let store = Arc::new(Store::open(&config.db.path).await?);
    let embedder: Arc<dyn EmbeddingProvider> =
        create_provider(&config.embedding).context("Failed to create embedding provider")?;
    let measurer = create_measurer(&config.tokenizer);
    let chunker = Arc::new(Chunker::new(measurer, &config.chunking));
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.http.timeout_secs))
        .user_agent(config.http.user_agent.clone())
        .build()
        .context("Failed to build HTTP client")?;

    let ingestor = Ingestor::new(Arc::clone(&store), embedder, chunker, http);
    let mut failed = 0usize;

    for path in paths {
        let is_url = path.starts_with("http://") || path.starts_with("https://");
        if !is_url && Path::new(path).is_dir() {
            let result = ingestor
                .ingest_folder(Path::new(path), library, None, recursive, max_concurrency)
                .await?;
            print_bulk_summary(path, &result);
            failed += result.failed;
        } else {
            match ingestor.ingest(path, library, None).await {
                Ok(r) => println!(
                    "{}: {} ({} chunks, doc {})",
                    r.source, r.status, r.chunk_count, r.doc_id
                ),
                Err(e) => {
                    eprintln!("{}: failed: {:#}", path, anyhow::Error::from(e));
                    failed += 1;
                }
            }
        }
    }

    store.close().await;
    Ok(failed)
}

fn print_bulk_summary(folder: &str, result: &BulkIngestResult) {
    println!(
        "{}: {} file(s) -- {} indexed, {} replaced, {} skipped, {} failed",
        folder, result.total, result.indexed, result.replaced, result.skipped, result.failed
    );
    for item in &result.results {
        println!(
            "  {}: {} ({} chunks, doc {})",
            item.source, item.status, item.chunk_count, item.doc_id
        );
    }
    for failure in &result.failures {
        eprintln!("  {}: {}", failure.file, failure.error);
    }
}

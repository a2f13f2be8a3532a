use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use symbol_rag::config::Config;
use symbol_rag::parser::index_file::index_path_for;
use symbol_rag::tasks::{
    ComputeChunksOutcome, ComputeChunksRequest, IndexFileOutcome, IndexFileRequest, IndexSummary,
    SourceWalker, index_files, spawn_compute_chunks,
};
use symbol_rag::vector_cache::VectorCache;
use symbol_rag::vector_db::{LanceVectorDB, VectorDatabase};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "symbol-rag")]
#[command(version = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_COMMIT_HASH"),
    ", built ",
    env!("BUILD_TIMESTAMP"),
    ")"
))]
#[command(
    about = "Structural source indexing and vector storage for code retrieval",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory for symbol index files
    #[arg(long, global = true, env = "SYMBOL_RAG_INDEX_DIR")]
    index_dir: Option<PathBuf>,

    /// Vector database directory
    #[arg(long, global = true, env = "SYMBOL_RAG_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Embedding dimensions
    #[arg(long, global = true, env = "SYMBOL_RAG_DIMENSIONS")]
    dimensions: Option<usize>,

    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse files and write their symbol indexes
    Index {
        /// Files or directories to index
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Print the chunks of one file
    Chunks {
        file: PathBuf,

        /// Print each chunk's full text
        #[arg(long)]
        text: bool,
    },

    /// Check vector database integrity
    Check {
        /// Delete every violating row
        #[arg(long)]
        repair: bool,
    },

    /// Compact the vector database
    Compact,

    /// Show row counts and vector cache usage
    Stats,
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load_or_default()?,
    };
    config.apply_env_overrides();
    if let Some(dir) = &cli.index_dir {
        config.index.index_dir = dir.clone();
    }
    if let Some(path) = &cli.db_path {
        config.vector_db.path = path.clone();
    }
    if let Some(dims) = cli.dimensions {
        config.vector_db.dimensions = dims;
    }
    config.validate()?;
    Ok(config)
}

fn absolute(path: &Path) -> Result<PathBuf> {
    std::fs::canonicalize(path).with_context(|| format!("Failed to resolve {:?}", path))
}

async fn open_db(config: &Config) -> Result<LanceVectorDB> {
    Ok(
        LanceVectorDB::open(&config.vector_db.path, config.vector_db.dimensions)
            .await?
            .with_search_oversample(config.vector_db.search_oversample),
    )
}

async fn run_index(config: &Config, paths: &[PathBuf]) -> Result<()> {
    let mut requests = Vec::new();
    for path in paths {
        let root = absolute(path)?;
        let files = SourceWalker::new(&root, config.index.max_file_size)
            .with_excludes(config.index.exclude_patterns.clone())
            .walk()?;

        requests.extend(files.into_iter().map(|file| {
            let file_path = file.path.to_string_lossy().to_string();
            IndexFileRequest {
                index_path: index_path_for(&config.index.index_dir, &file_path),
                file_path,
                content: Some(file.content),
            }
        }));
    }

    let outcomes = tokio::task::spawn_blocking(move || {
        let paths: Vec<String> = requests.iter().map(|r| r.file_path.clone()).collect();
        paths.into_iter().zip(index_files(requests)).collect::<Vec<_>>()
    })
    .await
    .context("Indexing task panicked")?;

    for (path, outcome) in &outcomes {
        if let IndexFileOutcome::Failed { message } = outcome {
            eprintln!("failed: {}: {}", path, message);
        }
    }
    let summary = IndexSummary::from_outcomes(outcomes.iter().map(|(_, o)| o));
    println!(
        "indexed {} files ({} symbols), {} up to date, {} failed",
        summary.indexed, summary.symbols, summary.up_to_date, summary.failed
    );
    Ok(())
}

async fn run_chunks(config: &Config, file: &Path, text: bool) -> Result<()> {
    let file_path = absolute(file)?.to_string_lossy().to_string();
    let outcome = spawn_compute_chunks(ComputeChunksRequest {
        index_path: index_path_for(&config.index.index_dir, &file_path),
        file_path,
        content: None,
    })
    .await;

    match outcome {
        ComputeChunksOutcome::Chunks { sha256, chunks } => {
            println!("{} chunks (file sha256 {})", chunks.len(), sha256);
            for chunk in chunks {
                println!("{:>6}-{:<6} {}", chunk.start_line, chunk.end_line, chunk.sha256);
                if text {
                    println!("{}\n", chunk.text);
                }
            }
            Ok(())
        }
        ComputeChunksOutcome::Failed { message } => anyhow::bail!(message),
    }
}

async fn run_check(config: &Config, repair: bool) -> Result<()> {
    let db = open_db(config).await?;
    let report = db.check_integrity(repair).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    db.close()?;
    if !report.is_clean() && !repair {
        std::process::exit(1);
    }
    Ok(())
}

async fn run_compact(config: &Config) -> Result<()> {
    let db = open_db(config).await?;
    db.compact().await?;
    db.close()
}

async fn run_stats(config: &Config) -> Result<()> {
    let db = open_db(config).await?;
    let stats = db.statistics().await?;
    db.close()?;
    println!("{}", serde_json::to_string_pretty(&stats)?);

    let cache = VectorCache::load(
        &config.vector_cache.dir,
        config.vector_db.dimensions,
        config.vector_cache.options(),
    )?;
    match cache {
        Some(cache) => println!(
            "vector cache: {} live, {} dead, fragmentation {:.2}",
            cache.live_count(),
            cache.dead_count(),
            cache.fragmentation_ratio()
        ),
        None => println!("vector cache: none"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match &cli.command {
        Commands::Index { paths } => run_index(&config, paths).await,
        Commands::Chunks { file, text } => run_chunks(&config, file, *text).await,
        Commands::Check { repair } => run_check(&config, *repair).await,
        Commands::Compact => run_compact(&config).await,
        Commands::Stats => run_stats(&config).await,
    }
}

//! RAG CLI - Command-line interface for the retrieval-augmented QA service.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use tracing_subscriber::EnvFilter;

use rag_core::RagConfig;
use rag_server::{shutdown_signal, HttpServer, RagService};

/// RAG - Retrieval-augmented question answering over your documents
#[derive(Parser)]
#[command(name = "rag")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (default: user config dir, then ./rag-qa.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database path, overriding the configuration
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API server
    Serve {
        /// Bind address, overriding the configuration
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Ingest a file or directory of .txt/.md files
    Ingest {
        /// Path to file or directory to ingest
        path: PathBuf,

        /// Recursively process directories
        #[arg(short, long)]
        recursive: bool,
    },

    /// Search the knowledge base
    Search {
        /// Search query
        query: String,

        /// Maximum number of results
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Rerank results with the cross-encoder
        #[arg(long)]
        rerank: bool,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Answer a question from the knowledge base
    Ask {
        /// Question
        query: String,

        /// Number of context passages
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
    },

    /// Chat with the model without retrieval
    Chat {
        /// Prompt
        prompt: String,

        /// Print the reply as it is generated
        #[arg(short, long)]
        stream: bool,
    },

    /// Show statistics
    Stats,
}

fn setup_logging(verbose: bool, json: bool, default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if verbose { "debug" } else { default_level };
        EnvFilter::new(level)
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().try_init().ok();
    } else {
        builder.try_init().ok();
    }
}

fn load_config(cli: &Cli) -> Result<RagConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => RagConfig::load(path)?,
        None => RagConfig::load_default()?,
    };
    config.apply_env();

    if let Some(path) = &cli.database {
        config.database.path = path.clone();
    }
    if let Commands::Serve { bind: Some(bind) } = &cli.command {
        config.server.bind_address = bind.clone();
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let default_level = match cli.command {
        Commands::Serve { .. } => "info",
        _ => "warn",
    };
    setup_logging(cli.verbose, cli.json_logs, default_level);

    let config = load_config(&cli)?;
    let service = Arc::new(RagService::from_config(&config)?);

    match cli.command {
        Commands::Serve { .. } => {
            HttpServer::new(config.server.clone(), service)
                .run(shutdown_signal())
                .await?;
        }
        Commands::Ingest { path, recursive } => {
            ingest(&service, &path, recursive).await?;
        }
        Commands::Search {
            query,
            top_k,
            rerank,
            json,
        } => {
            let results = service.search(&query, top_k, rerank).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else if results.is_empty() {
                println!("No results.");
            } else {
                for (i, result) in results.iter().enumerate() {
                    println!("{}. [{:.3}] {}", i + 1, result.score, result.content);
                }
            }
        }
        Commands::Ask { query, top_k } => {
            let outcome = service.answer(&query, top_k).await?;
            println!("{}", outcome.answer.reply);
            println!(
                "\n({} context passage(s), model {}, {} ms)",
                outcome.context.len(),
                outcome.answer.model_id,
                outcome.answer.latency_ms
            );
        }
        Commands::Chat { prompt, stream } => {
            if stream {
                chat_stream(&service, &prompt).await?;
            } else {
                let answer = service.chat(&prompt).await?;
                println!("{}", answer.reply);
            }
        }
        Commands::Stats => {
            let documents = service.document_count().await?;
            println!("Database: {}", config.database.path.display());
            println!("Documents: {}", documents);
        }
    }

    Ok(())
}

async fn ingest(
    service: &RagService,
    path: &Path,
    recursive: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let files = collect_files(path, recursive)?;

    if files.is_empty() {
        println!("No .txt or .md files found at: {}", path.display());
        return Ok(());
    }

    println!("Ingesting {} file(s)...", files.len());

    let mut success_count = 0;
    let mut error_count = 0;
    let mut chunk_count = 0;

    for file_path in files {
        let content = match fs::read_to_string(&file_path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("  Error reading {}: {}", file_path.display(), e);
                error_count += 1;
                continue;
            }
        };

        match service.ingest(&content).await {
            Ok(report) => {
                println!("  {} - {} chunk(s)", file_path.display(), report.chunks);
                chunk_count += report.chunks;
                success_count += 1;
            }
            Err(e) => {
                eprintln!("  {} - Error: {}", file_path.display(), e);
                error_count += 1;
            }
        }
    }

    println!(
        "\nComplete: {} succeeded, {} failed, {} chunk(s) stored",
        success_count, error_count, chunk_count
    );

    Ok(())
}

async fn chat_stream(service: &RagService, prompt: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut fragments = service.chat_stream(prompt).await?;
    let mut stdout = std::io::stdout();

    while let Some(fragment) = fragments.next().await {
        match fragment {
            Ok(text) => {
                stdout.write_all(text.as_bytes())?;
                stdout.flush()?;
            }
            Err(e) => {
                tracing::warn!("Stream ended early: {}", e);
                break;
            }
        }
    }
    writeln!(stdout)?;
    Ok(())
}

fn collect_files(path: &Path, recursive: bool) -> Result<Vec<PathBuf>, std::io::Error> {
    let mut files = Vec::new();

    if path.is_file() {
        if is_supported_file(path) {
            files.push(path.to_path_buf());
        }
    } else if path.is_dir() {
        let mut entries: Vec<PathBuf> = fs::read_dir(path)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<Result<_, _>>()?;
        entries.sort();

        for entry_path in entries {
            if entry_path.is_file() && is_supported_file(&entry_path) {
                files.push(entry_path);
            } else if entry_path.is_dir() && recursive {
                files.extend(collect_files(&entry_path, recursive)?);
            }
        }
    }

    Ok(files)
}

fn is_supported_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("txt") | Some("md")
    )
}

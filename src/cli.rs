//! rag - CLI for the local semantic code-intelligence engine.
//!
//! # Usage
//!
//! ```bash
//! # Index a workspace
//! rag index --root /path/to/repo
//!
//! # Hybrid search
//! rag search --root /path/to/repo "parse configuration"
//!
//! # Engine status
//! rag status --root /path/to/repo
//!
//! # Watch for changes and keep the index fresh
//! rag watch --root /path/to/repo
//! ```
//!
//! Designed for automation: `--json` outputs machine-readable JSON, errors
//! go to stderr, exit codes are 0 = success, 1 = error.

use anyhow::Result;
use clap::{Parser, Subcommand};
use rag_index::config::Config;
use rag_index::indexer::IndexOptions;
use rag_index::search::{FusionStrategy, SearchMode, SearchRequest};
use rag_index::server::CoreServer;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rag")]
#[command(version)]
#[command(about = "Local semantic code intelligence: hybrid search, incremental indexing, call graphs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Workspace root (alias: --workspace)
    #[arg(short, long, global = true, default_value = ".", alias = "workspace")]
    root: PathBuf,

    /// Output JSON instead of human-readable text
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Build or update the index for the workspace
    Index {
        /// Project name (defaults to the root directory name)
        #[arg(long)]
        project: Option<String>,

        /// Exclude paths matching this glob (repeatable, gitignore syntax)
        #[arg(long, value_name = "GLOB")]
        exclude: Vec<String>,

        /// Drop existing data for the project first
        #[arg(long)]
        force: bool,
    },

    /// Search the index
    Search {
        /// Search query
        query: String,

        /// Mode: semantic, keyword, hybrid
        #[arg(long, default_value = "hybrid")]
        mode: String,

        /// Fusion strategy: weighted, rrf, cascade
        #[arg(long, default_value = "weighted")]
        fusion: String,

        /// Maximum results
        #[arg(short = 'k', long, default_value = "10")]
        limit: usize,

        /// Restrict to one project
        #[arg(long)]
        project: Option<String>,

        /// Restrict to one language
        #[arg(long)]
        language: Option<String>,
    },

    /// Show engine status
    Status,

    /// Watch the workspace and keep the index fresh until interrupted
    Watch {
        /// Project name (defaults to the root directory name)
        #[arg(long)]
        project: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let root = cli.root.canonicalize().unwrap_or(cli.root.clone());
    let config = Config::load(&root);
    let core = CoreServer::open(&root, config)?;

    match cli.command {
        Commands::Index {
            project,
            exclude,
            force,
        } => {
            let project = project.unwrap_or_else(|| core.default_project());
            let report = if force {
                core.reindex(&project, &root).await?
            } else {
                core.index_project(
                    &project,
                    &root,
                    IndexOptions {
                        recursive: true,
                        exclude_globs: exclude,
                        ..Default::default()
                    },
                )
                .await?
            };

            if cli.json {
                println!(
                    "{}",
                    serde_json::json!({
                        "files_indexed": report.files_indexed,
                        "files_skipped": report.files_skipped,
                        "units_added": report.units_added,
                        "units_updated": report.units_updated,
                        "units_removed": report.units_removed,
                        "errors": report.errors,
                        "elapsed_ms": report.elapsed_ms,
                    })
                );
            } else {
                println!(
                    "Indexed {} files ({} unchanged): +{} units, ~{} updated, -{} removed in {}ms",
                    report.files_indexed,
                    report.files_skipped,
                    report.units_added,
                    report.units_updated,
                    report.units_removed,
                    report.elapsed_ms
                );
                for (file, error) in &report.errors {
                    eprintln!("  error: {file}: {error}");
                }
            }
        }

        Commands::Search {
            query,
            mode,
            fusion,
            limit,
            project,
            language,
        } => {
            let mut request = SearchRequest::new(query);
            request.mode = SearchMode::parse(&mode)?;
            request.fusion = FusionStrategy::parse(&fusion)?;
            request.limit = limit;
            request.project = project;
            request.language = language;

            let results = core.search(request).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else if results.is_empty() {
                println!("No results.");
            } else {
                for (i, result) in results.iter().enumerate() {
                    let location = result
                        .metadata
                        .get("file_path")
                        .and_then(|v| v.as_str())
                        .unwrap_or("<memory>");
                    let preview: String = result
                        .content
                        .split_whitespace()
                        .collect::<Vec<_>>()
                        .join(" ")
                        .chars()
                        .take(120)
                        .collect();
                    println!(
                        "{:>2}. [{:.3} {}] {}\n    {}",
                        i + 1,
                        result.score_final,
                        result.confidence_label.as_str(),
                        location,
                        preview
                    );
                }
            }
        }

        Commands::Status => {
            let status = core.status().await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                println!("Engine status:");
                println!("  code units:    {}", status.code_units);
                println!("  memories:      {}", status.memories);
                println!("  projects:      {}", status.projects.join(", "));
                println!("  bm25 docs:     {}", status.bm25_documents);
                println!(
                    "  call graph:    {} functions, {} edges",
                    status.graph_functions, status.graph_edges
                );
                println!(
                    "  embeddings:    {} (dim {})",
                    status.embedding_model, status.embedding_dimension
                );
                println!(
                    "  cache:         {} entries, {} hits / {} misses",
                    status.cache.entries, status.cache.hits, status.cache.misses
                );
                println!("  health:        {:.2}", core.health_score().await);
            }
        }

        Commands::Watch { project } => {
            let project = project.unwrap_or_else(|| core.default_project());
            core.switch_project(&project)?;
            core.watch(&root, true).await?;
            println!("Watching {} (ctrl-c to stop)", root.display());
            tokio::signal::ctrl_c().await?;
            core.watch(&root, false).await?;
            core.run_maintenance().await?;
        }
    }

    Ok(())
}

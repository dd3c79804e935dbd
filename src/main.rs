//! # docindex CLI (`dix`)
//!
//! Thin front end over [`docindex::Engine`]. Every command prints JSON on
//! stdout; logs go to stderr and are filtered with `RUST_LOG`
//! (default `docindex=info`).
//!
//! ## Usage
//!
//! ```bash
//! dix --config ./config/docindex.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `dix add <path>` | Index one document |
//! | `dix add-dir <dir>` | Index every matching file under a directory |
//! | `dix view` | List every stored record |
//! | `dix remove <source>` | Delete all records of a source (asks first unless `--yes`) |
//! | `dix query "<text>"` | Nearest records to the text |
//! | `dix exists <source>` | Whether a source is indexed |
//!
//! Exit status is non-zero when an ingest fails, a delete is partial, or the
//! engine cannot be built.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use docindex::config::{self, Config};
use docindex::models::IngestOutcome;
use docindex::search::DEFAULT_K;
use docindex::Engine;

/// Document indexing and retrieval over interchangeable vector stores.
#[derive(Parser)]
#[command(name = "dix", version)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// A missing file at the default path means "all defaults"; an explicit
    /// path must exist.
    #[arg(long, global = true, default_value = "./config/docindex.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index one document (PDF, HTML, or text).
    Add { path: PathBuf },

    /// Index every matching file under a directory.
    AddDir {
        dir: PathBuf,
        /// Include glob, relative to the directory. Repeatable.
        /// Defaults to html, pdf, md, and txt files.
        #[arg(long = "include")]
        include: Vec<String>,
    },

    /// List every stored record.
    View,

    /// Delete every record of a source.
    Remove {
        source: String,
        /// Skip the confirmation prompt.
        #[arg(long)]
        yes: bool,
    },

    /// Return the records nearest to a query text.
    Query {
        text: String,
        #[arg(long, default_value_t = DEFAULT_K)]
        n_results: usize,
    },

    /// Check whether a source is indexed.
    Exists { source: String },
}

#[derive(Serialize)]
struct DirEntryOutcome {
    path: String,
    #[serde(flatten)]
    outcome: IngestOutcome,
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn load(cli: &Cli) -> anyhow::Result<Config> {
    let default_path = PathBuf::from("./config/docindex.toml");
    if cli.config == default_path && !cli.config.exists() {
        let mut config = Config::default();
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        return Ok(config);
    }
    config::load_config(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))
}

fn confirm(source: &str) -> anyhow::Result<bool> {
    eprint!("Remove every record of '{}'? [y/N] ", source);
    std::io::stderr().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("docindex=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load(&cli)?;
    let engine = Engine::open(&config).await?;

    match cli.command {
        Commands::Add { path } => {
            let outcome = engine.ingest(&path).await;
            print_json(&outcome)?;
            if let IngestOutcome::Failed { source_id, reason } = outcome {
                bail!("failed to index {}: {}", source_id, reason);
            }
        }
        Commands::AddDir { dir, include } => {
            let outcomes = engine.ingest_dir(&dir, &include).await?;
            let failures = outcomes
                .iter()
                .filter(|(_, o)| matches!(o, IngestOutcome::Failed { .. }))
                .count();
            let rendered: Vec<DirEntryOutcome> = outcomes
                .into_iter()
                .map(|(path, outcome)| DirEntryOutcome {
                    path: path.display().to_string(),
                    outcome,
                })
                .collect();
            print_json(&rendered)?;
            if failures > 0 {
                bail!("{} of {} files failed to index", failures, rendered.len());
            }
        }
        Commands::View => {
            let listing = engine.get_all().await?;
            print_json(&serde_json::json!({
                "backend": engine.backend().as_str(),
                "count": listing.records.len(),
                "truncated": listing.truncated,
                "records": listing.records,
            }))?;
        }
        Commands::Remove { source, yes } => {
            if !engine.exists(&source).await? {
                print_json(&serde_json::json!({ "source_id": source, "removed": 0 }))?;
                return Ok(());
            }
            if !yes && !confirm(&source)? {
                bail!("aborted; nothing removed");
            }
            let report = engine.remove(&source).await?;
            print_json(&report)?;
        }
        Commands::Query { text, n_results } => {
            let hits = engine.search(&text, n_results).await?;
            print_json(&hits)?;
        }
        Commands::Exists { source } => {
            let exists = engine.exists(&source).await?;
            print_json(&serde_json::json!({ "source_id": source, "exists": exists }))?;
        }
    }

    Ok(())
}

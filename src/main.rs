//! # docsift CLI
//!
//! ## Usage
//!
//! ```bash
//! docsift --config ./docsift.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docsift index <root>` | Build or rebuild the index artifact for a directory |
//! | `docsift progress` | Print the progress snapshot of the latest run |
//! | `docsift search <terms>...` | Keyword search over the artifact |
//! | `docsift stats` | Summarize the artifact |
//! | `docsift get <label>` | Print one entry |
//!
//! Logs go to stderr and honour `RUST_LOG` (default `docsift=info`).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use docsift::config;
use docsift::engine::Engine;
use docsift::progress::{self, ProgressMode};
use docsift::search::{self, SearchMode};
use docsift::{get, stats};

/// docsift: index mixed-format document archives into one searchable text file.
#[derive(Parser)]
#[command(name = "docsift", version)]
struct Cli {
    /// Path to configuration file (TOML). Missing file means built-in defaults.
    #[arg(long, global = true, default_value = "./docsift.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index a directory tree.
    ///
    /// Walks `root`, expands archives, extracts text and atomically replaces
    /// the index artifact. A failed run leaves the previous artifact intact.
    Index {
        /// Directory to index.
        root: PathBuf,

        /// Maximum directory depth below the root (files in root are depth 0).
        #[arg(long)]
        max_depth: Option<usize>,

        /// Maximum archive nesting to expand; 0 disables archive expansion.
        #[arg(long)]
        archive_depth: Option<usize>,

        /// Live progress on stderr: `human`, `json` or `off`.
        /// Defaults to `human` when stderr is a terminal.
        #[arg(long, value_parser = parse_progress_mode)]
        progress: Option<ProgressMode>,
    },

    /// Print the progress snapshot as JSON.
    Progress {
        /// Indexed root, used to locate the progress file.
        #[arg(long, default_value = ".")]
        root: PathBuf,
    },

    /// Search the index.
    Search {
        /// Terms, matched case-insensitively as substrings.
        #[arg(required = true)]
        terms: Vec<String>,

        /// `any` (default), `all`, or `exclude`.
        #[arg(long, default_value = "any")]
        mode: SearchMode,

        /// Maximum number of results.
        #[arg(long)]
        limit: Option<usize>,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,

        #[arg(long, default_value = ".")]
        root: PathBuf,
    },

    /// Summarize the index.
    Stats {
        #[arg(long, default_value = ".")]
        root: PathBuf,
    },

    /// Print one entry by label or virtual path.
    Get {
        label: String,

        #[arg(long, default_value = ".")]
        root: PathBuf,
    },
}

fn parse_progress_mode(s: &str) -> Result<ProgressMode, String> {
    match s {
        "human" => Ok(ProgressMode::Human),
        "json" => Ok(ProgressMode::Json),
        "off" => Ok(ProgressMode::Off),
        other => Err(format!(
            "invalid progress mode '{}': expected human, json or off",
            other
        )),
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("docsift=info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Index {
            root,
            max_depth,
            archive_depth,
            progress,
        } => {
            let mode = progress.unwrap_or_else(ProgressMode::default_for_tty);
            let mut engine = Engine::new(cfg).with_reporter(mode.reporter());
            let max_depth = max_depth.unwrap_or(engine.config().index.max_depth);
            let archive_depth = archive_depth.unwrap_or(engine.config().index.archive_depth);
            let (artifact, summary) = engine.run(&root, max_depth, archive_depth)?;

            println!("index {}", root.display());
            println!("  entries: {}", summary.entries);
            println!("  ocr used: {}", summary.ocr_used);
            println!("  empty: {}", summary.empty);
            println!("  duration: {:.1}s", summary.duration.as_secs_f64());
            println!("  artifact: {}", artifact.display());
            println!("ok");
        }
        Commands::Progress { root } => {
            let status = progress::read_progress(&cfg.progress_path(&root))?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Search {
            terms,
            mode,
            limit,
            json,
            root,
        } => {
            search::run_search(&cfg, &root, &terms, mode, limit, json)?;
        }
        Commands::Stats { root } => {
            stats::run_stats(&cfg, &root)?;
        }
        Commands::Get { label, root } => {
            get::run_get(&cfg, &root, &label)?;
        }
    }

    Ok(())
}

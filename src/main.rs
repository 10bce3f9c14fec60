//! # docsum CLI
//!
//! The `docsum` binary drives the ingestion and summarization pipeline:
//! schema setup, single-path processing for trigger notifications, scans
//! of the watched root, and record inspection.
//!
//! ## Usage
//!
//! ```bash
//! docsum --config ./config/docsum.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docsum init` | Create the SQLite database and run schema migrations |
//! | `docsum process <path>` | Process one newly created file (and its attachments) |
//! | `docsum scan` | Process every new or changed file under the watched root |
//! | `docsum get <path>` | Print the record for a source path as JSON |
//! | `docsum stats` | Record counts by type and status |
//!
//! Logs go to stderr (`RUST_LOG` controls the level); command output goes
//! to stdout.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use docsum::progress::ProgressMode;
use docsum::{config, get, ingest, migrate, stats};

/// docsum: extract, summarize and record every document landing in a
/// watched blob store.
#[derive(Parser)]
#[command(
    name = "docsum",
    about = "Document ingestion and summarization pipeline",
    version,
    long_about = "docsum extracts text from PDF, Word, plain-text and Outlook message files \
    (expanding nested message attachments), summarizes it in service-sized chunks, and stores \
    one queryable record per item in SQLite."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docsum.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the `records` and `checkpoints`
    /// tables. Idempotent.
    Init,

    /// Process one file, as if a creation notification arrived for it.
    ///
    /// Exits non-zero when any resulting record could not be persisted.
    Process {
        /// Path of the file relative to the watched root.
        path: String,

        /// Reprocess even when an up-to-date record exists.
        #[arg(long)]
        force: bool,
    },

    /// Process every discoverable file under the watched root.
    ///
    /// Incremental by default: only files modified after the last
    /// successful scan are processed.
    Scan {
        /// Ignore the checkpoint and consider every file.
        #[arg(long)]
        full: bool,

        /// List what would be processed without processing it.
        #[arg(long)]
        dry_run: bool,

        /// Reprocess even when an up-to-date record exists.
        #[arg(long)]
        force: bool,

        /// Maximum number of files to process.
        #[arg(long)]
        limit: Option<usize>,

        /// Progress output on stderr. Defaults to `human` on a terminal.
        #[arg(long, value_enum)]
        progress: Option<ProgressArg>,
    },

    /// Print the record for a source path.
    Get {
        /// Path of the file or attachment.
        path: String,

        /// Leave out extracted and per-page text.
        #[arg(long)]
        brief: bool,
    },

    /// Show record counts by file type and status.
    Stats,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressArg {
    Off,
    Human,
    Json,
}

impl From<ProgressArg> for ProgressMode {
    fn from(arg: ProgressArg) -> Self {
        match arg {
            ProgressArg::Off => ProgressMode::Off,
            ProgressArg::Human => ProgressMode::Human,
            ProgressArg::Json => ProgressMode::Json,
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Process { path, force } => {
            ingest::run_process(&cfg, &path, force).await?;
        }
        Commands::Scan {
            full,
            dry_run,
            force,
            limit,
            progress,
        } => {
            let mode = progress
                .map(ProgressMode::from)
                .unwrap_or_else(ProgressMode::default_for_tty);
            let reporter = mode.reporter();
            ingest::run_scan(&cfg, full, dry_run, force, limit, reporter.as_ref()).await?;
        }
        Commands::Get { path, brief } => {
            get::run_get(&cfg, &path, brief).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}

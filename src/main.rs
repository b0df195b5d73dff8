//! # mhtml-search CLI
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `mhtml-search init` | Create the index database and run schema migrations |
//! | `mhtml-search index --path <P>...` | Extract and persist JSON from every archive under the paths |
//! | `mhtml-search scan <P> --query <Q>` | Extract in memory and query once, without persisting |
//! | `mhtml-search sql <QUERY>` | Query the persisted index (SQL SELECT or free text) |
//! | `mhtml-search stats` | Show what the index holds |
//!
//! ## Examples
//!
//! ```bash
//! mhtml-search index --path ./pages --path /mnt/archive --threads 16
//! mhtml-search sql "SELECT file_path FROM mhtml_files WHERE file_path LIKE '%.mhtml'"
//! mhtml-search sql "SELECT file_path, COUNT(*) AS n FROM mhtml_data GROUP BY file_path" --analytics
//! mhtml-search scan ./pages --query john --format json
//! ```

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use mhtml_search::config::{self, Config};
use mhtml_search::ingest::Orchestrator;
use mhtml_search::output::{self, OutputFormat};
use mhtml_search::progress::{format_number, ProgressMode};
use mhtml_search::query::{self as query_backend, QueryOutcome};
use mhtml_search::stats;
use mhtml_search::store::IndexStore;

/// Search JSON embedded in MHTML web archives.
#[derive(Parser)]
#[command(
    name = "mhtml-search",
    about = "Find, extract, index, and query JSON embedded in MHTML web archives",
    version
)]
struct Cli {
    /// Path to a TOML configuration file.
    ///
    /// Defaults to `./mhtml-search.toml` when that file exists.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Index database path (overrides `db.path`).
    #[arg(long, global = true)]
    index_db: Option<PathBuf>,

    /// Worker thread count (overrides the storage-probe hint).
    #[arg(long, global = true)]
    threads: Option<usize>,

    /// Result output format.
    #[arg(long, global = true, value_enum)]
    format: Option<OutputFormat>,

    /// Maximum number of result rows to print.
    #[arg(long, global = true)]
    limit: Option<usize>,

    /// Progress on stderr. Defaults to `human` on a terminal, `off` otherwise.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressMode>,

    /// More logging (-v info, -vv debug). `RUST_LOG` takes precedence.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the index database. Safe to run more than once.
    Init,

    /// Extract JSON from every archive under the given paths and persist it.
    ///
    /// Re-indexing a path replaces what was stored for each archive, so
    /// nothing is duplicated.
    Index {
        /// Directory or archive to index. Repeat for several roots.
        #[arg(long = "path", required = true, num_args = 1..)]
        paths: Vec<PathBuf>,
    },

    /// Extract JSON from archives under a path and query it once, in memory.
    Scan {
        /// Directory or archive to scan.
        path: PathBuf,

        /// Substring to look for, or SQL over `mhtml_data` with `--analytics`.
        #[arg(long)]
        query: String,

        /// Run the query as SQL on the in-memory analytical engine.
        #[arg(long)]
        analytics: bool,
    },

    /// Query the persisted index.
    ///
    /// A statement starting with SELECT runs verbatim against `mhtml_files`
    /// and `json_data`; anything else is a full-text search over fragments.
    Sql {
        /// SQL SELECT statement or free-text term.
        query: String,

        /// Load every indexed fragment into the analytical engine as
        /// `mhtml_data` and run the SQL there.
        #[arg(long)]
        analytics: bool,
    },

    /// Show index statistics.
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let mut cfg = config::resolve_config(cli.config.as_deref())?;
    apply_overrides(&mut cfg, &cli)?;

    match cli.command {
        Commands::Init => {
            let store = open_store(&cfg).await?;
            println!("Index initialized at {}", store.path().display());
            store.close().await;
        }
        Commands::Index { ref paths } => {
            let store = open_store(&cfg).await?;
            let orchestrator = orchestrator(&cfg, &cli);
            let result = orchestrator.index(&store, paths).await;
            store.close().await;
            let summary = result?;

            println!("index");
            println!("  archives found:     {}", format_number(summary.found));
            println!("  processed:          {}", format_number(summary.processed));
            println!("  errors:             {}", format_number(summary.errors));
            println!("  fragments:          {}", format_number(summary.fragments));
            println!(
                "  elapsed:            {:.2}s ({:.1} archives/s)",
                summary.elapsed.as_secs_f64(),
                summary.rate()
            );
            println!("  index:              {}", cfg.db.path.display());
            println!("ok");
        }
        Commands::Scan {
            ref path,
            ref query,
            analytics,
        } => {
            let orchestrator = orchestrator(&cfg, &cli);
            let outcome = orchestrator
                .scan_and_search(std::slice::from_ref(path), query, analytics)
                .await?;
            print_outcome(&outcome, &cfg);
        }
        Commands::Sql {
            ref query,
            analytics,
        } => {
            let store = open_store(&cfg).await?;
            let outcome = query_backend::query_index(&store, query, analytics)
                .await
                .context("Failed to read fragments from the index")?;
            store.close().await;
            print_outcome(&outcome, &cfg);
        }
        Commands::Stats => {
            let store = open_store(&cfg).await?;
            stats::run_stats(&store).await?;
            store.close().await;
        }
    }

    Ok(())
}

fn setup_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "mhtml_search=info,warn",
        _ => "mhtml_search=debug,info",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn apply_overrides(cfg: &mut Config, cli: &Cli) -> Result<()> {
    if let Some(path) = &cli.index_db {
        cfg.db.path = path.clone();
    }
    if let Some(threads) = cli.threads {
        cfg.scan.threads = Some(threads);
    }
    if let Some(format) = cli.format {
        cfg.output.format = format;
    }
    if let Some(limit) = cli.limit {
        cfg.output.limit = limit;
    }
    config::validate(cfg).context("Invalid command-line options")
}

async fn open_store(cfg: &Config) -> Result<IndexStore> {
    IndexStore::open(&cfg.db.path)
        .await
        .with_context(|| format!("Failed to open index at {}", cfg.db.path.display()))
}

fn orchestrator(cfg: &Config, cli: &Cli) -> Orchestrator {
    let mode = cli.progress.unwrap_or_else(ProgressMode::default_for_tty);
    Orchestrator::new(
        cfg.scan.clone(),
        Arc::from(mode.reporter()),
        install_interrupt_handler(),
    )
}

/// First Ctrl+C stops dispatching new archives; a second one exits at once.
fn install_interrupt_handler() -> Arc<AtomicBool> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);

    tokio::spawn(async move {
        let mut count = 0u32;
        while tokio::signal::ctrl_c().await.is_ok() {
            count += 1;
            if count == 1 {
                eprintln!("\nInterrupt received, finishing in-flight archives...");
                eprintln!("Press Ctrl+C again to force exit immediately.");
                flag.store(true, Ordering::SeqCst);
            } else {
                eprintln!("\nForced exit!");
                std::process::exit(130);
            }
        }
    });

    shutdown
}

fn print_outcome(outcome: &QueryOutcome, cfg: &Config) {
    if let Some(diagnostic) = &outcome.diagnostic {
        eprintln!("Query error: {}", diagnostic);
    }
    output::print_results(&outcome.rows, cfg.output.format, cfg.output.limit);
}

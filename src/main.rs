//! crawldb main entry point
//!
//! This is the command-line interface for ingesting crawl output into a
//! SQLite store and managing that store's lifecycle.

use anyhow::Context;
use clap::{Parser, Subcommand};
use crawldb::config::{load_config_or_default, Config};
use crawldb::ingest::{ingest_file, IngestOptions};
use crawldb::lifecycle::{InitOutcome, Lifecycle, Operation, Outcome, RepairOutcome};
use crawldb::output::{print_analysis, write_markdown_report};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// crawldb: crawl-result ingestion and store management
///
/// Ingests newline-delimited JSON crawl records into a SQLite store,
/// classifying pages for JavaScript dependency and extracting their links,
/// and runs maintenance operations against that store.
#[derive(Parser, Debug)]
#[command(name = "crawldb")]
#[command(version = "1.0.0")]
#[command(about = "Crawl-result ingestion and store lifecycle management", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest a JSONL file of crawled pages
    Ingest {
        /// Newline-delimited JSON input file
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Store path (overrides the configured database path)
        #[arg(long, value_name = "PATH")]
        db: Option<PathBuf>,

        /// Do not snapshot an existing store before writing
        #[arg(long)]
        skip_backup: bool,

        /// Task identifier (default: input name plus timestamp)
        #[arg(long, value_name = "ID")]
        task_id: Option<String>,
    },

    /// Run a store lifecycle operation
    Db {
        /// One of: init, backup, optimize, migrate, repair, analyze
        #[arg(value_name = "OPERATION")]
        operation: Operation,

        /// Store path (overrides the configured database path)
        #[arg(long, value_name = "PATH")]
        db: Option<PathBuf>,

        /// Reinitialize (init), re-run (migrate) or rebuild regardless (repair)
        #[arg(long)]
        force: bool,

        /// Also write the analyze report as markdown
        #[arg(long, value_name = "PATH")]
        markdown: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    let config = load_config_or_default(cli.config.as_deref()).with_context(|| match &cli.config {
        Some(path) => format!("Failed to load configuration from {}", path.display()),
        None => "Failed to build default configuration".to_string(),
    })?;

    match cli.command {
        Command::Ingest {
            input,
            db,
            skip_backup,
            task_id,
        } => {
            let store = store_path(db, &config);
            handle_ingest(&input, &store, &config, task_id, skip_backup)
        }
        Command::Db {
            operation,
            db,
            force,
            markdown,
        } => {
            let store = store_path(db, &config);
            handle_db(operation, &store, &config, force, markdown.as_deref())
        }
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("crawldb=info,warn"),
            1 => EnvFilter::new("crawldb=debug,info"),
            2 => EnvFilter::new("crawldb=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_writer(std::io::stderr)
        .init();
}

fn store_path(flag: Option<PathBuf>, config: &Config) -> PathBuf {
    flag.unwrap_or_else(|| PathBuf::from(&config.store.database_path))
}

/// Handles `ingest`: loads one JSONL file into the store
fn handle_ingest(
    input: &Path,
    store: &Path,
    config: &Config,
    task_id: Option<String>,
    skip_backup: bool,
) -> anyhow::Result<()> {
    let options = IngestOptions {
        task_id,
        skip_backup,
    };
    let summary = ingest_file(input, store, config, &options)
        .with_context(|| format!("Failed to ingest {} into {}", input.display(), store.display()))?;

    println!("Task: {}", summary.task_id);
    println!("  Pages written: {}", summary.written);
    println!("  Lines skipped: {}", summary.skipped);
    println!("  Total bytes: {}", summary.total_bytes);
    if let Some(snapshot) = &summary.snapshot {
        println!("  Snapshot: {}", snapshot.display());
    }

    Ok(())
}

/// Handles `db <operation>`
fn handle_db(
    operation: Operation,
    store: &Path,
    config: &Config,
    force: bool,
    markdown: Option<&Path>,
) -> anyhow::Result<()> {
    let lifecycle = Lifecycle::new(store, config);
    let outcome = lifecycle
        .run(operation, force)
        .with_context(|| format!("`{}` failed for {}", operation, store.display()))?;

    match outcome {
        Outcome::Init(InitOutcome::Created) => println!("✓ Created {}", store.display()),
        Outcome::Init(InitOutcome::AlreadyExists) => {
            println!("Store {} already exists; use --force to reinitialize", store.display())
        }
        Outcome::Init(InitOutcome::Reinitialized { snapshot }) => {
            println!("✓ Reinitialized {}", store.display());
            println!("  Previous contents: {}", snapshot.path.display());
        }
        Outcome::Backup(snapshot) => {
            println!("✓ Snapshot written to {}", snapshot.path.display());
            println!("  Pages: {}, tables: {}", snapshot.page_count, snapshot.tables.join(", "));
        }
        Outcome::Optimize(report) => {
            println!("✓ Optimized {}", store.display());
            println!("  Snapshot: {}", report.snapshot.path.display());
            println!(
                "  Size: {} -> {} bytes ({} reclaimed)",
                report.bytes_before,
                report.bytes_after,
                report.reclaimed_bytes()
            );
        }
        Outcome::Migrate(report) => {
            if report.skipped {
                println!(
                    "Store is current ({} normalized, {} legacy page(s)); nothing migrated",
                    report.state.normalized_rows, report.state.legacy_rows
                );
            } else {
                println!("✓ Migrated {}", store.display());
                if let Some(snapshot) = &report.snapshot {
                    println!("  Snapshot: {}", snapshot.path.display());
                }
                if !report.added_columns.is_empty() {
                    println!("  Added columns: {}", report.added_columns.join(", "));
                }
                println!("  Newly migrated pages: {}", report.newly_migrated);
                println!("  Reclassified pages: {}", report.reclassified);
            }
        }
        Outcome::Repair(RepairOutcome::NotNeeded) => {
            println!("Integrity check passed; no repair needed (use --force to rebuild anyway)")
        }
        Outcome::Repair(RepairOutcome::Repaired(report)) => {
            println!("✓ Repaired {}", store.display());
            println!("  Snapshot: {}", report.snapshot.path.display());
            for problem in &report.problems {
                println!("  Fixed: {}", problem);
            }
            for table in &report.tables {
                println!("  {}: {} rows", table.name, table.rows);
            }
        }
        Outcome::Analyze(report) => {
            print_analysis(&report);
            if let Some(path) = markdown {
                write_markdown_report(&report, path)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                println!("\n✓ Report exported to: {}", path.display());
            }
        }
    }

    Ok(())
}

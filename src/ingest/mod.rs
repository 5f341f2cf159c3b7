//! Ingestion pipeline
//!
//! One input file is one batch: every line is parsed, classified, scanned
//! for links and upserted inside a single transaction. Malformed lines are
//! logged and counted; anything else that fails rolls the batch back.

mod classifier;
mod links;
mod record;
mod writer;

pub use classifier::{classify, Classification};
pub use links::{extract_links, links_json};
pub use record::{extract_title, parse_record, PageInput, RecordDefaults, RecordError};
pub use writer::BatchTotals;

use crate::config::{Config, IngestConfig};
use crate::lifecycle::{create_snapshot, StoreLock};
use crate::storage::SqliteStorage;
use crate::{CrawlDbError, Result};
use rusqlite::Connection;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Options for a single ingestion run
#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    /// Task identifier; generated from the input name and time when absent
    pub task_id: Option<String>,
    pub skip_backup: bool,
}

/// Outcome of ingesting one input file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestSummary {
    pub task_id: String,
    pub written: u64,
    pub skipped: u64,
    pub total_bytes: u64,
    /// Snapshot taken before writing, if any
    pub snapshot: Option<PathBuf>,
}

/// Ingests one JSONL file into the store at `store_path`
///
/// Takes the store lock for the whole run. An existing store is
/// snapshotted first unless `skip_backup` is set; a missing store is
/// created with the full schema.
pub fn ingest_file(
    input: &Path,
    store_path: &Path,
    config: &Config,
    options: &IngestOptions,
) -> Result<IngestSummary> {
    let task_id = match &options.task_id {
        Some(id) if id.trim().is_empty() => {
            return Err(CrawlDbError::InvalidInput("task id must not be blank".to_string()))
        }
        Some(id) => id.trim().to_string(),
        None => default_task_id(input),
    };
    let file = File::open(input)?;

    let _lock = StoreLock::acquire(store_path)?;

    let snapshot = if store_path.exists() && !options.skip_backup {
        let existing = SqliteStorage::open_existing(store_path)?;
        let backup_dir = config.store.backup_dir_for(store_path);
        let snapshot = create_snapshot(existing.connection(), store_path, &backup_dir)?;
        existing.close()?;
        Some(snapshot.path)
    } else {
        None
    };

    let mut storage = SqliteStorage::new(store_path)?;
    tracing::info!("Ingesting {} as task {}", input.display(), task_id);

    let totals = ingest_reader(
        storage.connection_mut(),
        BufReader::new(file),
        &task_id,
        &config.ingest,
    )?;
    storage.close()?;

    tracing::info!(
        "Task {}: {} page(s) written, {} line(s) skipped, {} bytes",
        task_id,
        totals.written,
        totals.skipped,
        totals.total_bytes
    );

    Ok(IngestSummary {
        task_id,
        written: totals.written,
        skipped: totals.skipped,
        total_bytes: totals.total_bytes,
        snapshot,
    })
}

/// Streams JSONL records from `reader` into the store as one transaction
///
/// # Arguments
///
/// * `conn` - Connection to a store with the full schema
/// * `reader` - Line-oriented input
/// * `task_id` - Task that owns every page in this batch
/// * `config` - Link cap and record defaults
///
/// # Returns
///
/// * `Ok(BatchTotals)` - The batch committed
/// * `Err(CrawlDbError)` - Nothing was written
pub fn ingest_reader<R: BufRead>(
    conn: &mut Connection,
    mut reader: R,
    task_id: &str,
    config: &IngestConfig,
) -> Result<BatchTotals> {
    let start_time = chrono::Utc::now().timestamp();
    let defaults = RecordDefaults {
        status: config.default_status,
        content_type: config.default_content_type.clone(),
        fetched_at: start_time,
    };

    let tx = conn.transaction()?;
    let mut totals = BatchTotals::default();
    let mut domain: Option<String> = None;
    let mut buf = Vec::new();
    let mut line_no = 0u64;

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        line_no += 1;

        let line = match std::str::from_utf8(&buf) {
            Ok(line) => line.trim(),
            Err(_) => {
                tracing::warn!("Line {}: {}", line_no, RecordError::InvalidUtf8);
                totals = totals.record_skipped();
                continue;
            }
        };
        if line.is_empty() {
            continue;
        }

        let page = match parse_record(line, &defaults) {
            Ok(page) => page,
            Err(e) => {
                tracing::warn!("Line {}: skipping malformed record: {}", line_no, e);
                totals = totals.record_skipped();
                continue;
            }
        };

        if domain.is_none() {
            writer::ensure_task(&tx, task_id, &page.url, start_time)?;
            domain = Some(page.domain.clone());
        }

        let classification = classify(&page.html);
        let links = extract_links(&page.html, config.link_cap);
        writer::upsert_page(&tx, task_id, &page, &classification, &links)?;
        tracing::debug!(
            "Upserted {} (dependent: {}, links: {})",
            page.url,
            classification.is_dependent,
            links.len()
        );

        totals = totals.record_written(page.size);
    }

    match &domain {
        Some(domain) => {
            let end_time = chrono::Utc::now().timestamp();
            writer::upsert_crawl_result(&tx, task_id, domain, &totals, start_time, end_time)?;
        }
        None => tracing::warn!("No valid records for task {}", task_id),
    }

    tx.commit()?;
    Ok(totals)
}

/// Generates `<input stem>-<YYYYmmddHHMMSS>`
pub fn default_task_id(input: &Path) -> String {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "ingest".to_string());
    format!("{}-{}", stem, chrono::Utc::now().format("%Y%m%d%H%M%S"))
}

//! Batch writer
//!
//! All statements run inside the caller's transaction. Pages are keyed by
//! URL, so re-ingesting a file updates rows in place instead of adding
//! duplicates.

use crate::ingest::classifier::Classification;
use crate::ingest::links::links_json;
use crate::ingest::record::PageInput;
use crate::storage::CrawlStatus;
use rusqlite::{params, Transaction};

/// Running totals for one batch
///
/// Each write step consumes the totals and returns the updated value, so
/// the driver threads a single accumulator through the loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchTotals {
    pub written: u64,
    pub skipped: u64,
    pub total_bytes: u64,
}

impl BatchTotals {
    pub fn record_written(self, size: u64) -> Self {
        Self {
            written: self.written + 1,
            total_bytes: self.total_bytes.saturating_add(size),
            ..self
        }
    }

    pub fn record_skipped(self) -> Self {
        Self {
            skipped: self.skipped + 1,
            ..self
        }
    }
}

/// Inserts the task row if it does not exist yet
pub fn ensure_task(tx: &Transaction<'_>, task_id: &str, url: &str, now: i64) -> rusqlite::Result<()> {
    tx.execute(
        "INSERT OR IGNORE INTO tasks (id, url, max_depth, follow_subdomains, created_at, incentive_amount)
         VALUES (?1, ?2, 0, 0, ?3, 0)",
        params![task_id, url, now],
    )?;
    Ok(())
}

/// Inserts or updates one page, keyed by URL
pub fn upsert_page(
    tx: &Transaction<'_>,
    task_id: &str,
    page: &PageInput,
    classification: &Classification,
    links: &[String],
) -> rusqlite::Result<()> {
    tx.execute(
        "INSERT INTO crawled_pages (
             task_id, url, domain, status, content_type, title, size, html, fetched_at,
             is_javascript_dependent, javascript_dependency_reasons, extracted_links
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
         ON CONFLICT(url) DO UPDATE SET
             task_id = excluded.task_id,
             domain = excluded.domain,
             status = excluded.status,
             content_type = excluded.content_type,
             title = excluded.title,
             size = excluded.size,
             html = excluded.html,
             fetched_at = excluded.fetched_at,
             is_javascript_dependent = excluded.is_javascript_dependent,
             javascript_dependency_reasons = excluded.javascript_dependency_reasons,
             extracted_links = excluded.extracted_links",
        params![
            task_id,
            page.url,
            page.domain,
            page.status,
            page.content_type,
            page.title,
            i64::try_from(page.size).unwrap_or(i64::MAX),
            page.html,
            page.fetched_at,
            classification.is_dependent as i64,
            classification.reasons_json(),
            links_json(links),
        ],
    )?;
    Ok(())
}

/// Writes the task's crawl aggregate from the batch totals
///
/// An existing aggregate is overwritten, keeping its settlement fields.
pub fn upsert_crawl_result(
    tx: &Transaction<'_>,
    task_id: &str,
    domain: &str,
    totals: &BatchTotals,
    start_time: i64,
    end_time: i64,
) -> rusqlite::Result<()> {
    tx.execute(
        "INSERT INTO crawl_results (
             task_id, domain, status, pages_count, pages, total_size, start_time, end_time
         ) VALUES (?1, ?2, ?3, ?4, '[]', ?5, ?6, ?7)
         ON CONFLICT(task_id) DO UPDATE SET
             domain = excluded.domain,
             status = excluded.status,
             pages_count = excluded.pages_count,
             pages = '[]',
             total_size = excluded.total_size,
             start_time = excluded.start_time,
             end_time = excluded.end_time",
        params![
            task_id,
            domain,
            CrawlStatus::Completed.to_db_string(),
            i64::try_from(totals.written).unwrap_or(i64::MAX),
            i64::try_from(totals.total_bytes).unwrap_or(i64::MAX),
            start_time,
            end_time,
        ],
    )?;
    Ok(())
}

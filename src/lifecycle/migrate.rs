//! Legacy-to-normalized migration
//!
//! Early stores kept every page of a crawl as a JSON array in
//! `crawl_results.pages` and had no classification columns. Migration
//! upgrades the schema in place, copies legacy pages into `crawled_pages`,
//! and classifies any page that has never been classified.

use crate::config::IngestConfig;
use crate::ingest::{classify, extract_links, links_json};
use crate::lifecycle::backup::Snapshot;
use crate::storage::integrity::{check_foreign_keys, check_structure};
use crate::storage::{create_tables, create_views, quote_ident, LATE_PAGE_COLUMNS, TABLES, VIEWS};
use crate::url::domain_of;
use crate::{CrawlDbError, Result};
use rusqlite::{params, Connection};
use serde::Deserialize;
use std::collections::HashSet;

/// What a store needs before it is current
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationState {
    /// Pages described by the legacy `crawl_results.pages` arrays
    pub legacy_rows: u64,
    /// Rows in `crawled_pages`
    pub normalized_rows: u64,
    pub missing_tables: Vec<String>,
    pub missing_columns: Vec<String>,
    pub missing_views: Vec<String>,
    /// Pages with no stored classification or link set
    pub unclassified_rows: u64,
}

impl MigrationState {
    /// True when no legacy page can still be missing
    pub fn is_current(&self) -> bool {
        self.normalized_rows >= self.legacy_rows
    }

    /// True when `migrate` has nothing to do without `--force`
    pub fn is_up_to_date(&self) -> bool {
        self.is_current()
            && self.missing_tables.is_empty()
            && self.missing_columns.is_empty()
            && self.missing_views.is_empty()
            && self.unclassified_rows == 0
    }
}

/// Outcome of `migrate`
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationReport {
    /// None when the run was skipped
    pub snapshot: Option<Snapshot>,
    pub state: MigrationState,
    pub added_columns: Vec<String>,
    pub newly_migrated: u64,
    pub reclassified: u64,
    pub skipped: bool,
}

impl MigrationReport {
    pub fn skipped(state: MigrationState) -> Self {
        Self {
            snapshot: None,
            state,
            added_columns: Vec::new(),
            newly_migrated: 0,
            reclassified: 0,
            skipped: true,
        }
    }
}

/// One entry of a legacy `pages` array
#[derive(Debug, Deserialize)]
struct LegacyPage {
    url: String,
    size: Option<u64>,
    timestamp: Option<i64>,
    content_type: Option<String>,
    status_code: Option<u16>,
}

fn schema_objects(conn: &Connection, kind: &str) -> rusqlite::Result<HashSet<String>> {
    let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type = ?1")?;
    let names = stmt
        .query_map([kind], |row| row.get(0))?
        .collect::<rusqlite::Result<HashSet<String>>>()?;
    Ok(names)
}

fn table_columns(conn: &Connection, table: &str) -> rusqlite::Result<HashSet<String>> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1)")?;
    let columns = stmt
        .query_map([table], |row| row.get(0))?
        .collect::<rusqlite::Result<HashSet<String>>>()?;
    Ok(columns)
}

/// Inspects the store without modifying it
pub fn inspect(conn: &Connection) -> Result<MigrationState> {
    let tables = schema_objects(conn, "table")?;
    let views = schema_objects(conn, "view")?;

    let missing_tables: Vec<String> = TABLES
        .iter()
        .filter(|t| !tables.contains(**t))
        .map(|t| t.to_string())
        .collect();
    let missing_views: Vec<String> = VIEWS
        .iter()
        .filter(|v| !views.contains(**v))
        .map(|v| v.to_string())
        .collect();

    let has_pages_table = tables.contains("crawled_pages");
    let page_columns = if has_pages_table {
        table_columns(conn, "crawled_pages")?
    } else {
        HashSet::new()
    };
    let missing_columns: Vec<String> = if has_pages_table {
        LATE_PAGE_COLUMNS
            .iter()
            .filter(|(name, _)| !page_columns.contains(*name))
            .map(|(name, _)| name.to_string())
            .collect()
    } else {
        Vec::new()
    };

    let legacy_rows = if tables.contains("crawl_results")
        && table_columns(conn, "crawl_results")?.contains("pages")
    {
        conn.query_row(
            "SELECT COALESCE(SUM(json_array_length(pages)), 0) FROM crawl_results
             WHERE json_valid(pages) AND json_type(pages) = 'array'",
            [],
            |row| row.get::<_, i64>(0),
        )? as u64
    } else {
        0
    };

    let normalized_rows = if has_pages_table {
        conn.query_row("SELECT COUNT(*) FROM crawled_pages", [], |row| row.get::<_, i64>(0))?
            as u64
    } else {
        0
    };

    let unclassified_rows = if !has_pages_table {
        0
    } else if !missing_columns.is_empty() {
        normalized_rows
    } else {
        conn.query_row(
            "SELECT COUNT(*) FROM crawled_pages
             WHERE is_javascript_dependent IS NULL
                OR javascript_dependency_reasons IS NULL
                OR extracted_links IS NULL",
            [],
            |row| row.get::<_, i64>(0),
        )? as u64
    };

    Ok(MigrationState {
        legacy_rows,
        normalized_rows,
        missing_tables,
        missing_columns,
        missing_views,
        unclassified_rows,
    })
}

/// Runs the migration as one transaction
///
/// The caller supplies the snapshot taken just before. Foreign-key
/// enforcement is deferred to the end of the transaction; any violation
/// that did not exist before the migration rolls everything back.
///
/// # Arguments
///
/// * `conn` - Writable connection to the store
/// * `snapshot` - Verified snapshot of the store
/// * `state` - Result of [`inspect`] on the same store
/// * `force` - Re-import legacy pages even when the store looks current
/// * `config` - Link cap and record defaults for imported pages
pub fn migrate(
    conn: &mut Connection,
    snapshot: Snapshot,
    state: MigrationState,
    force: bool,
    config: &IngestConfig,
) -> Result<MigrationReport> {
    check_structure(conn)?.require_ok()?;

    let violations_before: HashSet<String> = check_foreign_keys(conn)?
        .violations
        .iter()
        .map(ToString::to_string)
        .collect();

    let tx = conn.transaction()?;
    tx.execute_batch("PRAGMA defer_foreign_keys = ON;")?;

    create_tables(&tx)?;
    let present = table_columns(&tx, "crawled_pages")?;
    let mut added_columns = Vec::new();
    for (name, sql_type) in LATE_PAGE_COLUMNS {
        if !present.contains(name) {
            tx.execute_batch(&format!(
                "ALTER TABLE crawled_pages ADD COLUMN {} {};",
                quote_ident(name),
                sql_type
            ))?;
            tracing::info!("Added column crawled_pages.{}", name);
            added_columns.push(name.to_string());
        }
    }
    create_views(&tx)?;

    let newly_migrated = if force || !state.is_current() {
        import_legacy_pages(&tx, config)?
    } else {
        0
    };
    let reclassified = reclassify_pages(&tx, config.link_cap)?;

    let new_violations: Vec<String> = check_foreign_keys(&tx)?
        .violations
        .iter()
        .map(ToString::to_string)
        .filter(|v| !violations_before.contains(v))
        .collect();
    if !new_violations.is_empty() {
        tracing::error!(
            "Migration introduced {} foreign key violation(s); rolling back",
            new_violations.len()
        );
        tx.rollback()?;
        return Err(CrawlDbError::ForeignKeyViolation {
            violations: new_violations,
        });
    }

    tx.commit()?;
    tracing::info!(
        "Migration complete: {} page(s) imported, {} reclassified",
        newly_migrated,
        reclassified
    );

    Ok(MigrationReport {
        snapshot: Some(snapshot),
        state,
        added_columns,
        newly_migrated,
        reclassified,
        skipped: false,
    })
}

/// Copies legacy pages into `crawled_pages`, skipping URLs already present
fn import_legacy_pages(conn: &Connection, config: &IngestConfig) -> Result<u64> {
    let mut stmt = conn.prepare(
        "SELECT task_id, domain, pages, start_time FROM crawl_results
         WHERE json_valid(pages) AND json_type(pages) = 'array'
         ORDER BY task_id",
    )?;
    let crawls = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut inserted = 0u64;
    for (task_id, crawl_domain, pages, start_time) in crawls {
        let entries: Vec<serde_json::Value> = serde_json::from_str(&pages)?;
        for entry in entries {
            let page: LegacyPage = match serde_json::from_value(entry) {
                Ok(page) => page,
                Err(e) => {
                    tracing::warn!("Task {}: skipping unreadable legacy page: {}", task_id, e);
                    continue;
                }
            };

            let domain = domain_of(&page.url).unwrap_or_else(|_| crawl_domain.clone());
            let changed = conn.execute(
                "INSERT INTO crawled_pages (
                     task_id, url, domain, status, content_type, title, size, html, fetched_at,
                     is_javascript_dependent, javascript_dependency_reasons, extracted_links
                 ) VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6, NULL, ?7, 0, '[]', '[]')
                 ON CONFLICT(url) DO NOTHING",
                params![
                    task_id,
                    page.url,
                    domain,
                    page.status_code.unwrap_or(config.default_status),
                    page.content_type
                        .unwrap_or_else(|| config.default_content_type.clone()),
                    i64::try_from(page.size.unwrap_or(0)).unwrap_or(i64::MAX),
                    page.timestamp.unwrap_or(start_time),
                ],
            )?;
            if changed > 0 {
                tracing::debug!("Imported legacy page {}", page.url);
            }
            inserted += changed as u64;
        }
    }

    Ok(inserted)
}

/// Classifies every page whose classification columns are still NULL
fn reclassify_pages(conn: &Connection, link_cap: usize) -> Result<u64> {
    let mut stmt = conn.prepare(
        "SELECT id, html FROM crawled_pages
         WHERE is_javascript_dependent IS NULL
            OR javascript_dependency_reasons IS NULL
            OR extracted_links IS NULL
         ORDER BY id",
    )?;
    let pending = stmt
        .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Option<String>>(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    for (id, html) in &pending {
        let html = html.as_deref().unwrap_or("");
        let classification = classify(html);
        let links = extract_links(html, link_cap);
        conn.execute(
            "UPDATE crawled_pages
             SET is_javascript_dependent = ?1,
                 javascript_dependency_reasons = ?2,
                 extracted_links = ?3
             WHERE id = ?4",
            params![
                classification.is_dependent as i64,
                classification.reasons_json(),
                links_json(&links),
                id
            ],
        )?;
    }

    Ok(pending.len() as u64)
}

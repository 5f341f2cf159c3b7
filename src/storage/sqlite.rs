//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{
    quote_ident, CrawlResultRecord, CrawlStatus, DomainJsStat, DomainSizeStat, PageRecord,
    TaskRecord, TopPage,
};
use crate::CrawlDbError;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use std::path::Path;

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Opens or creates a store and ensures the schema exists
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(CrawlDbError)` - Failed to open database
    pub fn new(path: &Path) -> Result<Self, CrawlDbError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        configure(&conn)?;
        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Opens an existing store without touching its schema
    ///
    /// Lifecycle operations use this so that a legacy or damaged store is
    /// seen exactly as it is on disk.
    pub fn open_existing(path: &Path) -> Result<Self, CrawlDbError> {
        if !path.exists() {
            return Err(CrawlDbError::StoreMissing(path.to_path_buf()));
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        configure(&conn)?;

        Ok(Self { conn })
    }

    /// Opens an existing store read-only
    pub fn open_read_only(path: &Path) -> Result<Self, CrawlDbError> {
        if !path.exists() {
            return Err(CrawlDbError::StoreMissing(path.to_path_buf()));
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.execute_batch("PRAGMA query_only = ON;")?;

        Ok(Self { conn })
    }

    /// Creates an in-memory store with the full schema
    pub fn new_in_memory() -> Result<Self, CrawlDbError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Borrows the underlying connection
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Mutably borrows the underlying connection (needed for transactions)
    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Closes the connection, surfacing any error from the final flush
    pub fn close(self) -> Result<(), CrawlDbError> {
        self.conn.close().map_err(|(_, e)| CrawlDbError::Database(e))
    }
}

/// Applies the connection settings shared by every writable handle
///
/// The store stays in rollback-journal mode so the database is always a
/// single self-contained file; backup and repair copy and replace it.
fn configure(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = DELETE;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA temp_store = MEMORY;
    ",
    )
}

/// Parses a JSON array-of-strings column, treating NULL as empty
fn json_list(row: &Row<'_>, idx: usize) -> rusqlite::Result<Vec<String>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        None => Ok(Vec::new()),
        Some(text) => serde_json::from_str(&text).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        }),
    }
}

const PAGE_COLUMNS: &str = "id, task_id, url, domain, status, content_type, title, size, html,
     fetched_at, is_javascript_dependent, javascript_dependency_reasons, extracted_links";

fn page_from_row(row: &Row<'_>) -> rusqlite::Result<PageRecord> {
    Ok(PageRecord {
        id: row.get(0)?,
        task_id: row.get(1)?,
        url: row.get(2)?,
        domain: row.get(3)?,
        status: row.get(4)?,
        content_type: row.get(5)?,
        title: row.get(6)?,
        size: row.get::<_, i64>(7)? as u64,
        html: row.get(8)?,
        fetched_at: row.get(9)?,
        is_javascript_dependent: row.get::<_, Option<i64>>(10)?.map(|v| v != 0),
        javascript_dependency_reasons: json_list(row, 11)?,
        extracted_links: json_list(row, 12)?,
    })
}

impl Storage for SqliteStorage {
    // ===== Lookups =====

    fn get_task(&self, task_id: &str) -> StorageResult<Option<TaskRecord>> {
        let task = self
            .conn
            .query_row(
                "SELECT id, url, max_depth, follow_subdomains, max_links, created_at,
                 assigned_at, incentive_amount FROM tasks WHERE id = ?1",
                params![task_id],
                |row| {
                    Ok(TaskRecord {
                        id: row.get(0)?,
                        url: row.get(1)?,
                        max_depth: row.get(2)?,
                        follow_subdomains: row.get::<_, i64>(3)? != 0,
                        max_links: row.get(4)?,
                        created_at: row.get(5)?,
                        assigned_at: row.get(6)?,
                        incentive_amount: row.get(7)?,
                    })
                },
            )
            .optional()?;

        Ok(task)
    }

    fn get_crawl_result(&self, task_id: &str) -> StorageResult<Option<CrawlResultRecord>> {
        let row = self
            .conn
            .query_row(
                "SELECT task_id, domain, status, pages_count, total_size, start_time, end_time,
                 transaction_hash, incentives_received FROM crawl_results WHERE task_id = ?1",
                params![task_id],
                |row| {
                    Ok((
                        row.get::<_, String>(2)?,
                        CrawlResultRecord {
                            task_id: row.get(0)?,
                            domain: row.get(1)?,
                            status: CrawlStatus::InProgress,
                            pages_count: row.get::<_, i64>(3)? as u64,
                            total_size: row.get::<_, i64>(4)? as u64,
                            start_time: row.get(5)?,
                            end_time: row.get(6)?,
                            transaction_hash: row.get(7)?,
                            incentives_received: row.get(8)?,
                        },
                    ))
                },
            )
            .optional()?;

        match row {
            None => Ok(None),
            Some((status, mut record)) => {
                record.status = CrawlStatus::from_db_string(&status).ok_or_else(|| {
                    StorageError::InvalidColumn {
                        column: "crawl_results.status".to_string(),
                        message: format!("unknown crawl status '{}'", status),
                    }
                })?;
                Ok(Some(record))
            }
        }
    }

    fn get_page_by_url(&self, url: &str) -> StorageResult<Option<PageRecord>> {
        let page = self
            .conn
            .query_row(
                &format!("SELECT {} FROM crawled_pages WHERE url = ?1", PAGE_COLUMNS),
                params![url],
                page_from_row,
            )
            .optional()?;

        Ok(page)
    }

    // ===== Structure =====

    fn list_user_tables(&self) -> StorageResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
             ORDER BY name",
        )?;

        let tables = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;

        Ok(tables)
    }

    fn count_rows(&self, table: &str) -> StorageResult<u64> {
        if !self.list_user_tables()?.iter().any(|t| t == table) {
            return Err(StorageError::UnknownTable(table.to_string()));
        }

        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_ident(table)),
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    // ===== Statistics =====

    fn domain_js_stats(&self) -> StorageResult<Vec<DomainJsStat>> {
        let mut stmt = self.conn.prepare(
            "SELECT domain, total_pages, js_dependent_pages, js_percentage, reasons
             FROM domain_js_stats
             ORDER BY js_percentage DESC, domain ASC",
        )?;

        let stats = stmt
            .query_map([], |row| {
                Ok(DomainJsStat {
                    domain: row.get(0)?,
                    total_pages: row.get::<_, i64>(1)? as u64,
                    js_dependent_pages: row.get::<_, i64>(2)? as u64,
                    js_percentage: row.get(3)?,
                    reasons: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(stats)
    }

    fn top_pages_by_links(&self, limit: usize) -> StorageResult<Vec<TopPage>> {
        let mut stmt = self.conn.prepare(
            "SELECT url, domain, link_count, COALESCE(is_javascript_dependent, 0)
             FROM page_overview
             ORDER BY link_count DESC, url ASC
             LIMIT ?1",
        )?;

        let pages = stmt
            .query_map(params![limit as i64], |row| {
                Ok(TopPage {
                    url: row.get(0)?,
                    domain: row.get(1)?,
                    link_count: row.get::<_, i64>(2)? as u64,
                    is_javascript_dependent: row.get::<_, i64>(3)? != 0,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(pages)
    }

    fn domain_size_stats(&self) -> StorageResult<Vec<DomainSizeStat>> {
        let mut stmt = self.conn.prepare(
            "SELECT domain, COUNT(*), TOTAL(size), COALESCE(AVG(size), 0.0)
             FROM crawled_pages
             GROUP BY domain
             ORDER BY TOTAL(size) DESC, domain ASC",
        )?;

        let stats = stmt
            .query_map([], |row| {
                Ok(DomainSizeStat {
                    domain: row.get(0)?,
                    pages: row.get::<_, i64>(1)? as u64,
                    // TOTAL() is a float sum, so huge sizes cannot overflow
                    total_size: row.get::<_, f64>(2)? as u64,
                    average_size: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(stats)
    }
}

//! Storage traits and error types
//!
//! This module defines the read-side trait interface used by reporting and
//! tests, and the storage error type.

use crate::storage::{
    CrawlResultRecord, DomainJsStat, DomainSizeStat, PageRecord, TaskRecord, TopPage,
};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Invalid value in column {column}: {message}")]
    InvalidColumn { column: String, message: String },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for read access to a crawl store
///
/// Writes go through the ingestion batch writer and the lifecycle manager,
/// both of which need explicit transaction control; this trait covers
/// everything else.
pub trait Storage {
    // ===== Lookups =====

    /// Gets a task by ID
    fn get_task(&self, task_id: &str) -> StorageResult<Option<TaskRecord>>;

    /// Gets the crawl result aggregate for a task
    fn get_crawl_result(&self, task_id: &str) -> StorageResult<Option<CrawlResultRecord>>;

    /// Gets a crawled page by URL
    fn get_page_by_url(&self, url: &str) -> StorageResult<Option<PageRecord>>;

    // ===== Structure =====

    /// Lists user tables (excluding SQLite internals), ordered by name
    fn list_user_tables(&self) -> StorageResult<Vec<String>>;

    /// Counts rows in a user table
    ///
    /// Returns `StorageError::UnknownTable` if the table does not exist.
    fn count_rows(&self, table: &str) -> StorageResult<u64>;

    // ===== Statistics =====

    /// Per-domain JavaScript dependency statistics, highest percentage first
    fn domain_js_stats(&self) -> StorageResult<Vec<DomainJsStat>>;

    /// Pages ranked by stored link count, most links first
    ///
    /// # Arguments
    ///
    /// * `limit` - Maximum number of pages returned
    fn top_pages_by_links(&self, limit: usize) -> StorageResult<Vec<TopPage>>;

    /// Per-domain page counts and size aggregates, largest first
    fn domain_size_stats(&self) -> StorageResult<Vec<DomainSizeStat>>;
}

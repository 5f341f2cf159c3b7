//! Storage module for the crawl store
//!
//! This module handles all database access for the crawl store, including:
//! - SQLite schema and view management
//! - Record types for tasks, crawl results, and crawled pages
//! - Read-side statistics used by `analyze`
//! - Structural and referential integrity checks

pub mod integrity;
mod schema;
mod sqlite;
mod traits;

pub use schema::{
    create_tables, create_views, initialize_schema, LATE_PAGE_COLUMNS, TABLES,
    VIEWS,
};
pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageError, StorageResult};

/// Quotes an SQL identifier (table or column name) for interpolation
///
/// Identifiers cannot be bound as parameters; every table or column name
/// that reaches a statement as text passes through here.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Represents a crawl task
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRecord {
    pub id: String,
    pub url: String,
    pub max_depth: u32,
    pub follow_subdomains: bool,
    pub max_links: Option<i64>,
    pub created_at: i64,
    pub assigned_at: Option<i64>,
    pub incentive_amount: i64,
}

/// Represents the per-task crawl aggregate
#[derive(Debug, Clone, PartialEq)]
pub struct CrawlResultRecord {
    pub task_id: String,
    pub domain: String,
    pub status: CrawlStatus,
    pub pages_count: u64,
    pub total_size: u64,
    pub start_time: i64,
    pub end_time: Option<i64>,
    pub transaction_hash: Option<String>,
    pub incentives_received: Option<i64>,
}

/// Represents a crawled page in the database
#[derive(Debug, Clone, PartialEq)]
pub struct PageRecord {
    pub id: i64,
    pub task_id: String,
    pub url: String,
    pub domain: String,
    pub status: u16,
    pub content_type: String,
    pub title: Option<String>,
    pub size: u64,
    pub html: Option<String>,
    pub fetched_at: i64,
    /// None until the page has been classified
    pub is_javascript_dependent: Option<bool>,
    pub javascript_dependency_reasons: Vec<String>,
    pub extracted_links: Vec<String>,
}

/// Per-domain JavaScript dependency row from the `domain_js_stats` view
#[derive(Debug, Clone, PartialEq)]
pub struct DomainJsStat {
    pub domain: String,
    pub total_pages: u64,
    pub js_dependent_pages: u64,
    pub js_percentage: f64,
    /// Distinct reasons across the domain's pages, `; `-separated
    pub reasons: Option<String>,
}

/// A page ranked by its stored link count
#[derive(Debug, Clone, PartialEq)]
pub struct TopPage {
    pub url: String,
    pub domain: String,
    pub link_count: u64,
    pub is_javascript_dependent: bool,
}

/// Per-domain size aggregate
#[derive(Debug, Clone, PartialEq)]
pub struct DomainSizeStat {
    pub domain: String,
    pub pages: u64,
    pub total_size: u64,
    pub average_size: f64,
}

/// Status of a crawl result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlStatus {
    InProgress,
    Completed,
    Failed,
    Verified,
    Rejected,
}

impl CrawlStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::InProgress => "InProgress",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
            Self::Verified => "Verified",
            Self::Rejected => "Rejected",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "InProgress" => Some(Self::InProgress),
            "Completed" => Some(Self::Completed),
            "Failed" => Some(Self::Failed),
            "Verified" => Some(Self::Verified),
            "Rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

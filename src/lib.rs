//! crawldb: crawl-result ingestion and store lifecycle management
//!
//! This crate ingests crawled pages from JSONL files into a SQLite store,
//! classifies each page for JavaScript dependency, extracts outbound links,
//! and manages the store's lifecycle (init, backup, optimize, migrate,
//! repair, analyze).

pub mod config;
pub mod ingest;
pub mod lifecycle;
pub mod output;
pub mod storage;
pub mod url;

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for crawldb operations
#[derive(Debug, Error)]
pub enum CrawlDbError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("URL error: {0}")]
    Url(#[from] UrlError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store does not exist: {}", .0.display())]
    StoreMissing(PathBuf),

    #[error("Store is busy (lock held at {}); wait for the other operation or remove a stale lock", .0.display())]
    StoreBusy(PathBuf),

    #[error("Backup failed for snapshot {}: {reason}", snapshot.display())]
    BackupFailed { snapshot: PathBuf, reason: String },

    #[error("Integrity check failed ({}); run `repair`", details.join("; "))]
    IntegrityFailure { details: Vec<String> },

    #[error("Foreign key check failed with {} violation(s): {}", violations.len(), violations.join("; "))]
    ForeignKeyViolation { violations: Vec<String> },

    #[error("Repair aborted during {phase} of table `{table}`: {reason}; original store left untouched")]
    RepairAborted {
        phase: &'static str,
        table: String,
        reason: String,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Missing host in URL: {0}")]
    MissingHost(String),
}

/// Result type alias for crawldb operations
pub type Result<T> = std::result::Result<T, CrawlDbError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use ingest::{classify, extract_links, ingest_file, Classification, IngestSummary};
pub use lifecycle::{Lifecycle, Operation};
pub use storage::{SqliteStorage, Storage};
pub use url::domain_of;

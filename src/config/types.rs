use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default cap on extracted links per page
pub const DEFAULT_LINK_CAP: usize = 1000;

/// Default HTTP status for records that omit one
pub const DEFAULT_STATUS: u16 = 200;

/// Default content type for records that omit one
pub const DEFAULT_CONTENT_TYPE: &str = "text/html; charset=utf-8";

/// Main configuration structure for crawldb
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub ingest: IngestConfig,
    pub analyze: AnalyzeConfig,
}

/// Store location configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,

    /// Directory for snapshots; the store's own directory when unset
    #[serde(rename = "backup-dir")]
    pub backup_dir: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: "data/crawl.db".to_string(),
            backup_dir: None,
        }
    }
}

impl StoreConfig {
    /// Resolves the snapshot directory for a given store path
    pub fn backup_dir_for(&self, store_path: &Path) -> PathBuf {
        match &self.backup_dir {
            Some(dir) => PathBuf::from(dir),
            None => store_path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
        }
    }
}

/// Ingestion behavior configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Maximum number of links stored per page
    #[serde(rename = "link-cap")]
    pub link_cap: usize,

    /// Status used when a record has neither `status` nor `status_code`
    #[serde(rename = "default-status")]
    pub default_status: u16,

    /// Content type used when a record has no `content_type`
    #[serde(rename = "default-content-type")]
    pub default_content_type: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            link_cap: DEFAULT_LINK_CAP,
            default_status: DEFAULT_STATUS,
            default_content_type: DEFAULT_CONTENT_TYPE.to_string(),
        }
    }
}

/// Analysis report configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalyzeConfig {
    /// Number of pages listed in the top-pages-by-links table
    #[serde(rename = "top-pages")]
    pub top_pages: usize,
}

impl Default for AnalyzeConfig {
    fn default() -> Self {
        Self { top_pages: 10 }
    }
}

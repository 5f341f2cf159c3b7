//! Verified store snapshots
//!
//! Every destructive lifecycle operation starts here. A snapshot is copied
//! with SQLite's online backup API, reopened, and compared against the
//! source before the caller is allowed to continue.

use crate::{CrawlDbError, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, DatabaseName, OpenFlags};
use std::path::{Path, PathBuf};

/// A verified, read-only copy of the store
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
    /// `PRAGMA page_count` shared by source and snapshot
    pub page_count: u64,
    pub tables: Vec<String>,
}

/// Picks an unused `<dir>/<stem>.backup.<timestamp>.db` path
fn snapshot_path(store_path: &Path, backup_dir: &Path, at: DateTime<Utc>) -> PathBuf {
    let stem = store_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "store".to_string());
    let stamp = at.format("%Y%m%d_%H%M%S_%3f");

    let mut candidate = backup_dir.join(format!("{}.backup.{}.db", stem, stamp));
    let mut n = 1;
    while candidate.exists() {
        candidate = backup_dir.join(format!("{}.backup.{}-{}.db", stem, stamp, n));
        n += 1;
    }
    candidate
}

fn page_count(conn: &Connection) -> rusqlite::Result<u64> {
    conn.query_row("PRAGMA page_count", [], |row| row.get::<_, i64>(0))
        .map(|n| n as u64)
}

fn user_tables(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master
         WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
         ORDER BY name",
    )?;
    let tables = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(tables)
}

/// Copies the store behind `conn` into `backup_dir` and verifies the copy
///
/// Verification compares page count and user-table list; it does not run
/// the integrity check, so a damaged store can still be snapshotted ahead
/// of `repair`. A snapshot that fails verification is deleted.
///
/// # Arguments
///
/// * `conn` - Open connection to the store
/// * `store_path` - Path of the store, used to name the snapshot
/// * `backup_dir` - Directory receiving the snapshot
///
/// # Returns
///
/// * `Ok(Snapshot)` - The verified snapshot, now read-only on disk
/// * `Err(CrawlDbError::BackupFailed)` - No usable snapshot exists
pub fn create_snapshot(conn: &Connection, store_path: &Path, backup_dir: &Path) -> Result<Snapshot> {
    let created_at = Utc::now();
    std::fs::create_dir_all(backup_dir).map_err(|e| CrawlDbError::BackupFailed {
        snapshot: backup_dir.to_path_buf(),
        reason: format!("cannot create backup directory: {}", e),
    })?;
    let path = snapshot_path(store_path, backup_dir, created_at);

    tracing::info!("Snapshotting {} to {}", store_path.display(), path.display());

    match copy_and_verify(conn, &path) {
        Ok((page_count, tables)) => {
            mark_read_only(&path)?;
            tracing::info!("Snapshot verified ({} pages, {} tables)", page_count, tables.len());
            Ok(Snapshot {
                path,
                created_at,
                page_count,
                tables,
            })
        }
        Err(reason) => {
            tracing::error!("Snapshot {} failed: {}", path.display(), reason);
            if path.exists() {
                if let Err(e) = std::fs::remove_file(&path) {
                    tracing::warn!("Could not remove failed snapshot {}: {}", path.display(), e);
                }
            }
            Err(CrawlDbError::BackupFailed {
                snapshot: path,
                reason,
            })
        }
    }
}

fn copy_and_verify(conn: &Connection, path: &Path) -> std::result::Result<(u64, Vec<String>), String> {
    conn.backup(DatabaseName::Main, path, None)
        .map_err(|e| format!("copy failed: {}", e))?;

    let source_pages = page_count(conn).map_err(|e| format!("cannot read source: {}", e))?;
    let source_tables = user_tables(conn).map_err(|e| format!("cannot read source: {}", e))?;

    let copy = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .map_err(|e| format!("cannot reopen snapshot: {}", e))?;
    let copy_pages = page_count(&copy).map_err(|e| format!("cannot read snapshot: {}", e))?;
    let copy_tables = user_tables(&copy).map_err(|e| format!("cannot read snapshot: {}", e))?;

    if copy_pages != source_pages {
        return Err(format!(
            "page count mismatch: source {}, snapshot {}",
            source_pages, copy_pages
        ));
    }
    if copy_tables != source_tables {
        return Err(format!(
            "table list mismatch: source {:?}, snapshot {:?}",
            source_tables, copy_tables
        ));
    }

    Ok((copy_pages, copy_tables))
}

fn mark_read_only(path: &Path) -> Result<()> {
    let mut permissions = std::fs::metadata(path)?.permissions();
    permissions.set_readonly(true);
    std::fs::set_permissions(path, permissions)?;
    Ok(())
}

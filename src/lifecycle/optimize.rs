use crate::lifecycle::backup::Snapshot;
use crate::storage::integrity::check_structure;
use crate::Result;
use rusqlite::Connection;

/// Outcome of `optimize`
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizeReport {
    pub snapshot: Snapshot,
    pub bytes_before: u64,
    pub bytes_after: u64,
}

impl OptimizeReport {
    pub fn reclaimed_bytes(&self) -> u64 {
        self.bytes_before.saturating_sub(self.bytes_after)
    }
}

/// Logical database size in bytes (page count times page size)
pub fn database_bytes(conn: &Connection) -> rusqlite::Result<u64> {
    let pages: i64 = conn.query_row("PRAGMA page_count", [], |row| row.get(0))?;
    let page_size: i64 = conn.query_row("PRAGMA page_size", [], |row| row.get(0))?;
    Ok((pages * page_size) as u64)
}

/// Compacts the store and refreshes planner statistics
///
/// The caller supplies the snapshot taken just before; a store that fails
/// the structural check is left untouched.
pub fn optimize(conn: &Connection, snapshot: Snapshot) -> Result<OptimizeReport> {
    check_structure(conn)?.require_ok()?;

    let bytes_before = database_bytes(conn)?;
    conn.execute_batch("VACUUM;")?;
    conn.execute_batch("ANALYZE;")?;
    let bytes_after = database_bytes(conn)?;

    tracing::info!(
        "Optimized store: {} -> {} bytes ({} reclaimed)",
        bytes_before,
        bytes_after,
        bytes_before.saturating_sub(bytes_after)
    );

    Ok(OptimizeReport {
        snapshot,
        bytes_before,
        bytes_after,
    })
}

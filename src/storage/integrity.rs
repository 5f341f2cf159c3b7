//! Structural and referential consistency checks
//!
//! Both checks are read-only and independent of each other. A structural
//! failure is a reason to run `repair`; foreign-key violations are only
//! reported, never fixed.

use crate::storage::quote_ident;
use crate::{CrawlDbError, Result};
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Result of `PRAGMA integrity_check`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuralReport {
    pub ok: bool,
    /// `["ok"]` on success, otherwise one entry per problem found
    pub messages: Vec<String>,
}

impl StructuralReport {
    /// Converts a failed report into `CrawlDbError::IntegrityFailure`
    pub fn require_ok(self) -> Result<()> {
        if self.ok {
            Ok(())
        } else {
            Err(CrawlDbError::IntegrityFailure {
                details: self.messages,
            })
        }
    }
}

/// One row of `PRAGMA foreign_key_check`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyViolation {
    pub table: String,
    pub rowid: Option<i64>,
    pub parent: String,
    pub fk_index: i64,
}

impl fmt::Display for ForeignKeyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.rowid {
            Some(rowid) => write!(
                f,
                "{} rowid {} references missing {} (fk #{})",
                self.table, rowid, self.parent, self.fk_index
            ),
            None => write!(
                f,
                "{} (without rowid) references missing {} (fk #{})",
                self.table, self.parent, self.fk_index
            ),
        }
    }
}

/// Result of `PRAGMA foreign_key_check`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ForeignKeyReport {
    pub violations: Vec<ForeignKeyViolation>,
}

impl ForeignKeyReport {
    pub fn ok(&self) -> bool {
        self.violations.is_empty()
    }

    /// Converts a report with violations into `CrawlDbError::ForeignKeyViolation`
    pub fn require_ok(self) -> Result<()> {
        if self.ok() {
            Ok(())
        } else {
            Err(CrawlDbError::ForeignKeyViolation {
                violations: self.violations.iter().map(ToString::to_string).collect(),
            })
        }
    }
}

/// Row count and content hash for one table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableFingerprint {
    pub rows: u64,
    /// Hex SHA-256 over every row in rowid order
    pub sha256: String,
}

/// Runs the structural consistency scan
pub fn check_structure(conn: &Connection) -> Result<StructuralReport> {
    let mut stmt = conn.prepare("PRAGMA integrity_check")?;
    let messages = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let ok = messages.len() == 1 && messages[0] == "ok";
    if !ok {
        tracing::warn!("Integrity check reported {} problem(s)", messages.len());
    }

    Ok(StructuralReport { ok, messages })
}

/// Runs the referential (foreign-key) consistency scan
pub fn check_foreign_keys(conn: &Connection) -> Result<ForeignKeyReport> {
    let mut stmt = conn.prepare("PRAGMA foreign_key_check")?;
    let violations = stmt
        .query_map([], |row| {
            Ok(ForeignKeyViolation {
                table: row.get(0)?,
                rowid: row.get(1)?,
                parent: row.get(2)?,
                fk_index: row.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    if !violations.is_empty() {
        tracing::warn!("Foreign key check found {} violation(s)", violations.len());
    }

    Ok(ForeignKeyReport { violations })
}

/// Computes a fingerprint for every user table
///
/// Used to prove that read-only operations left the store untouched and
/// that a rebuilt store carries the same rows as the original.
pub fn table_fingerprints(conn: &Connection) -> Result<BTreeMap<String, TableFingerprint>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master
         WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
         ORDER BY name",
    )?;
    let tables = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut fingerprints = BTreeMap::new();
    for table in tables {
        let fingerprint = fingerprint_table(conn, &table)?;
        fingerprints.insert(table, fingerprint);
    }

    Ok(fingerprints)
}

fn fingerprint_table(conn: &Connection, table: &str) -> Result<TableFingerprint> {
    let mut stmt = conn.prepare(&format!(
        "SELECT * FROM {} ORDER BY rowid",
        quote_ident(table)
    ))?;
    let columns = stmt.column_count();
    let mut rows = stmt.query([])?;

    let mut hasher = Sha256::new();
    let mut count = 0u64;
    while let Some(row) = rows.next()? {
        for idx in 0..columns {
            match row.get_ref(idx)? {
                ValueRef::Null => hasher.update([0u8]),
                ValueRef::Integer(v) => {
                    hasher.update([1u8]);
                    hasher.update(v.to_le_bytes());
                }
                ValueRef::Real(v) => {
                    hasher.update([2u8]);
                    hasher.update(v.to_le_bytes());
                }
                ValueRef::Text(bytes) => {
                    hasher.update([3u8]);
                    hasher.update((bytes.len() as u64).to_le_bytes());
                    hasher.update(bytes);
                }
                ValueRef::Blob(bytes) => {
                    hasher.update([4u8]);
                    hasher.update((bytes.len() as u64).to_le_bytes());
                    hasher.update(bytes);
                }
            }
        }
        count += 1;
    }

    Ok(TableFingerprint {
        rows: count,
        sha256: hex::encode(hasher.finalize()),
    })
}

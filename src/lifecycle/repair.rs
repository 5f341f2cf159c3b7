//! Two-phase store repair
//!
//! Phase 1 exports every user table (schema and rows) to a JSONL staging
//! directory. Phase 2 builds a fresh store in a side file from that export
//! and verifies it. Only a fully verified rebuild is renamed over the
//! original; any failure before that leaves the original untouched.

use crate::lifecycle::backup::Snapshot;
use crate::lifecycle::sibling_path;
use crate::storage::integrity::check_structure;
use crate::storage::{create_tables, create_views, quote_ident, SqliteStorage, TABLES};
use crate::{CrawlDbError, Result};
use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params_from_iter, Connection};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Result of a `repair` request
#[derive(Debug, Clone, PartialEq)]
pub enum RepairOutcome {
    /// The structural check passed and the run was not forced
    NotNeeded,
    Repaired(RepairReport),
}

/// Details of a completed rebuild
#[derive(Debug, Clone, PartialEq)]
pub struct RepairReport {
    pub snapshot: Snapshot,
    /// Problems reported by the structural check before the rebuild
    pub problems: Vec<String>,
    pub tables: Vec<RepairedTable>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairedTable {
    pub name: String,
    pub rows: u64,
}

/// One exported cell
///
/// TEXT is exported as raw bytes since SQLite does not enforce UTF-8, and
/// REAL as its bit pattern since JSON has no infinities or NaN.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Cell {
    Null,
    Integer(i64),
    /// `f64::to_bits`
    Real(u64),
    /// Hex-encoded bytes
    Text(String),
    /// Hex-encoded bytes
    Blob(String),
}

impl Cell {
    fn from_ref(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Cell::Null,
            ValueRef::Integer(v) => Cell::Integer(v),
            ValueRef::Real(v) => Cell::Real(v.to_bits()),
            ValueRef::Text(bytes) => Cell::Text(hex::encode(bytes)),
            ValueRef::Blob(bytes) => Cell::Blob(hex::encode(bytes)),
        }
    }

    fn decode(self) -> std::result::Result<Restored, hex::FromHexError> {
        Ok(match self {
            Cell::Null => Restored::Null,
            Cell::Integer(v) => Restored::Integer(v),
            Cell::Real(bits) => Restored::Real(f64::from_bits(bits)),
            Cell::Text(v) => Restored::Text(hex::decode(v)?),
            Cell::Blob(v) => Restored::Blob(hex::decode(v)?),
        })
    }
}

/// A decoded cell, bound with its original storage class
#[derive(Debug, Clone, PartialEq)]
enum Restored {
    Null,
    Integer(i64),
    Real(f64),
    Text(Vec<u8>),
    Blob(Vec<u8>),
}

impl ToSql for Restored {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::Borrowed(match self {
            Restored::Null => ValueRef::Null,
            Restored::Integer(v) => ValueRef::Integer(*v),
            Restored::Real(v) => ValueRef::Real(*v),
            Restored::Text(bytes) => ValueRef::Text(bytes),
            Restored::Blob(bytes) => ValueRef::Blob(bytes),
        }))
    }
}

/// First line of every staging file
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TableHeader {
    name: String,
    sql: String,
    columns: Vec<String>,
}

/// A table written to staging
#[derive(Debug, Clone)]
struct ExportedTable {
    header: TableHeader,
    rows: u64,
    file: PathBuf,
}

/// An index, view, or trigger to replay after reimport
#[derive(Debug, Clone)]
struct SchemaObject {
    name: String,
    sql: String,
}

struct Export {
    tables: Vec<ExportedTable>,
    objects: Vec<SchemaObject>,
}

fn aborted(phase: &'static str, table: &str, reason: impl ToString) -> CrawlDbError {
    CrawlDbError::RepairAborted {
        phase,
        table: table.to_string(),
        reason: reason.to_string(),
    }
}

/// Rebuilds the store at `store_path` and swaps it into place
///
/// `storage` must be the open store that `snapshot` was taken from; it is
/// closed before the swap.
pub fn repair_store(
    store_path: &Path,
    storage: SqliteStorage,
    snapshot: Snapshot,
    problems: Vec<String>,
) -> Result<RepairReport> {
    let staging = sibling_path(store_path, ".repair");
    let rebuild_path = sibling_path(store_path, ".rebuild");

    let result = export_store(storage.connection(), &staging)
        .and_then(|export| {
            storage.close()?;
            Ok(export)
        })
        .and_then(|export| {
            let tables = rebuild_store(&export, &rebuild_path)?;
            swap_into_place(&rebuild_path, store_path).map_err(|e| aborted("swap", "*", e))?;
            Ok(tables)
        });

    if staging.exists() {
        if let Err(e) = std::fs::remove_dir_all(&staging) {
            tracing::warn!("Could not remove staging {}: {}", staging.display(), e);
        }
    }

    match result {
        Ok(tables) => {
            tracing::info!(
                "Repaired {} ({} table(s) rebuilt)",
                store_path.display(),
                tables.len()
            );
            Ok(RepairReport {
                snapshot,
                problems,
                tables,
            })
        }
        Err(e) => {
            tracing::error!("Repair of {} aborted: {}", store_path.display(), e);
            if rebuild_path.exists() {
                if let Err(e) = std::fs::remove_file(&rebuild_path) {
                    tracing::warn!("Could not remove {}: {}", rebuild_path.display(), e);
                }
            }
            Err(e)
        }
    }
}

// ===== Phase 1: export =====

fn export_store(conn: &Connection, staging: &Path) -> Result<Export> {
    if staging.exists() {
        std::fs::remove_dir_all(staging).map_err(|e| aborted("export", "*", e))?;
    }
    std::fs::create_dir_all(staging).map_err(|e| aborted("export", "*", e))?;

    let (table_sql, objects) =
        list_schema(conn).map_err(|e| aborted("export", "sqlite_master", e))?;

    let mut tables = Vec::with_capacity(table_sql.len());
    for (name, sql) in table_sql {
        let exported =
            export_table(conn, staging, name.clone(), sql).map_err(|e| aborted("export", &name, e))?;
        tracing::debug!("Exported {} row(s) from {}", exported.rows, name);
        tables.push(exported);
    }

    Ok(Export { tables, objects })
}

/// Lists user tables with their SQL, plus the indexes, views and triggers
fn list_schema(conn: &Connection) -> rusqlite::Result<(Vec<(String, String)>, Vec<SchemaObject>)> {
    let mut stmt = conn.prepare(
        "SELECT name, sql FROM sqlite_master
         WHERE type = 'table' AND name NOT LIKE 'sqlite_%' AND sql IS NOT NULL
         ORDER BY name",
    )?;
    let tables = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut stmt = conn.prepare(
        "SELECT name, sql FROM sqlite_master
         WHERE type IN ('index', 'view', 'trigger')
           AND name NOT LIKE 'sqlite_%' AND sql IS NOT NULL
         ORDER BY CASE type WHEN 'index' THEN 0 WHEN 'view' THEN 1 ELSE 2 END, name",
    )?;
    let objects = stmt
        .query_map([], |row| {
            Ok(SchemaObject {
                name: row.get(0)?,
                sql: row.get(1)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok((tables, objects))
}

fn export_table(
    conn: &Connection,
    staging: &Path,
    name: String,
    sql: String,
) -> std::result::Result<ExportedTable, Box<dyn std::error::Error>> {
    let mut stmt = conn.prepare(&format!("SELECT * FROM {}", quote_ident(&name)))?;
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();

    let file_path = staging.join(format!("{}.jsonl", hex::encode(name.as_bytes())));
    let file = File::create(&file_path)?;
    let mut out = BufWriter::new(file);

    let header = TableHeader { name, sql, columns };
    serde_json::to_writer(&mut out, &header)?;
    out.write_all(b"\n")?;

    let width = header.columns.len();
    let mut rows = stmt.query([])?;
    let mut count = 0u64;
    while let Some(row) = rows.next()? {
        let cells = (0..width)
            .map(|idx| row.get_ref(idx).map(Cell::from_ref))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        serde_json::to_writer(&mut out, &cells)?;
        out.write_all(b"\n")?;
        count += 1;
    }

    let file = out.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;

    Ok(ExportedTable {
        header,
        rows: count,
        file: file_path,
    })
}

// ===== Phase 2: rebuild =====

fn rebuild_store(export: &Export, rebuild_path: &Path) -> Result<Vec<RepairedTable>> {
    if rebuild_path.exists() {
        std::fs::remove_file(rebuild_path).map_err(|e| aborted("rebuild", "*", e))?;
    }

    let mut conn = Connection::open(rebuild_path).map_err(|e| aborted("rebuild", "*", e))?;
    conn.execute_batch("PRAGMA journal_mode = DELETE; PRAGMA foreign_keys = OFF;")
        .map_err(|e| aborted("rebuild", "*", e))?;
    create_tables(&conn).map_err(|e| aborted("rebuild", "*", e))?;

    for table in &export.tables {
        prepare_table(&conn, &table.header).map_err(|e| aborted("rebuild", &table.header.name, e))?;
    }

    let tx = conn.transaction().map_err(|e| aborted("reimport", "*", e))?;
    let mut repaired = Vec::with_capacity(export.tables.len());
    for table in &export.tables {
        let name = &table.header.name;
        let rows = import_table(&tx, table).map_err(|e| aborted("reimport", name, e))?;
        let stored: i64 = tx
            .query_row(&format!("SELECT COUNT(*) FROM {}", quote_ident(name)), [], |row| row.get(0))
            .map_err(|e| aborted("reimport", name, e))?;
        if rows != table.rows || stored as u64 != table.rows {
            return Err(aborted(
                "reimport",
                name,
                format!("exported {} row(s), reimported {}, stored {}", table.rows, rows, stored),
            ));
        }
        tracing::debug!("Reimported {} row(s) into {}", rows, name);
        repaired.push(RepairedTable {
            name: name.clone(),
            rows,
        });
    }
    tx.commit().map_err(|e| aborted("reimport", "*", e))?;

    create_views(&conn).map_err(|e| aborted("rebuild", "*", e))?;
    replay_objects(&conn, &export.objects)?;

    let report = check_structure(&conn).map_err(|e| aborted("verify", "*", e))?;
    if !report.ok {
        return Err(aborted("verify", "*", report.messages.join("; ")));
    }

    conn.close().map_err(|(_, e)| aborted("verify", "*", e))?;
    File::open(rebuild_path)
        .and_then(|f| f.sync_all())
        .map_err(|e| aborted("verify", "*", e))?;

    Ok(repaired)
}

/// Makes sure `header`'s table exists with every exported column
fn prepare_table(conn: &Connection, header: &TableHeader) -> rusqlite::Result<()> {
    if !TABLES.contains(&header.name.as_str()) {
        conn.execute_batch(&header.sql)?;
        return Ok(());
    }

    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1)")?;
    let present = stmt
        .query_map([&header.name], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<HashSet<_>>>()?;
    for column in header.columns.iter().filter(|c| !present.contains(*c)) {
        conn.execute_batch(&format!(
            "ALTER TABLE {} ADD COLUMN {};",
            quote_ident(&header.name),
            quote_ident(column)
        ))?;
    }
    Ok(())
}

fn import_table(
    conn: &Connection,
    table: &ExportedTable,
) -> std::result::Result<u64, Box<dyn std::error::Error>> {
    let mut lines = BufReader::new(File::open(&table.file)?).lines();
    let header: TableHeader = match lines.next() {
        Some(line) => serde_json::from_str(&line?)?,
        None => return Err("staging file is empty".into()),
    };

    let columns: Vec<String> = header.columns.iter().map(|c| quote_ident(c)).collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
    let mut stmt = conn.prepare(&format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(&header.name),
        columns.join(", "),
        placeholders.join(", ")
    ))?;

    let mut count = 0u64;
    for line in lines {
        let cells: Vec<Cell> = serde_json::from_str(&line?)?;
        let values = cells
            .into_iter()
            .map(Cell::decode)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        stmt.execute(params_from_iter(values))?;
        count += 1;
    }
    Ok(count)
}

/// Recreates exported indexes, views and triggers the rebuild lacks
fn replay_objects(conn: &Connection, objects: &[SchemaObject]) -> Result<()> {
    let mut stmt = conn
        .prepare("SELECT name FROM sqlite_master")
        .map_err(|e| aborted("rebuild", "sqlite_master", e))?;
    let present = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .and_then(|rows| rows.collect::<rusqlite::Result<HashSet<_>>>())
        .map_err(|e| aborted("rebuild", "sqlite_master", e))?;

    for object in objects.iter().filter(|o| !present.contains(&o.name)) {
        conn.execute_batch(&object.sql)
            .map_err(|e| aborted("rebuild", &object.name, e))?;
        tracing::debug!("Recreated {}", object.name);
    }
    Ok(())
}

// ===== Swap =====

/// Atomically replaces `store` with `replacement`
///
/// Both paths must be on the same filesystem. Stale journal side files of
/// the old store are removed after the rename.
pub(crate) fn swap_into_place(replacement: &Path, store: &Path) -> std::io::Result<()> {
    std::fs::rename(replacement, store)?;
    for suffix in ["-journal", "-wal", "-shm"] {
        let side = sibling_path(store, suffix);
        if side.exists() {
            std::fs::remove_file(&side)?;
        }
    }
    Ok(())
}

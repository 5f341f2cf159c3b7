//! Store lifecycle management
//!
//! This module drives every operation that acts on a store as a whole:
//! - `init`: create the schema, or rebuild an existing store from scratch
//! - `backup`: take a verified snapshot
//! - `optimize`: compact and refresh statistics
//! - `migrate`: upgrade legacy stores to the normalized layout
//! - `repair`: rebuild a structurally damaged store
//! - `analyze`: read-only report
//!
//! Every operation holds the store lock while it runs, and every operation
//! that can lose data starts from a verified snapshot.

mod backup;
mod lock;
mod migrate;
mod optimize;
mod repair;

pub use backup::{create_snapshot, Snapshot};
pub use lock::StoreLock;
pub use migrate::{inspect, MigrationReport, MigrationState};
pub use optimize::{database_bytes, OptimizeReport};
pub use repair::{RepairOutcome, RepairReport, RepairedTable};

use crate::config::{Config, IngestConfig};
use crate::output::{load_analysis, AnalysisReport};
use crate::storage::integrity::{check_structure, StructuralReport};
use crate::storage::SqliteStorage;
use crate::{CrawlDbError, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Appends `suffix` to the full store path (`crawl.db` -> `crawl.db.lock`)
pub(crate) fn sibling_path(store: &Path, suffix: &str) -> PathBuf {
    let mut name = store.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// A lifecycle operation selectable from the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Init,
    Backup,
    Optimize,
    Migrate,
    Repair,
    Analyze,
}

impl Operation {
    pub const ALL: [Operation; 6] = [
        Operation::Init,
        Operation::Backup,
        Operation::Optimize,
        Operation::Migrate,
        Operation::Repair,
        Operation::Analyze,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Init => "init",
            Operation::Backup => "backup",
            Operation::Optimize => "optimize",
            Operation::Migrate => "migrate",
            Operation::Repair => "repair",
            Operation::Analyze => "analyze",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Operation::ALL
            .into_iter()
            .find(|op| op.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                format!(
                    "unknown operation '{}' (expected one of: init, backup, optimize, migrate, repair, analyze)",
                    s
                )
            })
    }
}

/// Result of `init`
#[derive(Debug, Clone, PartialEq)]
pub enum InitOutcome {
    Created,
    /// The store exists and `force` was not given; nothing changed
    AlreadyExists,
    /// The store was snapshotted and replaced with an empty one
    Reinitialized { snapshot: Snapshot },
}

/// Result of any lifecycle operation
#[derive(Debug, Clone)]
pub enum Outcome {
    Init(InitOutcome),
    Backup(Snapshot),
    Optimize(OptimizeReport),
    Migrate(MigrationReport),
    Repair(RepairOutcome),
    Analyze(Box<AnalysisReport>),
}

/// Lifecycle manager bound to one store
#[derive(Debug, Clone)]
pub struct Lifecycle {
    store_path: PathBuf,
    backup_dir: PathBuf,
    ingest: IngestConfig,
    top_pages: usize,
}

impl Lifecycle {
    pub fn new(store_path: &Path, config: &Config) -> Self {
        Self {
            store_path: store_path.to_path_buf(),
            backup_dir: config.store.backup_dir_for(store_path),
            ingest: config.ingest.clone(),
            top_pages: config.analyze.top_pages,
        }
    }

    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    /// Runs one operation; `force` applies to init, migrate and repair
    pub fn run(&self, operation: Operation, force: bool) -> Result<Outcome> {
        tracing::info!("Running {} on {}", operation, self.store_path.display());
        match operation {
            Operation::Init => self.init(force).map(Outcome::Init),
            Operation::Backup => self.backup().map(Outcome::Backup),
            Operation::Optimize => self.optimize().map(Outcome::Optimize),
            Operation::Migrate => self.migrate(force).map(Outcome::Migrate),
            Operation::Repair => self.repair(force).map(Outcome::Repair),
            Operation::Analyze => self.analyze().map(|r| Outcome::Analyze(Box::new(r))),
        }
    }

    /// Creates the store, or with `force` replaces an existing one
    pub fn init(&self, force: bool) -> Result<InitOutcome> {
        let _lock = StoreLock::acquire(&self.store_path)?;

        if !self.store_path.exists() {
            SqliteStorage::new(&self.store_path)?.close()?;
            tracing::info!("Created store {}", self.store_path.display());
            return Ok(InitOutcome::Created);
        }

        if !force {
            tracing::warn!(
                "Store {} already exists; use --force to reinitialize",
                self.store_path.display()
            );
            return Ok(InitOutcome::AlreadyExists);
        }

        let existing = SqliteStorage::open_existing(&self.store_path)?;
        let snapshot = create_snapshot(existing.connection(), &self.store_path, &self.backup_dir)?;
        existing.close()?;

        let fresh = sibling_path(&self.store_path, ".init");
        if fresh.exists() {
            std::fs::remove_file(&fresh)?;
        }
        let built = SqliteStorage::new(&fresh)
            .and_then(|storage| storage.close())
            .and_then(|()| Ok(std::fs::File::open(&fresh)?.sync_all()?))
            .and_then(|()| Ok(repair::swap_into_place(&fresh, &self.store_path)?));
        if let Err(e) = built {
            if fresh.exists() {
                if let Err(cleanup) = std::fs::remove_file(&fresh) {
                    tracing::warn!("Could not remove {}: {}", fresh.display(), cleanup);
                }
            }
            return Err(e);
        }

        tracing::info!("Reinitialized store {}", self.store_path.display());
        Ok(InitOutcome::Reinitialized { snapshot })
    }

    /// Takes a verified snapshot of the store
    pub fn backup(&self) -> Result<Snapshot> {
        let _lock = StoreLock::acquire(&self.store_path)?;
        let storage = SqliteStorage::open_existing(&self.store_path)?;
        let snapshot = create_snapshot(storage.connection(), &self.store_path, &self.backup_dir)?;
        storage.close()?;
        Ok(snapshot)
    }

    /// Snapshots, then compacts the store and refreshes statistics
    pub fn optimize(&self) -> Result<OptimizeReport> {
        let _lock = StoreLock::acquire(&self.store_path)?;
        let storage = SqliteStorage::open_existing(&self.store_path)?;
        let snapshot = create_snapshot(storage.connection(), &self.store_path, &self.backup_dir)?;
        let report = optimize::optimize(storage.connection(), snapshot)?;
        storage.close()?;
        Ok(report)
    }

    /// Upgrades a legacy store; skipped when already current unless forced
    pub fn migrate(&self, force: bool) -> Result<MigrationReport> {
        let _lock = StoreLock::acquire(&self.store_path)?;
        let mut storage = SqliteStorage::open_existing(&self.store_path)?;

        let state = inspect(storage.connection())?;
        if state.is_up_to_date() && !force {
            tracing::info!(
                "Store is current ({} normalized, {} legacy page(s)); nothing to migrate",
                state.normalized_rows,
                state.legacy_rows
            );
            storage.close()?;
            return Ok(MigrationReport::skipped(state));
        }

        let snapshot = create_snapshot(storage.connection(), &self.store_path, &self.backup_dir)?;
        let report = migrate::migrate(storage.connection_mut(), snapshot, state, force, &self.ingest)?;
        storage.close()?;
        Ok(report)
    }

    /// Rebuilds the store when the structural check fails (or when forced)
    pub fn repair(&self, force: bool) -> Result<RepairOutcome> {
        let _lock = StoreLock::acquire(&self.store_path)?;
        let storage = SqliteStorage::open_existing(&self.store_path)?;

        let report = match check_structure(storage.connection()) {
            Ok(report) => report,
            Err(e) => StructuralReport {
                ok: false,
                messages: vec![e.to_string()],
            },
        };
        if report.ok && !force {
            tracing::info!("Integrity check passed; no repair needed");
            storage.close()?;
            return Ok(RepairOutcome::NotNeeded);
        }

        let snapshot = create_snapshot(storage.connection(), &self.store_path, &self.backup_dir)?;
        let problems = if report.ok { Vec::new() } else { report.messages };
        repair::repair_store(&self.store_path, storage, snapshot, problems).map(RepairOutcome::Repaired)
    }

    /// Builds the read-only analysis report
    pub fn analyze(&self) -> Result<AnalysisReport> {
        let _lock = StoreLock::acquire(&self.store_path)?;
        if !self.store_path.exists() {
            return Err(CrawlDbError::StoreMissing(self.store_path.clone()));
        }
        let storage = SqliteStorage::open_read_only(&self.store_path)?;
        let report = load_analysis(&storage, &self.store_path, self.top_pages)?;
        storage.close()?;
        Ok(report)
    }
}

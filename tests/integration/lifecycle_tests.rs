//! Integration tests for store lifecycle operations
//!
//! Every test works on an on-disk store under a temporary directory, since
//! backup, repair and init --force replace real files.

use crawldb::config::Config;
use crawldb::ingest::{ingest_file, IngestOptions};
use crawldb::lifecycle::{InitOutcome, Lifecycle, Operation, Outcome, RepairOutcome, StoreLock};
use crawldb::storage::integrity::{check_structure, table_fingerprints, TableFingerprint};
use crawldb::storage::{SqliteStorage, Storage};
use crawldb::CrawlDbError;
use rusqlite::{Connection, OpenFlags};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Creates a store under `dir` holding `pages` ingested pages
fn populated_store(dir: &Path, pages: usize) -> PathBuf {
    let store = dir.join("crawl.db");
    let lines: Vec<String> = (0..pages)
        .map(|i| {
            format!(
                r#"{{"url":"https://site{}.test/page{}","html":"<div id=\"root\"></div><a href=\"/n{}\">n</a>"}}"#,
                i % 5,
                i,
                i
            )
        })
        .collect();
    let input = dir.join("seed.jsonl");
    std::fs::write(&input, lines.join("\n")).expect("Failed to write input");

    ingest_file(
        &input,
        &store,
        &Config::default(),
        &IngestOptions {
            task_id: Some("seed".to_string()),
            skip_backup: true,
        },
    )
    .expect("Seeding ingestion failed");
    store
}

fn snapshots_in(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .expect("Failed to list dir")
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.to_string_lossy().contains(".backup."))
        .collect()
}

#[test]
fn test_init_creates_then_refuses_existing_store() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let store = dir.path().join("fresh.db");
    let lifecycle = Lifecycle::new(&store, &Config::default());

    match lifecycle.run(Operation::Init, false).expect("Init failed") {
        Outcome::Init(InitOutcome::Created) => {}
        other => panic!("Expected Created, got {:?}", other),
    }

    let populated = populated_store(dir.path(), 3);
    let before = table_fingerprints(&Connection::open(&populated).expect("Open failed"))
        .expect("Fingerprint failed");

    let lifecycle = Lifecycle::new(&populated, &Config::default());
    assert_eq!(
        lifecycle.init(false).expect("Init failed"),
        InitOutcome::AlreadyExists
    );

    let after = table_fingerprints(&Connection::open(&populated).expect("Open failed"))
        .expect("Fingerprint failed");
    assert_eq!(before, after, "Refused init must not modify the store");
    assert!(snapshots_in(dir.path()).is_empty());
}

#[test]
fn test_backup_creates_verified_read_only_snapshot() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let store = populated_store(dir.path(), 10);
    let mut config = Config::default();
    config.store.backup_dir = Some(dir.path().join("snaps").to_string_lossy().into_owned());

    let snapshot = Lifecycle::new(&store, &config).backup().expect("Backup failed");

    assert!(snapshot.path.starts_with(dir.path().join("snaps")));
    assert!(std::fs::metadata(&snapshot.path)
        .expect("Snapshot missing")
        .permissions()
        .readonly());

    let original = table_fingerprints(&Connection::open(&store).expect("Open failed"))
        .expect("Fingerprint failed");
    let copy = Connection::open_with_flags(&snapshot.path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .expect("Open failed");
    let copy = table_fingerprints(&copy).expect("Fingerprint failed");
    assert_eq!(original, copy);
}

#[test]
fn test_analyze_is_read_only() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let store = populated_store(dir.path(), 12);
    let before = table_fingerprints(&Connection::open(&store).expect("Open failed"))
        .expect("Fingerprint failed");
    let modified_before = std::fs::metadata(&store)
        .expect("Store missing")
        .modified()
        .expect("No mtime");

    let report = Lifecycle::new(&store, &Config::default())
        .analyze()
        .expect("Analyze failed");

    assert_eq!(report.total_pages(), 12);
    assert_eq!(report.js_dependent_pages(), 12);
    assert_eq!(report.domain_js.len(), 5);
    assert_eq!(report.top_pages.len(), 10);
    assert!(report.structure.ok);
    assert!(report.notes.is_empty());

    let after = table_fingerprints(&Connection::open(&store).expect("Open failed"))
        .expect("Fingerprint failed");
    assert_eq!(before, after);
    assert_eq!(
        modified_before,
        std::fs::metadata(&store).expect("Store missing").modified().expect("No mtime")
    );
}

#[test]
fn test_analyze_markdown_export() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let store = populated_store(dir.path(), 4);

    let report = Lifecycle::new(&store, &Config::default())
        .analyze()
        .expect("Analyze failed");
    let path = dir.path().join("report.md");
    crawldb::output::write_markdown_report(&report, &path).expect("Export failed");

    let markdown = std::fs::read_to_string(&path).expect("Report missing");
    assert!(markdown.contains("## JavaScript Dependency by Domain"));
    assert!(markdown.contains("empty SPA mount point found"));
}

#[test]
fn test_optimize_snapshots_first() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let store = populated_store(dir.path(), 20);

    let report = Lifecycle::new(&store, &Config::default())
        .optimize()
        .expect("Optimize failed");

    assert!(report.snapshot.path.exists());
    assert_eq!(
        report.reclaimed_bytes(),
        report.bytes_before.saturating_sub(report.bytes_after)
    );

    let storage = SqliteStorage::open_read_only(&store).expect("Failed to open store");
    assert_eq!(storage.count_rows("crawled_pages").expect("Count failed"), 20);
    assert!(check_structure(storage.connection()).expect("Check failed").ok);
}

#[test]
fn test_migrate_on_current_store_is_noop() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let store = populated_store(dir.path(), 5);

    let report = Lifecycle::new(&store, &Config::default())
        .migrate(false)
        .expect("Migrate failed");

    assert!(report.skipped);
    assert_eq!(report.newly_migrated, 0);
    assert!(report.snapshot.is_none());
    assert!(snapshots_in(dir.path()).is_empty());
}

#[test]
fn test_migrate_legacy_store() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let store = dir.path().join("legacy.db");
    {
        let conn = Connection::open(&store).expect("Open failed");
        conn.execute_batch(
            r#"
            CREATE TABLE tasks (
                id TEXT PRIMARY KEY, url TEXT NOT NULL, max_depth INTEGER NOT NULL DEFAULT 0,
                follow_subdomains INTEGER NOT NULL DEFAULT 0, max_links INTEGER,
                created_at INTEGER NOT NULL, assigned_at INTEGER,
                incentive_amount INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE crawl_results (
                task_id TEXT PRIMARY KEY REFERENCES tasks(id), domain TEXT NOT NULL,
                status TEXT NOT NULL, pages_count INTEGER NOT NULL, pages TEXT NOT NULL,
                total_size INTEGER NOT NULL, start_time INTEGER NOT NULL, end_time INTEGER,
                transaction_hash TEXT, incentives_received INTEGER
            );
            INSERT INTO tasks (id, url, created_at) VALUES ('old', 'https://old.test/', 100);
            INSERT INTO crawl_results (task_id, domain, status, pages_count, pages, total_size, start_time)
            VALUES ('old', 'old.test', 'Verified', 3,
                '[{"url":"https://old.test/","size":100,"timestamp":100,"content_type":"text/html","status_code":200},
                  {"url":"https://old.test/a","size":50,"timestamp":101,"content_type":"text/html","status_code":200},
                  {"url":"https://cdn.old.test/b","size":25,"timestamp":102,"content_type":"text/css","status_code":404}]',
                175, 100);
            "#,
        )
        .expect("Failed to build legacy store");
    }

    let lifecycle = Lifecycle::new(&store, &Config::default());
    let report = lifecycle.migrate(false).expect("Migrate failed");

    assert!(!report.skipped);
    assert!(report.snapshot.is_some());
    assert_eq!(report.state.legacy_rows, 3);
    assert_eq!(report.newly_migrated, 3);

    let storage = SqliteStorage::open_read_only(&store).expect("Failed to open store");
    let page = storage
        .get_page_by_url("https://cdn.old.test/b")
        .expect("Query failed")
        .expect("Page should exist");
    assert_eq!(page.domain, "cdn.old.test");
    assert_eq!(page.status, 404);
    assert_eq!(page.task_id, "old");
    assert_eq!(page.is_javascript_dependent, Some(false));
    storage.close().expect("Close failed");

    // Second run finds nothing to do
    let again = lifecycle.migrate(false).expect("Second migrate failed");
    assert!(again.skipped);
    assert_eq!(again.newly_migrated, 0);
}

/// Zeroes the root page of a named table or index
fn corrupt_root_page(store: &Path, name: &str) {
    let (root, page_size): (i64, i64) = {
        let conn = Connection::open(store).expect("Open failed");
        let root = conn
            .query_row(
                "SELECT rootpage FROM sqlite_master WHERE name = ?1",
                [name],
                |row| row.get(0),
            )
            .expect("Schema object not found");
        let page_size = conn
            .query_row("PRAGMA page_size", [], |row| row.get(0))
            .expect("No page size");
        (root, page_size)
    };

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .open(store)
        .expect("Failed to open store file");
    file.seek(SeekFrom::Start(((root - 1) * page_size) as u64))
        .expect("Seek failed");
    file.write_all(&vec![0u8; page_size as usize])
        .expect("Write failed");
    file.sync_all().expect("Sync failed");
}

#[test]
fn test_repair_rebuilds_corrupted_store() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let store = populated_store(dir.path(), 40);
    let before = table_fingerprints(&Connection::open(&store).expect("Open failed"))
        .expect("Fingerprint failed");

    corrupt_root_page(&store, "idx_crawled_pages_domain");
    {
        let conn = Connection::open(&store).expect("Open failed");
        let healthy = check_structure(&conn).map(|r| r.ok).unwrap_or(false);
        assert!(!healthy, "Corruption should fail the integrity check");
    }

    let lifecycle = Lifecycle::new(&store, &Config::default());

    // Optimize refuses to touch a damaged store
    assert!(matches!(
        lifecycle.optimize(),
        Err(CrawlDbError::IntegrityFailure { .. })
    ));

    let report = match lifecycle.repair(false).expect("Repair failed") {
        RepairOutcome::Repaired(report) => report,
        RepairOutcome::NotNeeded => panic!("Damaged store should need repair"),
    };
    assert!(!report.problems.is_empty());
    assert!(report.snapshot.path.exists());

    let conn = Connection::open(&store).expect("Open failed");
    assert!(check_structure(&conn).expect("Check failed").ok);
    let after = table_fingerprints(&conn).expect("Fingerprint failed");
    assert_eq!(before, after, "Repair must preserve every row");

    assert!(!dir.path().join("crawl.db.repair").exists());
    assert!(!dir.path().join("crawl.db.rebuild").exists());
}

#[test]
fn test_repair_not_needed_on_healthy_store() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let store = populated_store(dir.path(), 3);

    let outcome = Lifecycle::new(&store, &Config::default())
        .repair(false)
        .expect("Repair failed");
    assert_eq!(outcome, RepairOutcome::NotNeeded);
    assert!(snapshots_in(dir.path()).is_empty());
}

#[test]
fn test_forced_repair_preserves_rows() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let store = populated_store(dir.path(), 8);
    let before = table_fingerprints(&Connection::open(&store).expect("Open failed"))
        .expect("Fingerprint failed");

    let outcome = Lifecycle::new(&store, &Config::default())
        .repair(true)
        .expect("Repair failed");
    assert!(matches!(outcome, RepairOutcome::Repaired(_)));

    let storage = SqliteStorage::open_read_only(&store).expect("Failed to open store");
    assert_eq!(storage.count_rows("crawled_pages").expect("Count failed"), 8);
    let after = table_fingerprints(storage.connection()).expect("Fingerprint failed");
    assert_eq!(before, after);
}

#[test]
fn test_operations_refused_while_locked() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let store = populated_store(dir.path(), 2);
    let lifecycle = Lifecycle::new(&store, &Config::default());

    let _held = StoreLock::acquire(&store).expect("Failed to take lock");
    for op in Operation::ALL {
        assert!(
            matches!(lifecycle.run(op, true), Err(CrawlDbError::StoreBusy(_))),
            "{} should be refused while the store is locked",
            op
        );
    }
}

#[test]
fn test_analyze_reports_damaged_store() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let store = populated_store(dir.path(), 40);
    corrupt_root_page(&store, "idx_crawled_pages_domain");

    let report = Lifecycle::new(&store, &Config::default())
        .analyze()
        .expect("Analyze should report on a damaged store");

    assert!(!report.structure.ok);
    assert!(report.notes.iter().any(|n| n.contains("run `repair`")));

    let markdown = crawldb::output::format_markdown_report(&report);
    assert!(markdown.contains("Structural check: **failed**"));
}

fn fingerprints(store: &Path) -> std::collections::BTreeMap<String, TableFingerprint> {
    table_fingerprints(&Connection::open(store).expect("Open failed")).expect("Fingerprint failed")
}

#[test]
fn test_failed_snapshot_stops_every_mutating_operation() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let store = populated_store(dir.path(), 6);

    // A regular file where the backup directory should be
    let blocker = dir.path().join("backups");
    std::fs::write(&blocker, b"occupied").expect("Failed to write blocker");
    let mut config = Config::default();
    config.store.backup_dir = Some(blocker.to_string_lossy().into_owned());

    let input = dir.path().join("more.jsonl");
    std::fs::write(&input, r#"{"url":"https://new.test/","html":"<p>new</p>"}"#)
        .expect("Failed to write input");

    let before = fingerprints(&store);
    let lifecycle = Lifecycle::new(&store, &config);
    let check = |name: &str, result: crawldb::Result<()>| {
        assert!(
            matches!(result, Err(CrawlDbError::BackupFailed { .. })),
            "{} should stop on the failed snapshot, got {:?}",
            name,
            result
        );
        assert_eq!(fingerprints(&store), before, "{} must not modify the store", name);
    };

    check("init --force", lifecycle.init(true).map(|_| ()));
    check("backup", lifecycle.backup().map(|_| ()));
    check("optimize", lifecycle.optimize().map(|_| ()));
    check("migrate --force", lifecycle.migrate(true).map(|_| ()));
    check("repair --force", lifecycle.repair(true).map(|_| ()));

    let options = IngestOptions {
        task_id: Some("more".to_string()),
        skip_backup: false,
    };
    check("ingest", ingest_file(&input, &store, &config, &options).map(|_| ()));

    assert!(!dir.path().join("crawl.db.init").exists());
    assert!(!dir.path().join("crawl.db.repair").exists());
    assert!(!StoreLock::path_for(&store).exists());
}

#[test]
fn test_repair_export_failure_leaves_store_untouched() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let store = populated_store(dir.path(), 5);
    corrupt_root_page(&store, "tasks");
    let bytes_before = std::fs::read(&store).expect("Failed to read store");

    let err = Lifecycle::new(&store, &Config::default())
        .repair(false)
        .expect_err("Repair should abort");

    assert!(
        matches!(err, CrawlDbError::RepairAborted { phase: "export", ref table, .. } if table == "tasks"),
        "Unexpected error: {:?}",
        err
    );
    assert_eq!(std::fs::read(&store).expect("Failed to read store"), bytes_before);
    assert!(!dir.path().join("crawl.db.repair").exists());
    assert!(!dir.path().join("crawl.db.rebuild").exists());
    assert_eq!(snapshots_in(dir.path()).len(), 1, "The snapshot is kept for recovery");
}

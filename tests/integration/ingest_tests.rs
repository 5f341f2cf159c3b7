//! Integration tests for JSONL ingestion
//!
//! These tests ingest files into on-disk stores under a temporary
//! directory and inspect the resulting rows.

use crawldb::config::Config;
use crawldb::ingest::{ingest_file, IngestOptions};
use crawldb::storage::{SqliteStorage, Storage};
use crawldb::CrawlDbError;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Writes `lines` as a JSONL file and returns its path
fn write_input(dir: &Path, name: &str, lines: &[String]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, lines.join("\n") + "\n").expect("Failed to write input file");
    path
}

fn options(task_id: &str) -> IngestOptions {
    IngestOptions {
        task_id: Some(task_id.to_string()),
        skip_backup: false,
    }
}

#[test]
fn test_end_to_end_example_record() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let store = dir.path().join("crawl.db");
    let line = r##"{"url":"https://a.test/","html":"<html><body><a href=\"/x\">x</a><a href=\"#top\">top</a><script src=\"bundle.js\"></script></body></html>"}"##;
    let input = write_input(dir.path(), "pages.jsonl", &[line.to_string()]);

    let summary = ingest_file(&input, &store, &Config::default(), &options("task-1"))
        .expect("Ingestion failed");
    assert_eq!(summary.written, 1);
    assert_eq!(summary.skipped, 0);
    assert!(summary.snapshot.is_none(), "No snapshot expected for a new store");

    let storage = SqliteStorage::open_read_only(&store).expect("Failed to open store");
    let page = storage
        .get_page_by_url("https://a.test/")
        .expect("Query failed")
        .expect("Page should exist");

    assert_eq!(page.domain, "a.test");
    assert_eq!(page.task_id, "task-1");
    assert_eq!(page.is_javascript_dependent, Some(true));
    assert!(
        page.javascript_dependency_reasons
            .iter()
            .any(|r| r.contains("bundle")),
        "Expected a bundle-related reason, got {:?}",
        page.javascript_dependency_reasons
    );
    assert_eq!(page.extracted_links, vec!["/x".to_string()]);
}

#[test]
fn test_reingest_is_idempotent() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let store = dir.path().join("crawl.db");
    let lines: Vec<String> = (0..25)
        .map(|i| format!(r#"{{"url":"https://a.test/p{}","html":"<p>{}</p>"}}"#, i, i))
        .collect();
    let input = write_input(dir.path(), "pages.jsonl", &lines);
    let config = Config::default();

    ingest_file(&input, &store, &config, &options("task-1")).expect("First ingestion failed");
    let first_ids: Vec<i64> = {
        let storage = SqliteStorage::open_read_only(&store).expect("Failed to open store");
        (0..25)
            .map(|i| {
                storage
                    .get_page_by_url(&format!("https://a.test/p{}", i))
                    .expect("Query failed")
                    .expect("Page should exist")
                    .id
            })
            .collect()
    };

    let summary =
        ingest_file(&input, &store, &config, &options("task-1")).expect("Second ingestion failed");
    assert!(summary.snapshot.is_some(), "Existing store should be snapshotted");

    let storage = SqliteStorage::open_read_only(&store).expect("Failed to open store");
    assert_eq!(storage.count_rows("crawled_pages").expect("Count failed"), 25);
    assert_eq!(storage.count_rows("crawl_results").expect("Count failed"), 1);

    // Row ids survive the upsert
    let second_ids: Vec<i64> = (0..25)
        .map(|i| {
            storage
                .get_page_by_url(&format!("https://a.test/p{}", i))
                .expect("Query failed")
                .expect("Page should exist")
                .id
        })
        .collect();
    assert_eq!(first_ids, second_ids);
}

#[test]
fn test_link_cap_bounds_pathological_page() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let store = dir.path().join("crawl.db");
    let anchors: String = (0..1500)
        .map(|i| format!("<a href=\\\"/l{}\\\">{}</a>", i, i))
        .collect();
    let line = format!(r#"{{"url":"https://a.test/","html":"{}"}}"#, anchors);
    let input = write_input(dir.path(), "pages.jsonl", &[line]);

    ingest_file(&input, &store, &Config::default(), &options("task-1")).expect("Ingestion failed");

    let storage = SqliteStorage::open_read_only(&store).expect("Failed to open store");
    let page = storage
        .get_page_by_url("https://a.test/")
        .expect("Query failed")
        .expect("Page should exist");
    assert_eq!(page.extracted_links.len(), 1000);
    assert_eq!(page.extracted_links[0], "/l0");
    assert_eq!(page.extracted_links[999], "/l999");
}

#[test]
fn test_malformed_lines_are_counted() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let store = dir.path().join("crawl.db");
    let lines = vec![
        r#"{"url":"https://a.test/ok","html":"<p>ok</p>"}"#.to_string(),
        "{ this is not json".to_string(),
        r#"{"html":"<p>no url</p>"}"#.to_string(),
        r#"{"url":"https://a.test/no-markup"}"#.to_string(),
        r#"{"url":"not a url","html":""}"#.to_string(),
        String::new(),
        r#"{"url":"https://b.test/ok","body":"<p>ok</p>","status_code":404}"#.to_string(),
    ];
    let input = write_input(dir.path(), "pages.jsonl", &lines);

    let summary = ingest_file(&input, &store, &Config::default(), &options("task-1"))
        .expect("Ingestion failed");
    assert_eq!(summary.written, 2);
    assert_eq!(summary.skipped, 4);

    let storage = SqliteStorage::open_read_only(&store).expect("Failed to open store");
    let page = storage
        .get_page_by_url("https://b.test/ok")
        .expect("Query failed")
        .expect("Page should exist");
    assert_eq!(page.status, 404);

    let result = storage
        .get_crawl_result("task-1")
        .expect("Query failed")
        .expect("Aggregate should exist");
    assert_eq!(result.pages_count, 2);
    assert_eq!(result.domain, "a.test");
}

#[test]
fn test_huge_sizes_do_not_abort_batch() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let store = dir.path().join("crawl.db");
    let lines = vec![
        r#"{"url":"https://a.test/1","html":"x","size":9223372036854775807}"#.to_string(),
        r#"{"url":"https://a.test/2","html":"x","size":9223372036854775807}"#.to_string(),
        r#"{"url":"https://a.test/3","html":"xyz","size":18446744073709551615}"#.to_string(),
    ];
    let input = write_input(dir.path(), "pages.jsonl", &lines);

    let summary = ingest_file(&input, &store, &Config::default(), &options("task-1"))
        .expect("Ingestion failed");
    assert_eq!(summary.written, 3);
    assert_eq!(summary.skipped, 0);
    assert_eq!(summary.total_bytes, u64::MAX);

    let storage = SqliteStorage::open_read_only(&store).expect("Failed to open store");
    let page = storage
        .get_page_by_url("https://a.test/3")
        .expect("Query failed")
        .expect("Page should exist");
    assert_eq!(page.size, 3);
    let sizes = storage.domain_size_stats().expect("Size query failed");
    assert_eq!(sizes[0].pages, 3);
}

#[test]
fn test_generated_task_id() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let store = dir.path().join("crawl.db");
    let input = write_input(
        dir.path(),
        "batch-7.jsonl",
        &[r#"{"url":"https://a.test/","html":"x"}"#.to_string()],
    );

    let summary = ingest_file(&input, &store, &Config::default(), &IngestOptions::default())
        .expect("Ingestion failed");
    assert!(summary.task_id.starts_with("batch-7-"));

    let storage = SqliteStorage::open_read_only(&store).expect("Failed to open store");
    assert!(storage.get_task(&summary.task_id).expect("Query failed").is_some());
}

#[test]
fn test_skip_backup_takes_no_snapshot() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let store = dir.path().join("crawl.db");
    let input = write_input(
        dir.path(),
        "pages.jsonl",
        &[r#"{"url":"https://a.test/","html":"x"}"#.to_string()],
    );
    let config = Config::default();

    ingest_file(&input, &store, &config, &options("t")).expect("First ingestion failed");
    let summary = ingest_file(
        &input,
        &store,
        &config,
        &IngestOptions {
            task_id: Some("t".to_string()),
            skip_backup: true,
        },
    )
    .expect("Second ingestion failed");

    assert!(summary.snapshot.is_none());
    let snapshots = std::fs::read_dir(dir.path())
        .expect("Failed to list dir")
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().contains(".backup."))
        .count();
    assert_eq!(snapshots, 0);
}

#[test]
fn test_blank_task_id_rejected() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let store = dir.path().join("crawl.db");
    let input = write_input(
        dir.path(),
        "pages.jsonl",
        &[r#"{"url":"https://a.test/","html":"x"}"#.to_string()],
    );

    let err = ingest_file(&input, &store, &Config::default(), &options("   "))
        .expect_err("Blank task id should be rejected");
    assert!(matches!(err, CrawlDbError::InvalidInput(_)));
    assert!(!store.exists());
}

#[test]
fn test_ingest_refused_while_store_locked() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let store = dir.path().join("crawl.db");
    let input = write_input(
        dir.path(),
        "pages.jsonl",
        &[r#"{"url":"https://a.test/","html":"x"}"#.to_string()],
    );

    let _held = crawldb::lifecycle::StoreLock::acquire(&store).expect("Failed to take lock");
    let err = ingest_file(&input, &store, &Config::default(), &options("t"))
        .expect_err("Ingestion should be refused");
    assert!(matches!(err, CrawlDbError::StoreBusy(_)));
    assert!(!store.exists(), "Refused ingestion must not create the store");
}

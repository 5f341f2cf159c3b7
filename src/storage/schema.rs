//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the crawl store:
//! the three tables, their indexes, and the two reporting views.

/// User tables owned by this schema, in foreign-key dependency order
pub const TABLES: [&str; 3] = ["tasks", "crawl_results", "crawled_pages"];

/// SQL schema for the tables and indexes
pub const SCHEMA_SQL: &str = r#"
-- Crawl tasks, created by the task manager
CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY,
    url TEXT NOT NULL,
    max_depth INTEGER NOT NULL DEFAULT 0,
    follow_subdomains INTEGER NOT NULL DEFAULT 0,
    max_links INTEGER,
    created_at INTEGER NOT NULL,
    assigned_at INTEGER,
    incentive_amount INTEGER NOT NULL DEFAULT 0
);

-- One aggregate per task. `pages` holds the legacy embedded page array.
CREATE TABLE IF NOT EXISTS crawl_results (
    task_id TEXT PRIMARY KEY REFERENCES tasks(id),
    domain TEXT NOT NULL,
    status TEXT NOT NULL,
    pages_count INTEGER NOT NULL,
    pages TEXT NOT NULL DEFAULT '[]',
    total_size INTEGER NOT NULL,
    start_time INTEGER NOT NULL,
    end_time INTEGER,
    transaction_hash TEXT,
    incentives_received INTEGER
);

-- One row per unique crawled URL
CREATE TABLE IF NOT EXISTS crawled_pages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id TEXT NOT NULL REFERENCES tasks(id),
    url TEXT NOT NULL UNIQUE,
    domain TEXT NOT NULL,
    status INTEGER NOT NULL,
    content_type TEXT NOT NULL,
    title TEXT,
    size INTEGER NOT NULL,
    html TEXT,
    fetched_at INTEGER NOT NULL,
    is_javascript_dependent INTEGER,
    javascript_dependency_reasons TEXT,
    extracted_links TEXT
);

CREATE INDEX IF NOT EXISTS idx_crawled_pages_task ON crawled_pages(task_id);
CREATE INDEX IF NOT EXISTS idx_crawled_pages_domain ON crawled_pages(domain);
CREATE INDEX IF NOT EXISTS idx_crawl_results_domain ON crawl_results(domain);
"#;

/// Columns added to `crawled_pages` after its first release
///
/// Stores created before classification existed lack these; `migrate`
/// adds whichever are missing.
pub const LATE_PAGE_COLUMNS: [(&str, &str); 3] = [
    ("is_javascript_dependent", "INTEGER"),
    ("javascript_dependency_reasons", "TEXT"),
    ("extracted_links", "TEXT"),
];

/// SQL for the reporting views
pub const VIEWS_SQL: &str = r#"
-- Pages joined with their owning crawl's status and a computed link count
CREATE VIEW IF NOT EXISTS page_overview AS
SELECT
    p.id,
    p.task_id,
    p.url,
    p.domain,
    p.status,
    p.title,
    p.size,
    p.fetched_at,
    p.is_javascript_dependent,
    p.javascript_dependency_reasons,
    COALESCE(json_array_length(p.extracted_links), 0) AS link_count,
    c.status AS crawl_status
FROM crawled_pages p
LEFT JOIN crawl_results c ON c.task_id = p.task_id;

-- Per-domain JavaScript dependency aggregate
CREATE VIEW IF NOT EXISTS domain_js_stats AS
SELECT
    p.domain,
    COUNT(*) AS total_pages,
    COALESCE(SUM(p.is_javascript_dependent), 0) AS js_dependent_pages,
    ROUND(100.0 * COALESCE(SUM(p.is_javascript_dependent), 0) / COUNT(*), 2) AS js_percentage,
    (
        SELECT GROUP_CONCAT(reason, '; ')
        FROM (
            SELECT DISTINCT r.value AS reason
            FROM crawled_pages p2, json_each(p2.javascript_dependency_reasons) r
            WHERE p2.domain = p.domain
            ORDER BY r.value
        )
    ) AS reasons
FROM crawled_pages p
GROUP BY p.domain;
"#;

/// Initializes the database schema, including views
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    create_tables(conn)?;
    create_views(conn)?;
    Ok(())
}

/// Creates any missing tables and indexes
pub fn create_tables(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)
}

/// Creates any missing reporting views
///
/// Views reference the late `crawled_pages` columns, so on an old store
/// this must run after those columns have been added.
pub fn create_views(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(VIEWS_SQL)
}

/// Names of the reporting views created by `create_views`
pub const VIEWS: [&str; 2] = ["page_overview", "domain_js_stats"];

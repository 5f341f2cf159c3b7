//! Store analysis
//!
//! This module gathers the read-only `analyze` report from a store and
//! prints it to stdout.

use crate::storage::integrity::{
    check_foreign_keys, check_structure, ForeignKeyReport, StructuralReport,
};
use crate::storage::{DomainJsStat, DomainSizeStat, SqliteStorage, Storage, TopPage, VIEWS};
use crate::Result;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

/// Everything `analyze` reports about a store
#[derive(Debug, Clone)]
pub struct AnalysisReport {
    pub store: PathBuf,
    pub generated_at: DateTime<Utc>,

    /// Row count per user table
    pub table_counts: BTreeMap<String, u64>,

    /// JavaScript dependency per domain, most dependent first
    pub domain_js: Vec<DomainJsStat>,

    /// Pages with the most stored links
    pub top_pages: Vec<TopPage>,

    /// Stored bytes per domain, largest first
    pub domain_sizes: Vec<DomainSizeStat>,

    pub structure: StructuralReport,
    pub foreign_keys: ForeignKeyReport,

    /// Sections that could not be produced and why
    pub notes: Vec<String>,
}

impl AnalysisReport {
    pub fn total_pages(&self) -> u64 {
        self.table_counts.get("crawled_pages").copied().unwrap_or(0)
    }

    pub fn js_dependent_pages(&self) -> u64 {
        self.domain_js.iter().map(|d| d.js_dependent_pages).sum()
    }
}

/// Runs one report section, turning a failure into a note
fn section<T: Default>(
    notes: &mut Vec<String>,
    name: &str,
    query: impl FnOnce() -> Result<T>,
) -> T {
    match query() {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!("analyze: {} unavailable: {}", name, e);
            notes.push(format!("{} could not be read: {}", name, e));
            T::default()
        }
    }
}

/// Loads the analysis report from an open store
///
/// The integrity checks run first. A section that cannot be read (missing
/// views on an older store, damaged pages on a corrupted one) is left empty
/// and a note says why, so a damaged store still gets a report.
///
/// # Arguments
///
/// * `storage` - The store, ideally opened read-only
/// * `store_path` - Path shown in the report
/// * `top_n` - Number of pages in the top-pages section
pub fn load_analysis(
    storage: &SqliteStorage,
    store_path: &Path,
    top_n: usize,
) -> Result<AnalysisReport> {
    let mut notes = Vec::new();

    let structure = check_structure(storage.connection()).unwrap_or_else(|e| StructuralReport {
        ok: false,
        messages: vec![e.to_string()],
    });
    if !structure.ok {
        notes.push("integrity check failed; run `repair`".to_string());
    }

    let foreign_keys = match check_foreign_keys(storage.connection()) {
        Ok(report) => report,
        Err(e) => {
            notes.push(format!("foreign key check could not run: {}", e));
            ForeignKeyReport::default()
        }
    };

    let tables = section(&mut notes, "table list", || Ok(storage.list_user_tables()?));
    let mut table_counts = BTreeMap::new();
    for table in &tables {
        let label = format!("row count of `{}`", table);
        if let Some(rows) = section(&mut notes, &label, || Ok(Some(storage.count_rows(table)?))) {
            table_counts.insert(table.clone(), rows);
        }
    }

    let views = section(&mut notes, "view list", || {
        let mut stmt = storage
            .connection()
            .prepare("SELECT name FROM sqlite_master WHERE type = 'view'")?;
        let views = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<HashSet<_>, _>>()?;
        Ok(views)
    });
    for view in VIEWS.iter().filter(|v| !views.contains(**v)) {
        notes.push(format!("view `{}` is missing; run `migrate`", view));
    }

    let domain_js = if views.contains("domain_js_stats") {
        section(&mut notes, "domain statistics", || Ok(storage.domain_js_stats()?))
    } else {
        Vec::new()
    };
    let top_pages = if views.contains("page_overview") {
        section(&mut notes, "top pages", || Ok(storage.top_pages_by_links(top_n)?))
    } else {
        Vec::new()
    };
    let domain_sizes = if tables.iter().any(|t| t == "crawled_pages") {
        section(&mut notes, "domain sizes", || Ok(storage.domain_size_stats()?))
    } else {
        notes.push("table `crawled_pages` is missing; run `migrate`".to_string());
        Vec::new()
    };

    Ok(AnalysisReport {
        store: store_path.to_path_buf(),
        generated_at: Utc::now(),
        table_counts,
        domain_js,
        top_pages,
        domain_sizes,
        structure,
        foreign_keys,
        notes,
    })
}

/// Prints the analysis report to stdout
pub fn print_analysis(report: &AnalysisReport) {
    println!("=== Store Analysis ===\n");
    println!("Store: {}", report.store.display());
    println!("Generated: {}\n", report.generated_at.to_rfc3339());

    println!("Tables:");
    for (table, rows) in &report.table_counts {
        println!("  {}: {} rows", table, rows);
    }
    println!();

    let total = report.total_pages();
    let dependent = report.js_dependent_pages();
    let percentage = if total > 0 {
        (dependent as f64 / total as f64) * 100.0
    } else {
        0.0
    };
    println!(
        "JavaScript-dependent pages: {} / {} ({:.1}%)",
        dependent, total, percentage
    );
    println!();

    if !report.domain_js.is_empty() {
        println!("By Domain:");
        for stat in &report.domain_js {
            println!(
                "  {}: {}/{} ({:.2}%)",
                stat.domain, stat.js_dependent_pages, stat.total_pages, stat.js_percentage
            );
            if let Some(reasons) = &stat.reasons {
                println!("    reasons: {}", reasons);
            }
        }
        println!();
    }

    if !report.top_pages.is_empty() {
        println!("Top Pages by Links:");
        for (i, page) in report.top_pages.iter().enumerate() {
            let marker = if page.is_javascript_dependent { " [js]" } else { "" };
            println!("  {}. {} ({} links){}", i + 1, page.url, page.link_count, marker);
        }
        println!();
    }

    if !report.domain_sizes.is_empty() {
        println!("Domain Sizes:");
        for stat in &report.domain_sizes {
            println!(
                "  {}: {} pages, {} bytes (avg {:.0})",
                stat.domain, stat.pages, stat.total_size, stat.average_size
            );
        }
        println!();
    }

    if report.structure.ok {
        println!("Integrity: ok");
    } else {
        println!("Integrity: FAILED");
        for message in &report.structure.messages {
            println!("  - {}", message);
        }
    }

    if report.foreign_keys.ok() {
        println!("Foreign keys: ok");
    } else {
        println!("Foreign keys: {} violation(s)", report.foreign_keys.violations.len());
        for violation in &report.foreign_keys.violations {
            println!("  - {}", violation);
        }
    }

    if !report.notes.is_empty() {
        println!("\nNotes:");
        for note in &report.notes {
            println!("  - {}", note);
        }
    }
}

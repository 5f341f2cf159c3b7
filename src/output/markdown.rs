//! Markdown export of the analysis report

use crate::output::stats::AnalysisReport;
use crate::Result;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Writes the analysis report as markdown
///
/// # Arguments
///
/// * `report` - The analysis report
/// * `output_path` - Path where the markdown file should be written
///
/// # Returns
///
/// * `Ok(())` - Successfully wrote the report
/// * `Err(CrawlDbError)` - Failed to write the file
pub fn write_markdown_report(report: &AnalysisReport, output_path: &Path) -> Result<()> {
    let markdown = format_markdown_report(report);

    if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = File::create(output_path)?;
    file.write_all(markdown.as_bytes())?;

    Ok(())
}

/// Escapes a value for a markdown table cell
fn cell(value: &str) -> String {
    value.replace('|', "\\|").replace('\n', " ")
}

/// Formats the analysis report as markdown
pub fn format_markdown_report(report: &AnalysisReport) -> String {
    let mut md = String::new();

    md.push_str("# Crawl Store Analysis\n\n");
    md.push_str(&format!("- **Store**: `{}`\n", report.store.display()));
    md.push_str(&format!(
        "- **Generated**: {}\n",
        report.generated_at.to_rfc3339()
    ));
    md.push_str(&format!("- **Pages**: {}\n", report.total_pages()));
    md.push_str(&format!(
        "- **JavaScript-dependent pages**: {}\n\n",
        report.js_dependent_pages()
    ));

    md.push_str("## Tables\n\n");
    md.push_str("| Table | Rows |\n");
    md.push_str("|-------|------|\n");
    for (table, rows) in &report.table_counts {
        md.push_str(&format!("| {} | {} |\n", cell(table), rows));
    }
    md.push('\n');

    if !report.domain_js.is_empty() {
        md.push_str("## JavaScript Dependency by Domain\n\n");
        md.push_str("| Domain | Pages | JS Pages | JS % | Reasons |\n");
        md.push_str("|--------|-------|----------|------|---------|\n");
        for stat in &report.domain_js {
            md.push_str(&format!(
                "| {} | {} | {} | {:.2} | {} |\n",
                cell(&stat.domain),
                stat.total_pages,
                stat.js_dependent_pages,
                stat.js_percentage,
                cell(stat.reasons.as_deref().unwrap_or("")),
            ));
        }
        md.push('\n');
    }

    if !report.top_pages.is_empty() {
        md.push_str("## Top Pages by Links\n\n");
        md.push_str("| # | URL | Domain | Links | JS |\n");
        md.push_str("|---|-----|--------|-------|----|\n");
        for (i, page) in report.top_pages.iter().enumerate() {
            md.push_str(&format!(
                "| {} | {} | {} | {} | {} |\n",
                i + 1,
                cell(&page.url),
                cell(&page.domain),
                page.link_count,
                if page.is_javascript_dependent { "yes" } else { "no" }
            ));
        }
        md.push('\n');
    }

    if !report.domain_sizes.is_empty() {
        md.push_str("## Size by Domain\n\n");
        md.push_str("| Domain | Pages | Total Bytes | Average Bytes |\n");
        md.push_str("|--------|-------|-------------|---------------|\n");
        for stat in &report.domain_sizes {
            md.push_str(&format!(
                "| {} | {} | {} | {:.0} |\n",
                cell(&stat.domain),
                stat.pages,
                stat.total_size,
                stat.average_size
            ));
        }
        md.push('\n');
    }

    md.push_str("## Integrity\n\n");
    if report.structure.ok {
        md.push_str("- Structural check: ok\n");
    } else {
        md.push_str("- Structural check: **failed**\n");
        for message in &report.structure.messages {
            md.push_str(&format!("  - {}\n", message));
        }
    }
    if report.foreign_keys.ok() {
        md.push_str("- Foreign keys: ok\n");
    } else {
        md.push_str(&format!(
            "- Foreign keys: **{} violation(s)**\n",
            report.foreign_keys.violations.len()
        ));
        for violation in &report.foreign_keys.violations {
            md.push_str(&format!("  - {}\n", violation));
        }
    }

    if !report.notes.is_empty() {
        md.push_str("\n## Notes\n\n");
        for note in &report.notes {
            md.push_str(&format!("- {}\n", note));
        }
    }

    md
}

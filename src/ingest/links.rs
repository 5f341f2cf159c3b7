//! Anchor link extraction
//!
//! Pulls `href` targets out of `<a>` tags in raw markup. Values are stored
//! as written (relative links stay relative); only targets that never lead
//! to another document are dropped.

use regex::Regex;
use std::sync::OnceLock;

fn anchor_href() -> &'static Regex {
    static ANCHOR: OnceLock<Regex> = OnceLock::new();
    ANCHOR.get_or_init(|| {
        Regex::new(r#"(?i)<a\s+(?:[^>]*?\s)?href\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#)
            .expect("anchor pattern is valid")
    })
}

/// Returns true for hrefs that do not point at another document
fn is_excluded(href: &str) -> bool {
    href.is_empty()
        || href.starts_with('#')
        || href == "/"
        || href.to_ascii_lowercase().starts_with("javascript:")
}

/// Extracts anchor targets from markup, in document order
///
/// Duplicates are kept. At most `cap` links are returned.
///
/// # Example
///
/// ```
/// use crawldb::extract_links;
///
/// let html = r##"<a href="/x">x</a><a href="#top">top</a><a href='/'>home</a>"##;
/// assert_eq!(extract_links(html, 1000), vec!["/x".to_string()]);
/// ```
pub fn extract_links(html: &str, cap: usize) -> Vec<String> {
    anchor_href()
        .captures_iter(html)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3)))
        .map(|m| m.as_str().trim())
        .filter(|href| !is_excluded(href))
        .map(str::to_string)
        .take(cap)
        .collect()
}

/// Links encoded for the `extracted_links` column
pub fn links_json(links: &[String]) -> String {
    serde_json::to_string(links).unwrap_or_else(|_| "[]".to_string())
}

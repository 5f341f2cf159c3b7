//! Record parser for JSONL crawl output
//!
//! Each input line is one JSON object describing a fetched page. This
//! module turns a line into a normalized [`PageInput`], filling defaults for
//! optional fields, or reports why the line cannot be used.

use crate::url::domain_of;
use crate::UrlError;
use regex::Regex;
use serde::Deserialize;
use serde_json::Number;
use std::sync::OnceLock;
use thiserror::Error;

/// Why an input line was skipped
///
/// These never abort a batch; the ingestion driver logs and counts them.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("line is not valid UTF-8")]
    InvalidUtf8,

    #[error("invalid JSON record: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("record has no url")]
    MissingUrl,

    #[error("record has neither `html` nor `body`")]
    MissingMarkup,

    #[error("record url is unusable: {0}")]
    InvalidUrl(#[from] UrlError),
}

/// Raw record as it appears on one input line
#[derive(Debug, Deserialize)]
struct RawRecord {
    url: Option<String>,
    html: Option<String>,
    body: Option<String>,
    status: Option<Number>,
    status_code: Option<Number>,
    content_type: Option<String>,
    size: Option<Number>,
    title: Option<String>,
    timestamp: Option<i64>,
    fetched_at: Option<i64>,
}

/// Values used for fields a record leaves out
#[derive(Debug, Clone)]
pub struct RecordDefaults {
    pub status: u16,
    pub content_type: String,
    /// Unix seconds used when a record carries no fetch timestamp
    pub fetched_at: i64,
}

/// A normalized page ready for classification and writing
#[derive(Debug, Clone, PartialEq)]
pub struct PageInput {
    pub url: String,
    pub domain: String,
    pub status: u16,
    pub content_type: String,
    pub title: Option<String>,
    pub size: u64,
    pub html: String,
    pub fetched_at: i64,
}

/// Reads a JSON number as an integer of type `T`
///
/// Fractions and values outside `T` (or outside `i64`) give `None`, so the
/// caller falls back to its default instead of rejecting the record.
fn integer<T: TryFrom<i64>>(value: Option<&Number>) -> Option<T> {
    value?.as_i64().and_then(|v| T::try_from(v).ok())
}

/// Parses one JSONL line into a normalized page
///
/// A `status` or `size` that is not an integer in range is treated as
/// absent.
///
/// # Arguments
///
/// * `line` - One input line, already trimmed
/// * `defaults` - Fallback values for optional fields
///
/// # Returns
///
/// * `Ok(PageInput)` - The normalized page with its derived domain
/// * `Err(RecordError)` - The line must be skipped
///
/// # Example
///
/// ```
/// use crawldb::ingest::{parse_record, RecordDefaults};
///
/// let defaults = RecordDefaults {
///     status: 200,
///     content_type: "text/html; charset=utf-8".to_string(),
///     fetched_at: 0,
/// };
/// let page = parse_record(r#"{"url":"https://a.test/","body":"<p>hi</p>"}"#, &defaults).unwrap();
/// assert_eq!(page.domain, "a.test");
/// assert_eq!(page.size, 9);
/// ```
pub fn parse_record(line: &str, defaults: &RecordDefaults) -> Result<PageInput, RecordError> {
    let raw: RawRecord = serde_json::from_str(line)?;

    let url = raw
        .url
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .ok_or(RecordError::MissingUrl)?;
    let html = raw.html.or(raw.body).ok_or(RecordError::MissingMarkup)?;
    let domain = domain_of(&url)?;

    let title = raw
        .title
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .or_else(|| extract_title(&html));

    Ok(PageInput {
        status: integer(raw.status.as_ref())
            .or_else(|| integer(raw.status_code.as_ref()))
            .unwrap_or(defaults.status),
        content_type: raw
            .content_type
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| defaults.content_type.clone()),
        size: integer(raw.size.as_ref()).unwrap_or(html.len() as u64),
        fetched_at: raw.timestamp.or(raw.fetched_at).unwrap_or(defaults.fetched_at),
        url,
        domain,
        title,
        html,
    })
}

/// Extracts the text of the first `<title>` element
pub fn extract_title(html: &str) -> Option<String> {
    static TITLE: OnceLock<Regex> = OnceLock::new();
    let re = TITLE.get_or_init(|| {
        Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("title pattern is valid")
    });

    re.captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|t| !t.is_empty())
}

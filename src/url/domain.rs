use crate::{UrlError, UrlResult};
use url::Url;

/// Extracts the domain from a parsed URL
///
/// This function retrieves the host portion of a URL and converts it to lowercase.
/// If the URL has no host (e.g. `mailto:` or `data:` URLs), it returns None.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use crawldb::url::extract_domain;
///
/// let url = Url::parse("https://EXAMPLE.COM/path").unwrap();
/// assert_eq!(extract_domain(&url), Some("example.com".to_string()));
/// ```
pub fn extract_domain(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}

/// Parses a raw page URL and returns its domain
///
/// # Arguments
///
/// * `raw` - The URL as it appeared in the input record
///
/// # Returns
///
/// * `Ok(String)` - The lowercase host component
/// * `Err(UrlError)` - The URL does not parse or has no host
///
/// # Examples
///
/// ```
/// use crawldb::url::domain_of;
///
/// assert_eq!(domain_of("https://a.test/").unwrap(), "a.test");
/// assert!(domain_of("not a url").is_err());
/// ```
pub fn domain_of(raw: &str) -> UrlResult<String> {
    let url = Url::parse(raw.trim()).map_err(|e| UrlError::Parse(format!("{}: {}", raw, e)))?;
    extract_domain(&url).ok_or_else(|| UrlError::MissingHost(raw.to_string()))
}

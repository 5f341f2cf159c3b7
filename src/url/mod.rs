//! URL handling for ingested pages
//!
//! Pages are grouped by domain in the store; this module derives that
//! domain from a page URL.

mod domain;

pub use domain::{domain_of, extract_domain};

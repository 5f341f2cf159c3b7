//! Output module for store reports
//!
//! This module handles:
//! - Gathering the read-only `analyze` report from a store
//! - Printing it to stdout
//! - Exporting it as markdown

mod markdown;
pub mod stats;

pub use markdown::{format_markdown_report, write_markdown_report};
pub use stats::{load_analysis, print_analysis, AnalysisReport};

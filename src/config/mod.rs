//! Configuration module for crawldb
//!
//! This module handles loading, parsing, and validating the optional TOML
//! configuration file. Every field has a default, so a missing file yields
//! a usable configuration.
//!
//! # Example
//!
//! ```no_run
//! use crawldb::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("crawldb.toml")).unwrap();
//! println!("Link cap: {}", config.ingest.link_cap);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{AnalyzeConfig, Config, IngestConfig, StoreConfig};

// Re-export parser functions
pub use parser::{load_config, load_config_or_default};

use crate::config::types::{AnalyzeConfig, Config, IngestConfig, StoreConfig};
use crate::ConfigError;

/// Upper bound on the configurable link cap
const MAX_LINK_CAP: usize = 100_000;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_store_config(&config.store)?;
    validate_ingest_config(&config.ingest)?;
    validate_analyze_config(&config.analyze)?;
    Ok(())
}

/// Validates store configuration
fn validate_store_config(config: &StoreConfig) -> Result<(), ConfigError> {
    if config.database_path.trim().is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }

    if let Some(dir) = &config.backup_dir {
        if dir.trim().is_empty() {
            return Err(ConfigError::Validation(
                "backup-dir cannot be empty when set".to_string(),
            ));
        }
    }

    Ok(())
}

/// Validates ingestion configuration
fn validate_ingest_config(config: &IngestConfig) -> Result<(), ConfigError> {
    if config.link_cap < 1 || config.link_cap > MAX_LINK_CAP {
        return Err(ConfigError::Validation(format!(
            "link-cap must be between 1 and {}, got {}",
            MAX_LINK_CAP, config.link_cap
        )));
    }

    if !(100..=599).contains(&config.default_status) {
        return Err(ConfigError::Validation(format!(
            "default-status must be a valid HTTP status (100-599), got {}",
            config.default_status
        )));
    }

    if config.default_content_type.trim().is_empty() {
        return Err(ConfigError::Validation(
            "default-content-type cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates analyze configuration
fn validate_analyze_config(config: &AnalyzeConfig) -> Result<(), ConfigError> {
    if config.top_pages < 1 || config.top_pages > 1000 {
        return Err(ConfigError::Validation(format!(
            "top-pages must be between 1 and 1000, got {}",
            config.top_pages
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_link_cap_too_large() {
        let mut config = Config::default();
        config.ingest.link_cap = MAX_LINK_CAP + 1;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_invalid_default_status() {
        let mut config = Config::default();
        config.ingest.default_status = 42;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_empty_content_type() {
        let mut config = Config::default();
        config.ingest.default_content_type = "  ".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_empty_database_path() {
        let mut config = Config::default();
        config.store.database_path = String::new();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_empty_backup_dir() {
        let mut config = Config::default();
        config.store.backup_dir = Some(String::new());
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_top_pages_zero() {
        let mut config = Config::default();
        config.analyze.top_pages = 0;
        assert!(validate(&config).is_err());
    }
}

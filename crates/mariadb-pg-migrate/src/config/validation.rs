//! Configuration validation.

use super::Config;
use crate::core::identifier::validate_identifier;
use crate::drivers::common::SslMode;
use crate::error::{MigrateError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    if config.sources.is_empty() {
        return Err(MigrateError::Config(
            "at least one source database is required".into(),
        ));
    }

    // Source validation
    for (name, source) in &config.sources {
        if source.host.is_empty() {
            return Err(MigrateError::Config(format!("sources.{}.host is required", name)));
        }
        if source.database.is_empty() {
            return Err(MigrateError::Config(format!(
                "sources.{}.database is required",
                name
            )));
        }
        if source.user.is_empty() {
            return Err(MigrateError::Config(format!("sources.{}.user is required", name)));
        }
        validate_identifier(&source.sink_schema())?;
        for table in &source.include_tables {
            validate_identifier(table)?;
        }
    }

    // Target validation
    if config.target.host.is_empty() {
        return Err(MigrateError::Config("target.host is required".into()));
    }
    if config.target.database.is_empty() {
        return Err(MigrateError::Config("target.database is required".into()));
    }
    if config.target.user.is_empty() {
        return Err(MigrateError::Config("target.user is required".into()));
    }
    SslMode::parse(&config.target.ssl_mode)?;

    // Migration config validation - only check if explicitly set
    let migration = &config.migration;
    if let Some(0) = migration.table_workers {
        return Err(MigrateError::Config(
            "migration.table_workers must be at least 1".into(),
        ));
    }
    if let Some(0) = migration.chunk_workers {
        return Err(MigrateError::Config(
            "migration.chunk_workers must be at least 1".into(),
        ));
    }
    if let Some(0) = migration.batch_size {
        return Err(MigrateError::Config(
            "migration.batch_size must be at least 1".into(),
        ));
    }
    if matches!(migration.large_table_threshold, Some(t) if t < 1) {
        return Err(MigrateError::Config(
            "migration.large_table_threshold must be at least 1".into(),
        ));
    }
    if matches!(migration.fast_load_threshold, Some(t) if t < 0) {
        return Err(MigrateError::Config(
            "migration.fast_load_threshold cannot be negative".into(),
        ));
    }
    if !(0.0..=100.0).contains(&migration.row_count_tolerance_pct) {
        return Err(MigrateError::Config(
            "migration.row_count_tolerance_pct must be between 0 and 100".into(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MigrationConfig, SourceConfig, TargetConfig};
    use std::collections::BTreeMap;

    fn valid_config() -> Config {
        let mut sources = BTreeMap::new();
        sources.insert(
            "live".to_string(),
            SourceConfig {
                host: "localhost".to_string(),
                port: 3306,
                database: "xchangelive".to_string(),
                user: "root".to_string(),
                password: "password".to_string(),
                schema: None,
                table_pattern: None,
                include_tables: vec!["T_CARRIER".to_string()],
            },
        );
        Config {
            sources,
            target: TargetConfig {
                host: "localhost".to_string(),
                port: 5432,
                database: "target_db".to_string(),
                user: "postgres".to_string(),
                password: "password".to_string(),
                ssl_mode: "disable".to_string(),
            },
            migration: MigrationConfig::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        let config = valid_config();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_no_sources() {
        let mut config = valid_config();
        config.sources.clear();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_missing_source_host() {
        let mut config = valid_config();
        config.sources.get_mut("live").unwrap().host = "".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_missing_target_user() {
        let mut config = valid_config();
        config.target.user = "".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_invalid_ssl_mode() {
        let mut config = valid_config();
        config.target.ssl_mode = "sometimes".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = valid_config();
        config.migration.chunk_workers = Some(0);
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let mut config = valid_config();
        config.migration.batch_size = Some(0);
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_tolerance_out_of_range() {
        let mut config = valid_config();
        config.migration.row_count_tolerance_pct = 150.0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_table_name_with_null_byte_rejected() {
        let mut config = valid_config();
        config
            .sources
            .get_mut("live")
            .unwrap()
            .include_tables
            .push("bad\0name".to_string());
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_source_config_debug_redacts_password() {
        let mut config = valid_config();
        config.sources.get_mut("live").unwrap().password =
            "super_secret_password_123".to_string();
        let debug_output = format!("{:?}", config.sources["live"]);
        assert!(
            debug_output.contains("[REDACTED]"),
            "Debug output should contain [REDACTED]"
        );
        assert!(
            !debug_output.contains("super_secret_password_123"),
            "Debug output should not contain actual password value"
        );
    }

    #[test]
    fn test_target_config_debug_redacts_password() {
        let mut config = valid_config();
        config.target.password = "super_secret_password_456".to_string();
        let debug_output = format!("{:?}", config.target);
        assert!(
            debug_output.contains("[REDACTED]"),
            "Debug output should contain [REDACTED]"
        );
        assert!(
            !debug_output.contains("super_secret_password_456"),
            "Debug output should not contain actual password value"
        );
    }
}

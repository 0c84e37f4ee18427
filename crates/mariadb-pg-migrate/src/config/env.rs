//! Environment-variable configuration.
//!
//! A logical source named `live` reads `LIVE_HOST`, `LIVE_PORT`, `LIVE_USER`,
//! `LIVE_PASS` and `LIVE_DB`, plus the optional `LIVE_SCHEMA`, `LIVE_TABLES`
//! (comma-separated) and `LIVE_TABLE_PATTERN`. The sink reads `PG_HOST`,
//! `PG_PORT`, `PG_USER`, `PG_PASS`, `PG_DB` and `PG_SSLMODE`. Tuning comes
//! from the `MIGRATION_*` variables.

use std::collections::BTreeMap;
use std::str::FromStr;

use super::{Config, MigrationConfig, SourceConfig, TargetConfig};
use crate::error::{MigrateError, Result};

impl Config {
    /// Build a configuration for one logical source from the process environment.
    pub fn from_env(source_name: &str) -> Result<Self> {
        Self::from_lookup(source_name, |key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(source_name: &str, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup: &lookup };
        let prefix = source_name.to_uppercase();
        let key = |suffix: &str| format!("{}_{}", prefix, suffix);

        let source = SourceConfig {
            host: vars.required(&key("HOST"))?,
            port: vars.parsed(&key("PORT"))?.unwrap_or(3306),
            database: vars.required(&key("DB"))?,
            user: vars.required(&key("USER"))?,
            password: vars.optional(&key("PASS")).unwrap_or_default(),
            schema: vars.optional(&key("SCHEMA")),
            table_pattern: vars.optional(&key("TABLE_PATTERN")),
            include_tables: vars
                .optional(&key("TABLES"))
                .map(|list| split_list(&list))
                .unwrap_or_default(),
        };

        let target = TargetConfig {
            host: vars.required("PG_HOST")?,
            port: vars.parsed("PG_PORT")?.unwrap_or(5432),
            database: vars.required("PG_DB")?,
            user: vars.required("PG_USER")?,
            password: vars.optional("PG_PASS").unwrap_or_default(),
            ssl_mode: vars
                .optional("PG_SSLMODE")
                .unwrap_or_else(|| "require".to_string()),
        };

        let migration = MigrationConfig {
            table_workers: vars.parsed("MIGRATION_WORKERS")?,
            chunk_workers: vars.parsed("MIGRATION_CHUNK_WORKERS")?,
            batch_size: vars.parsed("MIGRATION_BATCH_SIZE")?,
            large_table_threshold: vars.parsed("MIGRATION_LARGE_TABLE_THRESHOLD")?,
            fast_load_threshold: vars.parsed("MIGRATION_FAST_LOAD_THRESHOLD")?,
            ..MigrationConfig::default()
        };

        let mut sources = BTreeMap::new();
        sources.insert(source_name.to_string(), source);

        let config = Config {
            sources,
            target,
            migration,
        };
        config.validate()?;
        Ok(config)
    }
}

struct Vars<'a, F> {
    lookup: &'a F,
}

impl<F> Vars<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, key: &str) -> Result<String> {
        self.optional(key)
            .ok_or_else(|| MigrateError::Config(format!("Environment variable {} not set", key)))
    }

    fn parsed<T: FromStr>(&self, key: &str) -> Result<Option<T>> {
        match self.optional(key) {
            None => Ok(None),
            Some(raw) => raw.parse::<T>().map(Some).map_err(|_| {
                MigrateError::Config(format!("Environment variable {} has invalid value '{}'", key, raw))
            }),
        }
    }
}

fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

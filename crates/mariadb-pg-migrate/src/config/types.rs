//! Configuration type definitions with auto-tuning based on system resources.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sysinfo::System;
use tracing::info;

use crate::error::{MigrateError, Result};

/// System resource information for auto-tuning.
#[derive(Debug, Clone)]
pub struct SystemResources {
    /// Total RAM in bytes.
    pub total_memory_bytes: u64,
    /// Total RAM in GB.
    pub total_memory_gb: f64,
    /// Number of CPU cores.
    pub cpu_cores: usize,
}

impl SystemResources {
    /// Detect system resources.
    pub fn detect() -> Self {
        let mut sys = System::new_all();
        sys.refresh_all();

        let total_memory_bytes = sys.total_memory();
        let total_memory_gb = total_memory_bytes as f64 / (1024.0 * 1024.0 * 1024.0);
        let cpu_cores = sys.cpus().len();

        Self {
            total_memory_bytes,
            total_memory_gb,
            cpu_cores,
        }
    }

    /// Log detected system resources.
    pub fn log(&self) {
        info!(
            "System resources: {:.1} GB RAM, {} CPU cores",
            self.total_memory_gb, self.cpu_cores
        );
    }
}

/// Root configuration structure.
///
/// Built once at startup and shared read-only (behind an `Arc`) by every
/// worker; nothing mutates it after the run starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Logical source databases keyed by name (e.g. "live", "trading").
    pub sources: BTreeMap<String, SourceConfig>,

    /// Sink database configuration (PostgreSQL).
    pub target: TargetConfig,

    /// Migration behavior configuration.
    #[serde(default)]
    pub migration: MigrationConfig,
}

impl Config {
    /// Apply auto-tuned defaults based on system resources.
    /// Only fills in values that weren't explicitly set.
    pub fn with_auto_tuning(mut self) -> Self {
        let resources = SystemResources::detect();
        resources.log();
        self.migration = self.migration.with_auto_tuning(&resources);
        self
    }

    /// Look up a logical source by name.
    pub fn source(&self, name: &str) -> Result<&SourceConfig> {
        self.sources.get(name).ok_or_else(|| {
            let known: Vec<&str> = self.sources.keys().map(String::as_str).collect();
            MigrateError::Config(format!(
                "unknown source database '{}' (configured: {})",
                name,
                if known.is_empty() {
                    "none".to_string()
                } else {
                    known.join(", ")
                }
            ))
        })
    }
}

/// Source database (MariaDB/MySQL) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 3306).
    #[serde(default = "default_mysql_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Sink schema for this source. Defaults to the lowercased database name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    /// LIKE pattern used to discover tables (e.g. "T_%").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_pattern: Option<String>,

    /// Explicit table list. Takes precedence over `table_pattern`.
    #[serde(default)]
    pub include_tables: Vec<String>,
}

impl SourceConfig {
    /// Schema the tables of this source land in on the sink.
    pub fn sink_schema(&self) -> String {
        self.schema
            .clone()
            .unwrap_or_else(|| self.database.to_lowercase())
    }
}

impl fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("table_pattern", &self.table_pattern)
            .field("include_tables", &self.include_tables)
            .finish()
    }
}

/// Sink database (PostgreSQL) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// SSL mode (default: "require").
    #[serde(default = "default_require")]
    pub ssl_mode: String,
}

impl fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

/// Migration behavior configuration.
/// Performance-related fields use Option<T> to distinguish between
/// "not set" (use auto-tuned default) and "explicitly set" (use provided value).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Tables migrated concurrently. Auto-tuned based on CPU cores if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_workers: Option<usize>,

    /// Chunks of large tables migrated concurrently. Auto-tuned if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_workers: Option<usize>,

    /// Rows per COPY batch. Auto-tuned based on RAM if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,

    /// Row count at or above which a table is split into yearly chunks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub large_table_threshold: Option<i64>,

    /// Row count at or above which a table is created UNLOGGED without constraints.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fast_load_threshold: Option<i64>,

    /// Create foreign keys after load (default: false).
    #[serde(default)]
    pub create_foreign_keys: bool,

    /// Drop and recreate the sink schema before loading (default: false).
    #[serde(default)]
    pub reset_schema: bool,

    /// Allowed source/sink row count drift in percent for `validate`.
    #[serde(default)]
    pub row_count_tolerance_pct: f64,

    /// Source connect timeout in seconds (default: 300).
    #[serde(default = "default_connect_timeout")]
    pub source_connect_timeout_secs: u64,

    /// Source session read/write timeout in seconds (default: 3600).
    #[serde(default = "default_query_timeout")]
    pub source_query_timeout_secs: u64,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            table_workers: None,
            chunk_workers: None,
            batch_size: None,
            large_table_threshold: None,
            fast_load_threshold: None,
            create_foreign_keys: false,
            reset_schema: false,
            row_count_tolerance_pct: 0.0,
            source_connect_timeout_secs: default_connect_timeout(),
            source_query_timeout_secs: default_query_timeout(),
        }
    }
}

impl MigrationConfig {
    /// Apply auto-tuned defaults based on system resources.
    /// Only fills in values that are None (not explicitly set).
    pub fn with_auto_tuning(mut self, resources: &SystemResources) -> Self {
        let ram_gb = resources.total_memory_gb;
        let cores = resources.cpu_cores;

        // One table already saturates a source connection, keep this small
        if self.table_workers.is_none() {
            self.table_workers = Some((cores / 4).clamp(2, 4));
        }

        // Chunks are disjoint, so scale with cores
        if self.chunk_workers.is_none() {
            self.chunk_workers = Some((cores / 2).clamp(2, 16));
        }

        // Base: 10K rows, +5K per 8GB of RAM, cap at 50K
        if self.batch_size.is_none() {
            let batch = 10_000 + ((ram_gb / 8.0) as usize * 5_000);
            self.batch_size = Some(batch.clamp(10_000, 50_000));
        }

        if self.large_table_threshold.is_none() {
            let threshold = ((ram_gb / 8.0) as i64 * 1_000_000).clamp(1_000_000, 10_000_000);
            self.large_table_threshold = Some(threshold);
        }

        info!(
            "Auto-tuned config: table_workers={}, chunk_workers={}, batch_size={}, \
             large_table_threshold={}, fast_load_threshold={}",
            self.get_table_workers(),
            self.get_chunk_workers(),
            self.get_batch_size(),
            self.get_large_table_threshold(),
            self.get_fast_load_threshold(),
        );

        self
    }

    // Accessor methods that return the effective value (with fallback defaults)
    // These are used when the config hasn't been auto-tuned yet

    pub fn get_table_workers(&self) -> usize {
        self.table_workers.unwrap_or(2)
    }

    pub fn get_chunk_workers(&self) -> usize {
        self.chunk_workers.unwrap_or(4)
    }

    pub fn get_batch_size(&self) -> usize {
        self.batch_size.unwrap_or(10_000)
    }

    pub fn get_large_table_threshold(&self) -> i64 {
        self.large_table_threshold.unwrap_or(1_000_000)
    }

    pub fn get_fast_load_threshold(&self) -> i64 {
        self.fast_load_threshold.unwrap_or(100_000)
    }

    /// Connections each side of the pool needs: one per table task, one per
    /// chunk task, and one for schema preparation.
    pub fn max_connections(&self) -> usize {
        self.get_table_workers() + self.get_chunk_workers() + 1
    }
}

// Default value functions for serde
fn default_mysql_port() -> u16 {
    3306
}

fn default_pg_port() -> u16 {
    5432
}

fn default_require() -> String {
    "require".to_string()
}

fn default_connect_timeout() -> u64 {
    300
}

fn default_query_timeout() -> u64 {
    3600
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resources(ram_gb: f64, cores: usize) -> SystemResources {
        SystemResources {
            total_memory_bytes: (ram_gb * 1024.0 * 1024.0 * 1024.0) as u64,
            total_memory_gb: ram_gb,
            cpu_cores: cores,
        }
    }

    #[test]
    fn test_auto_tuning_fills_unset_values() {
        let tuned = MigrationConfig::default().with_auto_tuning(&resources(32.0, 16));
        assert_eq!(tuned.table_workers, Some(4));
        assert_eq!(tuned.chunk_workers, Some(8));
        assert_eq!(tuned.batch_size, Some(30_000));
        assert_eq!(tuned.large_table_threshold, Some(4_000_000));
    }

    #[test]
    fn test_auto_tuning_keeps_explicit_values() {
        let config = MigrationConfig {
            table_workers: Some(1),
            batch_size: Some(500),
            ..Default::default()
        };
        let tuned = config.with_auto_tuning(&resources(64.0, 32));
        assert_eq!(tuned.table_workers, Some(1));
        assert_eq!(tuned.batch_size, Some(500));
    }

    #[test]
    fn test_auto_tuning_small_machine_floors() {
        let tuned = MigrationConfig::default().with_auto_tuning(&resources(2.0, 2));
        assert_eq!(tuned.table_workers, Some(2));
        assert_eq!(tuned.chunk_workers, Some(2));
        assert_eq!(tuned.batch_size, Some(10_000));
        assert_eq!(tuned.large_table_threshold, Some(1_000_000));
    }

    #[test]
    fn test_max_connections() {
        let config = MigrationConfig {
            table_workers: Some(2),
            chunk_workers: Some(6),
            ..Default::default()
        };
        assert_eq!(config.max_connections(), 9);
    }

    #[test]
    fn test_sink_schema_defaults_to_lowercased_database() {
        let source = SourceConfig {
            host: "db".into(),
            port: 3306,
            database: "XchangeLive".into(),
            user: "root".into(),
            password: String::new(),
            schema: None,
            table_pattern: None,
            include_tables: vec![],
        };
        assert_eq!(source.sink_schema(), "xchangelive");
    }
}

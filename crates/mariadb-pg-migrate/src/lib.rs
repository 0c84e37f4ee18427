//! # mariadb-pg-migrate
//!
//! Bulk MariaDB to PostgreSQL migration library.
//!
//! Each table is introspected from live source metadata, created on the sink,
//! streamed across with PostgreSQL COPY and then finalized with its primary
//! key and secondary indexes:
//!
//! - **Type mapping** from MariaDB column types to PostgreSQL types, with a
//!   recorded `text` fallback for anything unknown
//! - **Fast load** into UNLOGGED tables for large tables, switched back to
//!   logged after load
//! - **Year chunking** of large tables, loaded in parallel
//! - **Batch isolation**: a rejected COPY batch is recorded as a defect and
//!   the table keeps loading
//!
//! ## Example
//!
//! ```rust,no_run
//! use mariadb_pg_migrate::{Config, Orchestrator};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load("config.yaml")?.with_auto_tuning();
//!     let orchestrator = Orchestrator::new(config, "live").await?;
//!     let result = orchestrator.run(CancellationToken::new()).await?;
//!     println!("Migrated {} rows", result.rows_loaded);
//!     Ok(())
//! }
//! ```

pub mod chunk;
pub mod config;
pub mod core;
pub mod drivers;
pub mod error;
pub mod finalize;
pub mod introspect;
pub mod orchestrator;
pub mod provision;
pub mod transfer;
pub mod typemap;

// Re-exports for convenient access
pub use config::{Config, MigrationConfig, SourceConfig, TargetConfig};
pub use core::report::{
    Defect, HealthCheckResult, MigrationResult, TableResult, TableStatus, ValidationReport,
};
pub use core::schema::{Column, Table};
pub use core::traits::{ConnectionPair, ConnectionProvider, SourceReader, TargetWriter};
pub use drivers::PoolProvider;
pub use error::{MigrateError, Result};
pub use orchestrator::{Orchestrator, RunPlan, TablePhase};

//! Core types shared by the engine and the drivers.
//!
//! - [`schema`]: table, column, index and chunk metadata
//! - [`value`]: positional source rows
//! - [`traits`]: the source, sink and connection-provider seams
//! - [`identifier`]: identifier validation and quoting
//! - [`report`]: per-table and per-run results, defects

pub mod identifier;
pub mod report;
pub mod schema;
pub mod traits;
pub mod value;

pub use report::{
    ChunkResult, CountCheck, Defect, FinalizeStep, HealthCheckResult, MigrationResult,
    TableResult, TableStatus, TableValidation, ValidationReport,
};
pub use schema::{ChunkPredicate, ChunkSpec, Column, ForeignKey, Index, ProvisionMode, Table};
pub use traits::{
    ConnectionPair, ConnectionProvider, DescribeRow, ForeignKeyRow, IndexRow, PageQuery,
    SourceReader, TargetWriter, TypeMapping,
};
pub use value::{SourceRow, SourceValue};

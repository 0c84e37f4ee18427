//! Core traits at the driver seam.
//!
//! The engine never talks to a database directly. Every phase works through
//! these traits:
//!
//! - [`SourceReader`]: catalog queries and paged row reads on one MariaDB session
//! - [`TargetWriter`]: DDL and COPY on one PostgreSQL session
//! - [`ConnectionProvider`]: hands out one exclusive [`ConnectionPair`] per worker
//!
//! Methods take `&mut self`: a session is owned by exactly one worker and
//! its statements run strictly one after another.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::Result;

use super::schema::{Column, ForeignKey, Index, ProvisionMode, Table};
use super::value::SourceRow;

/// One row of `DESCRIBE <table>` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescribeRow {
    /// Column name.
    pub field: String,
    /// Full column type, e.g. `int(10) unsigned`.
    pub column_type: String,
    /// `YES` or `NO`.
    pub null: String,
    /// `PRI`, `UNI`, `MUL` or empty.
    pub key: String,
}

/// One row of `SHOW INDEX` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRow {
    pub index_name: String,
    pub non_unique: bool,
    pub column_name: String,
    /// 1-based position of the column within the index.
    pub seq_in_index: u32,
}

/// One column of a foreign key constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyRow {
    pub constraint_name: String,
    pub column_name: String,
    pub referenced_table: String,
    pub referenced_column: String,
    /// 1-based position of the column within the constraint.
    pub ordinal: u32,
}

/// A paged read of one table or chunk.
///
/// Built once per load unit and reused for every page.
#[derive(Debug, Clone)]
pub struct PageQuery {
    /// Source table name.
    pub table: String,
    /// Columns to read, in output order.
    pub columns: Vec<Column>,
    /// Optional WHERE predicate (chunk filter).
    pub filter: Option<String>,
    /// Optional ORDER BY list (primary key).
    pub order_by: Option<String>,
}

/// Read schema and data from a MariaDB database.
///
/// A reader is bound to one database; table names are unqualified.
#[async_trait]
pub trait SourceReader: Send {
    /// Round-trip a trivial statement.
    async fn ping(&mut self) -> Result<()>;

    /// List base tables, optionally filtered by a LIKE pattern.
    async fn list_tables(&mut self, pattern: Option<&str>) -> Result<Vec<String>>;

    /// Check whether a table exists.
    async fn table_exists(&mut self, table: &str) -> Result<bool>;

    /// Column descriptions in ordinal order.
    async fn describe_columns(&mut self, table: &str) -> Result<Vec<DescribeRow>>;

    /// Index rows, including the PRIMARY index.
    async fn list_indexes(&mut self, table: &str) -> Result<Vec<IndexRow>>;

    /// Foreign key rows.
    async fn list_foreign_keys(&mut self, table: &str) -> Result<Vec<ForeignKeyRow>>;

    /// Exact row count, optionally restricted by a predicate.
    async fn row_count(&mut self, table: &str, filter: Option<&str>) -> Result<i64>;

    /// Row counts grouped by `YEAR(column)`; `None` is the NULL-year group.
    async fn year_histogram(&mut self, table: &str, column: &str)
        -> Result<Vec<(Option<i32>, i64)>>;

    /// Read one page of rows.
    ///
    /// Each returned row has exactly one value per column of the query, in
    /// query column order.
    async fn fetch_page(
        &mut self,
        query: &PageQuery,
        offset: u64,
        limit: usize,
    ) -> Result<Vec<SourceRow>>;
}

/// Write schema and data to a PostgreSQL database.
#[async_trait]
pub trait TargetWriter: Send {
    /// Round-trip a trivial statement.
    async fn ping(&mut self) -> Result<()>;

    // ===== Schema Operations =====

    /// Create a schema if it doesn't exist.
    async fn create_schema(&mut self, schema: &str) -> Result<()>;

    /// Drop a schema with everything in it, recreate it and hand it to `owner`.
    async fn reset_schema(&mut self, schema: &str, owner: &str) -> Result<()>;

    /// Check if a table exists.
    async fn table_exists(&mut self, schema: &str, table: &str) -> Result<bool>;

    /// Column names of an existing table.
    async fn column_names(&mut self, schema: &str, table: &str) -> Result<Vec<String>>;

    /// Create a table for a source descriptor.
    async fn create_table(&mut self, schema: &str, table: &Table, mode: ProvisionMode)
        -> Result<()>;

    /// Add a nullable column to an existing table.
    async fn add_column(&mut self, schema: &str, table: &str, column: &Column) -> Result<()>;

    /// Drop a column if it exists.
    async fn drop_column(&mut self, schema: &str, table: &str, column: &str) -> Result<()>;

    // ===== Constraint Operations =====

    /// Convert an UNLOGGED table to logged.
    async fn set_logged(&mut self, schema: &str, table: &str) -> Result<()>;

    /// Mark a column NOT NULL. Fails if it holds a NULL.
    async fn set_not_null(&mut self, schema: &str, table: &str, column: &str) -> Result<()>;

    /// Check whether a primary key constraint already exists.
    async fn has_primary_key(&mut self, schema: &str, table: &str) -> Result<bool>;

    /// Add a primary key over sink column names.
    async fn add_primary_key(&mut self, schema: &str, table: &str, columns: &[String])
        -> Result<()>;

    /// Create an index if no index of that name exists.
    async fn create_index(&mut self, schema: &str, table: &str, index: &Index) -> Result<()>;

    /// Create a foreign key constraint.
    async fn create_foreign_key(&mut self, schema: &str, table: &str, fk: &ForeignKey)
        -> Result<()>;

    // ===== Data Operations =====

    /// Load one COPY text payload in its own transaction.
    ///
    /// Returns the number of rows the sink accepted. On error nothing from
    /// the payload is visible.
    async fn copy_in(
        &mut self,
        schema: &str,
        table: &str,
        columns: &[String],
        payload: Bytes,
    ) -> Result<u64>;

    /// Exact row count.
    async fn row_count(&mut self, schema: &str, table: &str) -> Result<i64>;
}

/// One exclusive source session plus one exclusive sink session.
///
/// Both go back to their pools when the pair is dropped.
pub struct ConnectionPair {
    pub source: Box<dyn SourceReader>,
    pub sink: Box<dyn TargetWriter>,
}

/// Hands out connection pairs to workers.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    /// Check out a source session, waiting for pool capacity if needed.
    async fn acquire_source(&self) -> Result<Box<dyn SourceReader>>;

    /// Check out a sink session, waiting for pool capacity if needed.
    async fn acquire_sink(&self) -> Result<Box<dyn TargetWriter>>;

    /// Check out a pair. The source session is taken first.
    async fn acquire(&self) -> Result<ConnectionPair> {
        let source = self.acquire_source().await?;
        let sink = self.acquire_sink().await?;
        Ok(ConnectionPair { source, sink })
    }
}

/// Result of mapping a source type to a PostgreSQL type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeMapping {
    /// The PostgreSQL type string.
    pub target_type: String,

    /// True when the source type was not recognized and the generic
    /// fallback was used.
    pub fallback: bool,
}

impl TypeMapping {
    /// A recognized mapping.
    pub fn exact(target_type: impl Into<String>) -> Self {
        Self {
            target_type: target_type.into(),
            fallback: false,
        }
    }

    /// The generic fallback mapping.
    pub fn fallback(target_type: impl Into<String>) -> Self {
        Self {
            target_type: target_type.into(),
            fallback: true,
        }
    }
}

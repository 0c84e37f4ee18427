//! Schema and metadata types for tables, columns, indexes and chunks.
//!
//! A [`Table`] is re-read from live source metadata on every run. Column
//! order is fixed here, at introspection time, and every later phase
//! (DDL, transcoding, COPY column list) iterates `Table::columns` in that
//! order.

use serde::{Deserialize, Serialize};

use super::identifier::{quote_mysql, truncate_pg_identifier};
use crate::error::Result;

/// Table metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    /// Source database name.
    pub database: String,

    /// Source table name, as reported by the catalog.
    pub name: String,

    /// Column definitions in ordinal order.
    pub columns: Vec<Column>,

    /// Primary key column names (source spelling), in column order.
    pub primary_key: Vec<String>,

    /// Secondary indexes.
    pub indexes: Vec<Index>,

    /// Foreign key constraints (collected, applied only on request).
    pub foreign_keys: Vec<ForeignKey>,

    /// Exact row count taken after discovery.
    pub row_count: i64,
}

impl Table {
    /// Get the fully qualified source table name.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.database, self.name)
    }

    /// Table name on the sink.
    pub fn sink_name(&self) -> String {
        self.name.to_lowercase()
    }

    /// Check if the table is at or above a row-count threshold.
    pub fn is_large(&self, threshold: i64) -> bool {
        self.row_count >= threshold
    }

    /// Check if the table has a primary key.
    pub fn has_pk(&self) -> bool {
        !self.primary_key.is_empty()
    }

    /// True when a primary key column holds dates.
    pub fn has_temporal_key(&self) -> bool {
        self.columns
            .iter()
            .any(|c| c.is_temporal() && self.primary_key.contains(&c.name))
    }

    /// Source column names in ordinal order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Sink column names in ordinal order.
    pub fn sink_column_names(&self) -> Vec<String> {
        self.columns.iter().map(Column::sink_name).collect()
    }

    /// Sink primary key column names.
    pub fn sink_primary_key(&self) -> Vec<String> {
        self.primary_key.iter().map(|c| c.to_lowercase()).collect()
    }

    /// Source ORDER BY clause that makes offset pagination stable.
    ///
    /// Returns `None` when the table has no primary key.
    pub fn pk_order_by(&self) -> Result<Option<String>> {
        if !self.has_pk() {
            return Ok(None);
        }
        let cols = self
            .primary_key
            .iter()
            .map(|c| quote_mysql(c))
            .collect::<Result<Vec<_>>>()?;
        Ok(Some(cols.join(", ")))
    }

    /// Pick the temporal column used to split the table into yearly chunks.
    ///
    /// A name containing "created" wins over any other column whose name
    /// contains "date" or "time". Columns that are not date/time typed are
    /// never chosen.
    pub fn find_chunk_column(&self) -> Option<&Column> {
        let temporal = || self.columns.iter().filter(|c| c.is_temporal());

        temporal()
            .find(|c| c.name.to_lowercase().contains("created"))
            .or_else(|| {
                temporal().find(|c| {
                    let lower = c.name.to_lowercase();
                    lower.contains("date") || lower.contains("time")
                })
            })
    }
}

/// Column metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    /// Column name (source spelling).
    pub name: String,

    /// Full source type string as reported by DESCRIBE (e.g. "int(10) unsigned").
    pub source_type: String,

    /// Whether the column allows NULL.
    pub is_nullable: bool,

    /// Whether the column is part of the primary key.
    pub is_primary: bool,

    /// Mapped PostgreSQL type.
    pub sink_type: String,

    /// Whether the sink type came from the generic fallback.
    #[serde(default)]
    pub type_fallback: bool,

    /// Ordinal position (0-based).
    pub ordinal: usize,
}

impl Column {
    /// Column name on the sink.
    pub fn sink_name(&self) -> String {
        self.name.to_lowercase()
    }

    /// Lowercased base type without parameters or modifiers.
    pub fn base_type(&self) -> String {
        base_type(&self.source_type)
    }

    /// Check if the column holds calendar dates.
    pub fn is_temporal(&self) -> bool {
        is_date_type(&self.base_type())
    }

    /// Check if the column is a narrow flag mapped to boolean.
    pub fn is_flag(&self) -> bool {
        self.sink_type == "boolean"
    }
}

/// Extract the lowercased base type of a source type string.
///
/// `"int(10) unsigned"` → `"int"`, `"DATETIME"` → `"datetime"`.
pub fn base_type(source_type: &str) -> String {
    let lower = source_type.trim().to_lowercase();
    lower
        .split(|c: char| c == '(' || c.is_whitespace())
        .next()
        .unwrap_or_default()
        .to_string()
}

/// Check if a data type is a date/time type suitable for chunking.
fn is_date_type(data_type: &str) -> bool {
    matches!(data_type, "date" | "datetime" | "timestamp")
}

/// Index metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Index {
    /// Index name.
    pub name: String,

    /// Indexed column names, ordered by position in the index.
    pub columns: Vec<String>,

    /// Whether the index is unique.
    pub is_unique: bool,
}

impl Index {
    /// Index name on the sink.
    ///
    /// PostgreSQL index names share a namespace per schema, so the table
    /// name is prefixed. Truncated to the 63-byte identifier limit.
    pub fn sink_name(&self, table: &str) -> String {
        truncate_pg_identifier(&format!("{}_{}", table, self.name).to_lowercase())
    }
}

/// Foreign key metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForeignKey {
    /// Constraint name.
    pub name: String,

    /// Source column names.
    pub columns: Vec<String>,

    /// Referenced table name.
    pub ref_table: String,

    /// Referenced column names.
    pub ref_columns: Vec<String>,
}

/// Row predicate of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkPredicate {
    /// Rows whose temporal column falls in this calendar year.
    Year(i32),
    /// Rows whose temporal column has no year (NULL or unparseable).
    YearIsNull,
}

/// A disjoint partition of a large table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkSpec {
    /// Source table name.
    pub table: String,

    /// Temporal column the predicate applies to.
    pub column: String,

    /// Which rows belong to this chunk.
    pub predicate: ChunkPredicate,

    /// Row count from the planning histogram.
    pub estimated_rows: i64,
}

impl ChunkSpec {
    /// Short label used in logs and results ("2021", "null-year").
    pub fn label(&self) -> String {
        match self.predicate {
            ChunkPredicate::Year(year) => year.to_string(),
            ChunkPredicate::YearIsNull => "null-year".to_string(),
        }
    }

    /// Source WHERE clause selecting exactly this chunk's rows.
    pub fn where_clause(&self) -> Result<String> {
        let col = quote_mysql(&self.column)?;
        Ok(match self.predicate {
            ChunkPredicate::Year(year) => format!("YEAR({}) = {}", col, year),
            ChunkPredicate::YearIsNull => format!("YEAR({}) IS NULL", col),
        })
    }
}

/// How a sink table is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionMode {
    /// Logged table with the primary key inline.
    Durable,
    /// UNLOGGED table without constraints; restored by the finalizer.
    FastLoad,
}

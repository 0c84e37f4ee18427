//! Source schema introspection.
//!
//! Builds a [`Table`] from live catalog reads. Nothing here writes to the
//! source, and nothing is cached between runs.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::core::report::Defect;
use crate::core::schema::{Column, ForeignKey, Index, Table};
use crate::core::traits::{ForeignKeyRow, IndexRow, SourceReader};
use crate::error::{MigrateError, Result};
use crate::typemap::map_type;

/// Name MariaDB gives the primary key index.
const PRIMARY_INDEX: &str = "PRIMARY";

/// A freshly introspected table plus the defects found on the way.
#[derive(Debug, Clone)]
pub struct Introspected {
    pub table: Table,
    pub defects: Vec<Defect>,
}

/// Reads table structure from the source catalog.
pub struct SchemaIntrospector;

impl SchemaIntrospector {
    /// Introspect one table.
    ///
    /// Fails with [`MigrateError::SchemaNotFound`] when the table is absent.
    /// `row_count` is left at zero; the orchestrator fills it in.
    pub async fn introspect(
        source: &mut dyn SourceReader,
        database: &str,
        table_name: &str,
    ) -> Result<Introspected> {
        if !source.table_exists(table_name).await? {
            return Err(MigrateError::source_table_missing(table_name));
        }

        let mut defects = Vec::new();
        let mut columns = Vec::new();
        let mut primary_key = Vec::new();

        for (ordinal, row) in source.describe_columns(table_name).await?.into_iter().enumerate() {
            let mapping = map_type(&row.column_type);
            let is_primary = row.key == "PRI";
            if mapping.fallback {
                defects.push(Defect::TypeMappingFallback {
                    column: row.field.clone(),
                    source_type: row.column_type.clone(),
                });
            }
            if is_primary {
                primary_key.push(row.field.clone());
            }
            columns.push(Column {
                name: row.field,
                source_type: row.column_type,
                is_nullable: row.null == "YES",
                is_primary,
                sink_type: mapping.target_type,
                type_fallback: mapping.fallback,
                ordinal,
            });
        }

        let indexes = group_indexes(source.list_indexes(table_name).await?);
        let foreign_keys = group_foreign_keys(source.list_foreign_keys(table_name).await?);

        debug!(
            "Introspected {}.{}: {} columns, pk={:?}, {} indexes, {} foreign keys",
            database,
            table_name,
            columns.len(),
            primary_key,
            indexes.len(),
            foreign_keys.len()
        );
        if primary_key.is_empty() {
            warn!("{}.{}: no primary key found", database, table_name);
        }

        Ok(Introspected {
            table: Table {
                database: database.to_string(),
                name: table_name.to_string(),
                columns,
                primary_key,
                indexes,
                foreign_keys,
                row_count: 0,
            },
            defects,
        })
    }
}

/// Group index rows by name, ordering columns by their sequence.
///
/// The PRIMARY index is dropped; the primary key comes from DESCRIBE.
/// Indexes keep the order in which their names first appear.
fn group_indexes(rows: Vec<IndexRow>) -> Vec<Index> {
    let mut order: Vec<String> = Vec::new();
    let mut grouped: BTreeMap<String, (bool, Vec<(u32, String)>)> = BTreeMap::new();

    for row in rows {
        if row.index_name == PRIMARY_INDEX {
            continue;
        }
        let entry = grouped.entry(row.index_name.clone()).or_insert_with(|| {
            order.push(row.index_name.clone());
            (!row.non_unique, Vec::new())
        });
        entry.1.push((row.seq_in_index, row.column_name));
    }

    order
        .into_iter()
        .filter_map(|name| {
            let (is_unique, mut cols) = grouped.remove(&name)?;
            cols.sort_by_key(|(seq, _)| *seq);
            Some(Index {
                name,
                columns: cols.into_iter().map(|(_, c)| c).collect(),
                is_unique,
            })
        })
        .collect()
}

/// Group foreign key rows by constraint name.
fn group_foreign_keys(rows: Vec<ForeignKeyRow>) -> Vec<ForeignKey> {
    let mut order: Vec<String> = Vec::new();
    let mut grouped: BTreeMap<String, (String, Vec<ForeignKeyRow>)> = BTreeMap::new();

    for row in rows {
        let entry = grouped
            .entry(row.constraint_name.clone())
            .or_insert_with(|| {
                order.push(row.constraint_name.clone());
                (row.referenced_table.clone(), Vec::new())
            });
        entry.1.push(row);
    }

    order
        .into_iter()
        .filter_map(|name| {
            let (ref_table, mut cols) = grouped.remove(&name)?;
            cols.sort_by_key(|r| r.ordinal);
            Some(ForeignKey {
                name,
                columns: cols.iter().map(|r| r.column_name.clone()).collect(),
                ref_table,
                ref_columns: cols.into_iter().map(|r| r.referenced_column).collect(),
            })
        })
        .collect()
}

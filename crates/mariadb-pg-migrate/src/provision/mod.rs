//! Sink table provisioning.

use tracing::{debug, info};

use crate::core::schema::{ProvisionMode, Table};
use crate::core::traits::TargetWriter;
use crate::error::Result;

/// Outcome of provisioning one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provisioned {
    /// Sink primary key columns as discovered on the source.
    pub pk_columns: Vec<String>,
    /// False when the table already existed.
    pub created: bool,
    /// Columns added to an existing table.
    pub added_columns: Vec<String>,
}

/// Creates sink tables.
pub struct TableProvisioner;

impl TableProvisioner {
    /// Choose the creation mode for a table.
    ///
    /// Small unchunked tables are created durable with their primary key
    /// inline. Everything else is loaded into an UNLOGGED table first, as is
    /// a table keyed on a date column: a zero date loads as NULL, which an
    /// inline key would reject with its whole batch.
    pub fn choose_mode(table: &Table, chunked: bool, fast_load_threshold: i64) -> ProvisionMode {
        if !chunked && table.row_count < fast_load_threshold && !table.has_temporal_key() {
            ProvisionMode::Durable
        } else {
            ProvisionMode::FastLoad
        }
    }

    /// Create the sink table unless it already exists.
    ///
    /// An existing table is never dropped or recreated. Source columns it is
    /// missing are added as nullable columns.
    pub async fn provision(
        sink: &mut dyn TargetWriter,
        schema: &str,
        table: &Table,
        mode: ProvisionMode,
    ) -> Result<Provisioned> {
        let sink_name = table.sink_name();
        let pk_columns = table.sink_primary_key();

        if sink.table_exists(schema, &sink_name).await? {
            let existing = sink.column_names(schema, &sink_name).await?;
            let mut added_columns = Vec::new();
            for column in &table.columns {
                let name = column.sink_name();
                if !existing.contains(&name) {
                    sink.add_column(schema, &sink_name, column).await?;
                    added_columns.push(name);
                }
            }
            if added_columns.is_empty() {
                debug!("{}.{} already exists, skipping creation", schema, sink_name);
            } else {
                info!(
                    "{}.{} already exists, added columns {:?}",
                    schema, sink_name, added_columns
                );
            }
            return Ok(Provisioned {
                pk_columns,
                created: false,
                added_columns,
            });
        }

        sink.create_table(schema, table, mode).await?;
        info!("Created {}.{} ({:?})", schema, sink_name, mode);

        Ok(Provisioned {
            pk_columns,
            created: true,
            added_columns: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_with_rows(rows: i64) -> Table {
        Table {
            database: "db".into(),
            name: "T".into(),
            columns: vec![],
            primary_key: vec![],
            indexes: vec![],
            foreign_keys: vec![],
            row_count: rows,
        }
    }

    #[test]
    fn test_choose_mode() {
        assert_eq!(
            TableProvisioner::choose_mode(&table_with_rows(10), false, 100_000),
            ProvisionMode::Durable
        );
        assert_eq!(
            TableProvisioner::choose_mode(&table_with_rows(100_000), false, 100_000),
            ProvisionMode::FastLoad
        );
        assert_eq!(
            TableProvisioner::choose_mode(&table_with_rows(10), true, 100_000),
            ProvisionMode::FastLoad
        );
    }
}

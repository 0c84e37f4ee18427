//! Post-load durability and constraints.
//!
//! Runs after every load unit of a table has finished. Steps run in a fixed
//! order and each one is isolated: a failure becomes a
//! [`Defect::ConstraintCreation`] and the next step still runs.

use tracing::{info, warn};

use crate::core::identifier::primary_key_name;
use crate::core::report::{Defect, FinalizeStep};
use crate::core::schema::Table;
use crate::core::traits::TargetWriter;
use crate::error::{MigrateError, Result};

/// Finalize switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct FinalizeOptions {
    pub create_foreign_keys: bool,
}

/// Restores durability and creates constraints on a loaded table.
pub struct ConstraintFinalizer;

impl ConstraintFinalizer {
    /// Finalize one table, returning the defects of failed steps.
    pub async fn finalize(
        sink: &mut dyn TargetWriter,
        schema: &str,
        table: &Table,
        options: FinalizeOptions,
    ) -> Vec<Defect> {
        let sink_table = table.sink_name();
        let mut defects = Vec::new();

        // 1. Durability
        let result = sink.set_logged(schema, &sink_table).await;
        record(&mut defects, FinalizeStep::SetLogged, &sink_table, result);

        // 2. NOT NULL on columns that were created nullable for the load.
        // Key columns get it from the primary key and dates stay nullable.
        for column in &table.columns {
            if column.is_nullable || column.is_temporal() || column.is_primary {
                continue;
            }
            let name = column.sink_name();
            let result = sink.set_not_null(schema, &sink_table, &name).await;
            record(&mut defects, FinalizeStep::NotNull, &name, result);
        }

        // 3-4. Primary key then secondary indexes
        if table.has_pk() {
            let pk_name = primary_key_name(&sink_table);
            let result = add_pk_if_missing(sink, schema, &sink_table, &table.sink_primary_key()).await;
            record(&mut defects, FinalizeStep::PrimaryKey, &pk_name, result);

            for index in &table.indexes {
                let result = sink.create_index(schema, &sink_table, index).await;
                record(
                    &mut defects,
                    FinalizeStep::Index,
                    &index.sink_name(&sink_table),
                    result,
                );
            }
        } else {
            warn!(
                "{}.{}: no primary key discovered, skipping primary key and {} indexes",
                schema,
                sink_table,
                table.indexes.len()
            );
            defects.push(Defect::MissingPrimaryKey);
        }

        // 5. Foreign keys, opt-in
        if options.create_foreign_keys {
            for fk in &table.foreign_keys {
                let result = sink.create_foreign_key(schema, &sink_table, fk).await;
                record(&mut defects, FinalizeStep::ForeignKey, &fk.name, result);
            }
        }

        let failed = defects
            .iter()
            .filter(|d| matches!(d, Defect::ConstraintCreation { .. }))
            .count();
        info!(
            "{}.{}: finalized ({} steps failed)",
            schema, sink_table, failed
        );
        defects
    }
}

async fn add_pk_if_missing(
    sink: &mut dyn TargetWriter,
    schema: &str,
    table: &str,
    columns: &[String],
) -> Result<()> {
    if sink.has_primary_key(schema, table).await? {
        return Ok(());
    }
    sink.add_primary_key(schema, table, columns).await
}

fn record(defects: &mut Vec<Defect>, step: FinalizeStep, name: &str, result: Result<()>) {
    if let Err(e) = result {
        let err = MigrateError::ConstraintCreation {
            object: format!("{} {}", step, name),
            message: e.to_string(),
        };
        warn!("{}", err);
        defects.push(Defect::ConstraintCreation {
            step,
            name: name.to_string(),
            message: e.to_string(),
        });
    }
}

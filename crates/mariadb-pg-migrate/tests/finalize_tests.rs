//! Constraint finalization order and fault isolation.

mod common;

use std::sync::Arc;

use common::{FakeSink, FakeSource, FakeTable};
use mariadb_pg_migrate::core::identifier::primary_key_name;
use mariadb_pg_migrate::core::report::{Defect, FinalizeStep};
use mariadb_pg_migrate::core::schema::{ProvisionMode, Table};
use mariadb_pg_migrate::core::traits::SourceReader;
use mariadb_pg_migrate::core::value::SourceValue;
use mariadb_pg_migrate::finalize::{ConstraintFinalizer, FinalizeOptions};
use mariadb_pg_migrate::introspect::SchemaIntrospector;
use mariadb_pg_migrate::provision::TableProvisioner;
use mariadb_pg_migrate::transfer::{BulkLoader, LoadUnit};

const SCHEMA: &str = "xchangelive";

fn rows(n: i64) -> Vec<Vec<SourceValue>> {
    (1..=n)
        .map(|id| {
            vec![
                SourceValue::Int(id),
                SourceValue::Int(id % 7),
                SourceValue::Text(format!("REF-{}", id)),
            ]
        })
        .collect()
}

fn carrier(with_pk: bool) -> FakeTable {
    FakeTable::new(&[
        ("ID", "int(11)", false, if with_pk { "PRI" } else { "" }),
        ("ZONE_ID", "int(11)", true, "MUL"),
        ("REF", "varchar(32)", true, "UNI"),
    ])
    .with_index("IDX_ZONE", false, &["ZONE_ID"])
    .with_index("UQ_REF", true, &["REF"])
    .with_foreign_key("FK_CARRIER_ZONE", "ZONE_ID", "T_ZONE")
    .with_rows(rows(50))
}

async fn loaded(fake: FakeTable, mode: ProvisionMode) -> (FakeSink, Table) {
    loaded_as("T_CARRIER", fake, mode).await
}

/// Discover, provision and load, leaving the table ready to finalize.
async fn loaded_as(name: &str, fake: FakeTable, mode: ProvisionMode) -> (FakeSink, Table) {
    let mut source = FakeSource::new(vec![(name, fake)]);
    let mut sink = FakeSink::new();
    let mut table = SchemaIntrospector::introspect(&mut source, "XchangeLive", name)
        .await
        .unwrap()
        .table;
    table.row_count = source.row_count(name, None).await.unwrap();
    TableProvisioner::provision(&mut sink, SCHEMA, &table, mode)
        .await
        .unwrap();
    BulkLoader::new(SCHEMA, 20)
        .load(
            &mut source,
            &mut sink,
            &LoadUnit::whole(Arc::new(table.clone())),
        )
        .await
        .unwrap();
    (sink, table)
}

fn position(events: &[String], event: &str) -> usize {
    events
        .iter()
        .position(|e| e == event)
        .unwrap_or_else(|| panic!("no {} in {:?}", event, events))
}

#[tokio::test]
async fn test_failing_index_does_not_block_pk_or_other_index() {
    let (mut sink, table) = loaded(carrier(true), ProvisionMode::FastLoad).await;
    sink.fail_index("t_carrier_idx_zone");

    let defects =
        ConstraintFinalizer::finalize(&mut sink, SCHEMA, &table, FinalizeOptions::default()).await;

    assert_eq!(defects.len(), 1);
    match &defects[0] {
        Defect::ConstraintCreation { step, name, .. } => {
            assert_eq!(*step, FinalizeStep::Index);
            assert_eq!(name, "t_carrier_idx_zone");
        }
        other => panic!("unexpected defect {:?}", other),
    }

    let sink_table = sink.table(SCHEMA, "t_carrier");
    assert!(!sink_table.unlogged);
    assert_eq!(sink_table.primary_key, Some(vec!["id".to_string()]));
    assert_eq!(sink_table.indexes.len(), 1);
    assert_eq!(sink_table.indexes[0].0, "t_carrier_uq_ref");
    assert!(sink_table.indexes[0].1);
    assert_eq!(sink_table.rows.len(), 50);
}

#[tokio::test]
async fn test_steps_run_in_order_after_load() {
    let (mut sink, table) = loaded(carrier(true), ProvisionMode::FastLoad).await;

    let defects =
        ConstraintFinalizer::finalize(&mut sink, SCHEMA, &table, FinalizeOptions::default()).await;
    assert!(defects.is_empty());

    let events = sink.events();
    let last_copy = events.iter().rposition(|e| e == "copy:t_carrier").unwrap();
    let logged = position(&events, "set_logged:t_carrier");
    let pk = position(&events, "add_primary_key:t_carrier");
    let first_index = position(&events, "create_index:t_carrier_idx_zone");
    let second_index = position(&events, "create_index:t_carrier_uq_ref");

    assert!(last_copy < logged);
    assert!(logged < pk);
    assert!(pk < first_index);
    assert!(first_index < second_index);
    // Foreign keys are opt-in
    assert!(!events.iter().any(|e| e.starts_with("create_foreign_key")));
}

#[tokio::test]
async fn test_durable_table_keeps_inline_pk() {
    let (mut sink, table) = loaded(carrier(true), ProvisionMode::Durable).await;

    let defects =
        ConstraintFinalizer::finalize(&mut sink, SCHEMA, &table, FinalizeOptions::default()).await;

    assert!(defects.is_empty());
    assert!(!sink
        .events()
        .iter()
        .any(|e| e.starts_with("add_primary_key")));
    assert_eq!(sink.table(SCHEMA, "t_carrier").indexes.len(), 2);
}

#[tokio::test]
async fn test_finalize_twice_is_harmless() {
    let (mut sink, table) = loaded(carrier(true), ProvisionMode::FastLoad).await;

    ConstraintFinalizer::finalize(&mut sink, SCHEMA, &table, FinalizeOptions::default()).await;
    let defects =
        ConstraintFinalizer::finalize(&mut sink, SCHEMA, &table, FinalizeOptions::default()).await;

    assert!(defects.is_empty());
    assert_eq!(sink.table(SCHEMA, "t_carrier").indexes.len(), 2);
}

#[tokio::test]
async fn test_missing_pk_skips_pk_and_indexes() {
    let (mut sink, table) = loaded(carrier(false), ProvisionMode::FastLoad).await;

    let defects =
        ConstraintFinalizer::finalize(&mut sink, SCHEMA, &table, FinalizeOptions::default()).await;

    assert_eq!(defects, vec![Defect::MissingPrimaryKey]);
    let sink_table = sink.table(SCHEMA, "t_carrier");
    assert!(!sink_table.unlogged);
    assert!(sink_table.primary_key.is_none());
    assert!(sink_table.indexes.is_empty());
    assert_eq!(sink_table.rows.len(), 50);
    // NOT NULL is restored even without a key
    assert!(sink_table.columns[sink_table.column_index("id")].not_null);
}

#[tokio::test]
async fn test_foreign_keys_when_enabled() {
    let (mut sink, table) = loaded(carrier(true), ProvisionMode::FastLoad).await;

    let defects = ConstraintFinalizer::finalize(
        &mut sink,
        SCHEMA,
        &table,
        FinalizeOptions {
            create_foreign_keys: true,
        },
    )
    .await;

    assert!(defects.is_empty());
    assert_eq!(
        sink.table(SCHEMA, "t_carrier").foreign_keys,
        vec!["FK_CARRIER_ZONE".to_string()]
    );
}

#[tokio::test]
async fn test_not_null_restored_after_load() {
    let fake = FakeTable::new(&[
        ("ID", "int(11)", false, "PRI"),
        ("STATUS", "varchar(8)", false, ""),
        ("SETTLED_ON", "date", false, ""),
        ("NOTE", "varchar(32)", true, ""),
    ])
    .with_rows(
        (1..=40i64)
            .map(|id| {
                vec![
                    SourceValue::Int(id),
                    SourceValue::Text("OPEN".into()),
                    SourceValue::Temporal("0000-00-00".into()),
                    SourceValue::Null,
                ]
            })
            .collect(),
    );
    let (mut sink, table) = loaded_as("T_SETTLEMENT", fake, ProvisionMode::FastLoad).await;

    let defects =
        ConstraintFinalizer::finalize(&mut sink, SCHEMA, &table, FinalizeOptions::default()).await;
    assert!(defects.is_empty());

    let sink_table = sink.table(SCHEMA, "t_settlement");
    let not_null: Vec<bool> = sink_table.columns.iter().map(|c| c.not_null).collect();
    // Dates stay nullable for their zero dates
    assert_eq!(not_null, vec![true, true, false, false]);

    let events = sink.events();
    let status = position(&events, "set_not_null:t_settlement.status");
    assert!(position(&events, "set_logged:t_settlement") < status);
    assert!(status < position(&events, "add_primary_key:t_settlement"));
    assert!(!events.iter().any(|e| e == "set_not_null:t_settlement.id"));
}

#[tokio::test]
async fn test_long_table_name_uses_truncated_pk_name() {
    let name = format!("T_CARRIER_{}", "X".repeat(50));
    let mut rows = rows(10);
    rows[3][0] = SourceValue::Null;
    let fake = FakeTable::new(&[
        ("ID", "int(11)", false, "PRI"),
        ("ZONE_ID", "int(11)", true, ""),
        ("REF", "varchar(32)", true, ""),
    ])
    .with_rows(rows);
    let (mut sink, table) = loaded_as(&name, fake, ProvisionMode::FastLoad).await;

    let defects =
        ConstraintFinalizer::finalize(&mut sink, SCHEMA, &table, FinalizeOptions::default()).await;

    assert_eq!(defects.len(), 1);
    match &defects[0] {
        Defect::ConstraintCreation { step, name: pk, .. } => {
            assert_eq!(*step, FinalizeStep::PrimaryKey);
            assert_eq!(pk, &primary_key_name(&name.to_lowercase()));
            assert_eq!(pk.len(), 63);
        }
        other => panic!("unexpected defect {:?}", other),
    }
}

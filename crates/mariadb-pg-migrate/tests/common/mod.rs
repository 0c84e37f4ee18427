//! In-memory source and sink used by the integration tests.
//!
//! The fake source answers catalog queries from hand-built descriptions and
//! evaluates the `YEAR(col)` chunk filters itself. The fake sink parses COPY
//! text back into values and rejects a whole payload when any field does not
//! fit its column type, the way a real COPY would.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{NaiveDate, NaiveDateTime};

use mariadb_pg_migrate::config::{Config, MigrationConfig, SourceConfig, TargetConfig};
use mariadb_pg_migrate::core::schema::{Column, ForeignKey, Index, ProvisionMode, Table};
use mariadb_pg_migrate::core::traits::{
    ConnectionProvider, DescribeRow, ForeignKeyRow, IndexRow, PageQuery, SourceReader,
    TargetWriter,
};
use mariadb_pg_migrate::core::value::{SourceRow, SourceValue};
use mariadb_pg_migrate::error::{MigrateError, Result};

// =============================================================================
// Source
// =============================================================================

/// One source table.
#[derive(Debug, Clone, Default)]
pub struct FakeTable {
    pub describe: Vec<DescribeRow>,
    pub indexes: Vec<IndexRow>,
    pub foreign_keys: Vec<ForeignKeyRow>,
    pub rows: Vec<SourceRow>,
}

impl FakeTable {
    /// Columns as `(name, type, nullable, key)`.
    pub fn new(columns: &[(&str, &str, bool, &str)]) -> Self {
        let describe = columns
            .iter()
            .map(|(name, ty, nullable, key)| DescribeRow {
                field: name.to_string(),
                column_type: ty.to_string(),
                null: if *nullable { "YES" } else { "NO" }.to_string(),
                key: key.to_string(),
            })
            .collect();
        Self {
            describe,
            ..Default::default()
        }
    }

    pub fn with_index(mut self, name: &str, unique: bool, columns: &[&str]) -> Self {
        for (i, column) in columns.iter().enumerate() {
            self.indexes.push(IndexRow {
                index_name: name.to_string(),
                non_unique: !unique,
                column_name: column.to_string(),
                seq_in_index: i as u32 + 1,
            });
        }
        self
    }

    pub fn with_foreign_key(mut self, name: &str, column: &str, ref_table: &str) -> Self {
        self.foreign_keys.push(ForeignKeyRow {
            constraint_name: name.to_string(),
            column_name: column.to_string(),
            referenced_table: ref_table.to_string(),
            referenced_column: "ID".to_string(),
            ordinal: 1,
        });
        self
    }

    pub fn with_rows(mut self, rows: Vec<Vec<SourceValue>>) -> Self {
        self.rows = rows.into_iter().map(SourceRow::new).collect();
        self
    }

    fn column_index(&self, name: &str) -> usize {
        self.describe
            .iter()
            .position(|d| d.field == name)
            .unwrap_or_else(|| panic!("unknown column {}", name))
    }

    fn filtered(&self, filter: Option<&str>) -> Vec<&SourceRow> {
        match filter {
            None => self.rows.iter().collect(),
            Some(filter) => {
                let (column, year) = parse_year_filter(filter);
                let idx = self.column_index(&column);
                self.rows
                    .iter()
                    .filter(|r| year_of(r.get(idx).unwrap_or(&SourceValue::Null)) == year)
                    .collect()
            }
        }
    }
}

/// Parse "YEAR(`col`) = 2021" or "YEAR(`col`) IS NULL".
fn parse_year_filter(filter: &str) -> (String, Option<i32>) {
    let start = filter.find('`').expect("quoted column") + 1;
    let end = start + filter[start..].find('`').expect("closing quote");
    let column = filter[start..end].to_string();
    if filter.ends_with("IS NULL") {
        (column, None)
    } else {
        let year = filter.rsplit("= ").next().unwrap().trim().parse().unwrap();
        (column, Some(year))
    }
}

/// What MariaDB's YEAR() returns: 0 for zero dates, NULL for NULL.
fn year_of(value: &SourceValue) -> Option<i32> {
    match value {
        SourceValue::Temporal(s) | SourceValue::Text(s) => s.get(0..4)?.parse().ok(),
        _ => None,
    }
}

/// Shared, read-only source database.
#[derive(Clone, Default)]
pub struct FakeSource {
    tables: Arc<BTreeMap<String, FakeTable>>,
    histogram_fails: bool,
    failing_filter: Option<String>,
    pub pages_fetched: Arc<AtomicUsize>,
}

impl FakeSource {
    pub fn new(tables: Vec<(&str, FakeTable)>) -> Self {
        Self {
            tables: Arc::new(
                tables
                    .into_iter()
                    .map(|(name, t)| (name.to_string(), t))
                    .collect(),
            ),
            histogram_fails: false,
            failing_filter: None,
            pages_fetched: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_failing_histogram(mut self) -> Self {
        self.histogram_fails = true;
        self
    }

    /// Page reads whose filter contains `fragment` fail.
    pub fn with_failing_filter(mut self, fragment: &str) -> Self {
        self.failing_filter = Some(fragment.to_string());
        self
    }

    fn table(&self, name: &str) -> Result<&FakeTable> {
        self.tables
            .get(name)
            .ok_or_else(|| MigrateError::source_table_missing(name))
    }
}

#[async_trait]
impl SourceReader for FakeSource {
    async fn ping(&mut self) -> Result<()> {
        Ok(())
    }

    async fn list_tables(&mut self, pattern: Option<&str>) -> Result<Vec<String>> {
        let prefix = pattern.map(|p| p.trim_end_matches('%').replace("\\_", "_"));
        Ok(self
            .tables
            .keys()
            .filter(|name| prefix.as_ref().map_or(true, |p| name.starts_with(p.as_str())))
            .cloned()
            .collect())
    }

    async fn table_exists(&mut self, table: &str) -> Result<bool> {
        Ok(self.tables.contains_key(table))
    }

    async fn describe_columns(&mut self, table: &str) -> Result<Vec<DescribeRow>> {
        Ok(self.table(table)?.describe.clone())
    }

    async fn list_indexes(&mut self, table: &str) -> Result<Vec<IndexRow>> {
        Ok(self.table(table)?.indexes.clone())
    }

    async fn list_foreign_keys(&mut self, table: &str) -> Result<Vec<ForeignKeyRow>> {
        Ok(self.table(table)?.foreign_keys.clone())
    }

    async fn row_count(&mut self, table: &str, filter: Option<&str>) -> Result<i64> {
        Ok(self.table(table)?.filtered(filter).len() as i64)
    }

    async fn year_histogram(
        &mut self,
        table: &str,
        column: &str,
    ) -> Result<Vec<(Option<i32>, i64)>> {
        if self.histogram_fails {
            return Err(MigrateError::transfer(table, "histogram query timed out"));
        }
        let t = self.table(table)?;
        let idx = t.column_index(column);
        let mut counts: BTreeMap<Option<i32>, i64> = BTreeMap::new();
        for row in &t.rows {
            *counts
                .entry(year_of(row.get(idx).unwrap_or(&SourceValue::Null)))
                .or_default() += 1;
        }
        Ok(counts.into_iter().collect())
    }

    async fn fetch_page(
        &mut self,
        query: &PageQuery,
        offset: u64,
        limit: usize,
    ) -> Result<Vec<SourceRow>> {
        self.pages_fetched.fetch_add(1, Ordering::SeqCst);
        if let (Some(fragment), Some(filter)) = (&self.failing_filter, &query.filter) {
            if filter.contains(fragment.as_str()) {
                return Err(MigrateError::transfer(&query.table, "Lost connection during query"));
            }
        }
        let t = self.table(&query.table)?;
        let projection: Vec<usize> = query
            .columns
            .iter()
            .map(|c| t.column_index(&c.name))
            .collect();
        Ok(t.filtered(query.filter.as_deref())
            .into_iter()
            .skip(offset as usize)
            .take(limit)
            .map(|row| {
                projection
                    .iter()
                    .map(|&i| row.get(i).cloned().unwrap_or(SourceValue::Null))
                    .collect::<Vec<_>>()
                    .into()
            })
            .collect())
    }
}

// =============================================================================
// Sink
// =============================================================================

#[derive(Debug, Clone)]
pub struct SinkColumn {
    pub name: String,
    pub sink_type: String,
    pub not_null: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SinkTable {
    pub columns: Vec<SinkColumn>,
    pub unlogged: bool,
    pub primary_key: Option<Vec<String>>,
    /// `(name, unique, columns)`
    pub indexes: Vec<(String, bool, Vec<String>)>,
    pub foreign_keys: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl SinkTable {
    pub fn column_index(&self, name: &str) -> usize {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .unwrap_or_else(|| panic!("unknown sink column {}", name))
    }

    fn require_no_nulls(&self, table: &str, column: &str) -> Result<()> {
        let idx = self.column_index(column);
        if self.rows.iter().any(|r| r[idx].is_none()) {
            return Err(MigrateError::transfer(
                table,
                format!("column \"{}\" contains null values", column),
            ));
        }
        Ok(())
    }

    /// Values of one column across all rows.
    pub fn column(&self, name: &str) -> Vec<Option<String>> {
        let idx = self.column_index(name);
        self.rows.iter().map(|r| r[idx].clone()).collect()
    }
}

#[derive(Debug, Default)]
pub struct SinkState {
    pub schemas: BTreeSet<String>,
    pub tables: BTreeMap<(String, String), SinkTable>,
    /// Every DDL and load call in order, e.g. "copy:t_order".
    pub events: Vec<String>,
    /// Sink index names whose creation fails.
    pub failing_indexes: BTreeSet<String>,
    pub create_table_calls: usize,
    pub drop_table_calls: usize,
}

/// Shared sink database.
#[derive(Clone, Default)]
pub struct FakeSink {
    pub state: Arc<Mutex<SinkState>>,
}

impl FakeSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_index(&self, sink_name: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_indexes
            .insert(sink_name.to_string());
    }

    pub fn table(&self, schema: &str, table: &str) -> SinkTable {
        self.state
            .lock()
            .unwrap()
            .tables
            .get(&(schema.to_string(), table.to_string()))
            .cloned()
            .unwrap_or_else(|| panic!("sink table {}.{} missing", schema, table))
    }

    pub fn events(&self) -> Vec<String> {
        self.state.lock().unwrap().events.clone()
    }

    fn with_table<T>(
        &self,
        schema: &str,
        table: &str,
        f: impl FnOnce(&mut SinkTable) -> Result<T>,
    ) -> Result<T> {
        let mut state = self.state.lock().unwrap();
        match state.tables.get_mut(&(schema.to_string(), table.to_string())) {
            Some(t) => f(t),
            None => Err(MigrateError::SchemaNotFound {
                table: format!("{}.{}", schema, table),
                location: "target".to_string(),
            }),
        }
    }

    fn event(&self, event: String) {
        self.state.lock().unwrap().events.push(event);
    }
}

/// Undo COPY text escaping for one field. `\N` is NULL.
fn unescape(field: &str) -> Option<String> {
    if field == "\\N" {
        return None;
    }
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    Some(out)
}

/// Whether a text value is accepted by a column of this type.
fn accepts(sink_type: &str, value: &str) -> bool {
    if value.contains('\0') {
        return false;
    }
    match sink_type {
        "smallint" | "integer" | "bigint" => value.parse::<i64>().is_ok(),
        "boolean" => value == "t" || value == "f",
        "date" => NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok(),
        "timestamp" | "timestamptz" => {
            NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f").is_ok()
        }
        "real" | "double precision" => value.parse::<f64>().is_ok(),
        t if t.starts_with("numeric") => value.parse::<f64>().is_ok(),
        _ => true,
    }
}

#[async_trait]
impl TargetWriter for FakeSink {
    async fn ping(&mut self) -> Result<()> {
        Ok(())
    }

    async fn create_schema(&mut self, schema: &str) -> Result<()> {
        self.event(format!("create_schema:{}", schema));
        self.state.lock().unwrap().schemas.insert(schema.to_string());
        Ok(())
    }

    async fn reset_schema(&mut self, schema: &str, owner: &str) -> Result<()> {
        self.event(format!("reset_schema:{}:{}", schema, owner));
        let mut state = self.state.lock().unwrap();
        let before = state.tables.len();
        state.tables.retain(|(s, _), _| s != schema);
        state.drop_table_calls += before - state.tables.len();
        state.schemas.insert(schema.to_string());
        Ok(())
    }

    async fn table_exists(&mut self, schema: &str, table: &str) -> Result<bool> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .tables
            .contains_key(&(schema.to_string(), table.to_string())))
    }

    async fn column_names(&mut self, schema: &str, table: &str) -> Result<Vec<String>> {
        self.with_table(schema, table, |t| {
            Ok(t.columns.iter().map(|c| c.name.clone()).collect())
        })
    }

    async fn create_table(
        &mut self,
        schema: &str,
        table: &Table,
        mode: ProvisionMode,
    ) -> Result<()> {
        let name = table.sink_name();
        self.event(format!("create_table:{}", name));
        let mut state = self.state.lock().unwrap();
        let key = (schema.to_string(), name.clone());
        if state.tables.contains_key(&key) {
            return Err(MigrateError::transfer(name, "relation already exists"));
        }
        state.create_table_calls += 1;
        state.tables.insert(
            key,
            SinkTable {
                columns: table
                    .columns
                    .iter()
                    .map(|c| SinkColumn {
                        name: c.sink_name(),
                        sink_type: c.sink_type.clone(),
                        // An inline primary key implies NOT NULL
                        not_null: mode == ProvisionMode::Durable
                            && table.primary_key.contains(&c.name),
                    })
                    .collect(),
                unlogged: mode == ProvisionMode::FastLoad,
                primary_key: (mode == ProvisionMode::Durable && table.has_pk())
                    .then(|| table.sink_primary_key()),
                ..Default::default()
            },
        );
        Ok(())
    }

    async fn add_column(&mut self, schema: &str, table: &str, column: &Column) -> Result<()> {
        self.event(format!("add_column:{}.{}", table, column.sink_name()));
        self.with_table(schema, table, |t| {
            if t.columns.iter().all(|c| c.name != column.sink_name()) {
                t.columns.push(SinkColumn {
                    name: column.sink_name(),
                    sink_type: column.sink_type.clone(),
                    not_null: false,
                });
                for row in &mut t.rows {
                    row.push(None);
                }
            }
            Ok(())
        })
    }

    async fn drop_column(&mut self, schema: &str, table: &str, column: &str) -> Result<()> {
        self.event(format!("drop_column:{}.{}", table, column));
        self.with_table(schema, table, |t| {
            if let Some(idx) = t.columns.iter().position(|c| c.name == column) {
                t.columns.remove(idx);
                for row in &mut t.rows {
                    row.remove(idx);
                }
            }
            Ok(())
        })
    }

    async fn set_logged(&mut self, schema: &str, table: &str) -> Result<()> {
        self.event(format!("set_logged:{}", table));
        self.with_table(schema, table, |t| {
            t.unlogged = false;
            Ok(())
        })
    }

    async fn set_not_null(&mut self, schema: &str, table: &str, column: &str) -> Result<()> {
        self.event(format!("set_not_null:{}.{}", table, column));
        self.with_table(schema, table, |t| {
            t.require_no_nulls(table, column)?;
            let idx = t.column_index(column);
            t.columns[idx].not_null = true;
            Ok(())
        })
    }

    async fn has_primary_key(&mut self, schema: &str, table: &str) -> Result<bool> {
        self.with_table(schema, table, |t| Ok(t.primary_key.is_some()))
    }

    async fn add_primary_key(
        &mut self,
        schema: &str,
        table: &str,
        columns: &[String],
    ) -> Result<()> {
        self.event(format!("add_primary_key:{}", table));
        self.with_table(schema, table, |t| {
            if t.primary_key.is_some() {
                return Err(MigrateError::transfer(table, "multiple primary keys"));
            }
            for column in columns {
                t.require_no_nulls(table, column)?;
            }
            for column in columns {
                let idx = t.column_index(column);
                t.columns[idx].not_null = true;
            }
            t.primary_key = Some(columns.to_vec());
            Ok(())
        })
    }

    async fn create_index(&mut self, schema: &str, table: &str, index: &Index) -> Result<()> {
        let name = index.sink_name(table);
        self.event(format!("create_index:{}", name));
        if self.state.lock().unwrap().failing_indexes.contains(&name) {
            return Err(MigrateError::transfer(table, format!("could not create {}", name)));
        }
        self.with_table(schema, table, |t| {
            if t.indexes.iter().all(|(n, _, _)| *n != name) {
                let columns = index.columns.iter().map(|c| c.to_lowercase()).collect();
                t.indexes.push((name.clone(), index.is_unique, columns));
            }
            Ok(())
        })
    }

    async fn create_foreign_key(
        &mut self,
        schema: &str,
        table: &str,
        fk: &ForeignKey,
    ) -> Result<()> {
        self.event(format!("create_foreign_key:{}", fk.name));
        self.with_table(schema, table, |t| {
            t.foreign_keys.push(fk.name.clone());
            Ok(())
        })
    }

    async fn copy_in(
        &mut self,
        schema: &str,
        table: &str,
        columns: &[String],
        payload: Bytes,
    ) -> Result<u64> {
        self.event(format!("copy:{}", table));
        let text = String::from_utf8(payload.to_vec())
            .map_err(|e| MigrateError::transfer(table, e.to_string()))?;

        self.with_table(schema, table, |t| {
            let positions: Vec<usize> = columns.iter().map(|c| t.column_index(c)).collect();
            let mut parsed = Vec::new();

            for (line_no, line) in text.lines().enumerate() {
                let fields: Vec<Option<String>> = line.split('\t').map(unescape).collect();
                if fields.len() != columns.len() {
                    return Err(MigrateError::transfer(
                        table,
                        format!("line {}: extra or missing data", line_no + 1),
                    ));
                }
                let mut row = vec![None; t.columns.len()];
                for (field, &pos) in fields.into_iter().zip(&positions) {
                    let column = &t.columns[pos];
                    match &field {
                        None if column.not_null => {
                            return Err(MigrateError::transfer(
                                table,
                                format!("null value in column \"{}\"", column.name),
                            ))
                        }
                        Some(v) if !accepts(&column.sink_type, v) => {
                            return Err(MigrateError::transfer(
                                table,
                                format!(
                                    "invalid input syntax for type {}: \"{}\"",
                                    column.sink_type, v
                                ),
                            ))
                        }
                        _ => {}
                    }
                    row[pos] = field;
                }
                parsed.push(row);
            }

            let loaded = parsed.len() as u64;
            t.rows.extend(parsed);
            Ok(loaded)
        })
    }

    async fn row_count(&mut self, schema: &str, table: &str) -> Result<i64> {
        self.with_table(schema, table, |t| Ok(t.rows.len() as i64))
    }
}

// =============================================================================
// Provider and config
// =============================================================================

/// Hands out clones of one fake source and one fake sink.
#[derive(Clone)]
pub struct FakeProvider {
    pub source: FakeSource,
    pub sink: FakeSink,
    pub pairs_out: Arc<AtomicUsize>,
    pub max_pairs_out: Arc<AtomicUsize>,
}

impl FakeProvider {
    pub fn new(source: FakeSource, sink: FakeSink) -> Self {
        Self {
            source,
            sink,
            pairs_out: Arc::new(AtomicUsize::new(0)),
            max_pairs_out: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl ConnectionProvider for FakeProvider {
    async fn acquire_source(&self) -> Result<Box<dyn SourceReader>> {
        let now = self.pairs_out.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_pairs_out.fetch_max(now, Ordering::SeqCst);
        Ok(Box::new(CountedSource {
            inner: self.source.clone(),
            out: self.pairs_out.clone(),
        }))
    }

    async fn acquire_sink(&self) -> Result<Box<dyn TargetWriter>> {
        Ok(Box::new(self.sink.clone()))
    }
}

/// Source session that decrements the checked-out count on drop.
struct CountedSource {
    inner: FakeSource,
    out: Arc<AtomicUsize>,
}

impl Drop for CountedSource {
    fn drop(&mut self) {
        self.out.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl SourceReader for CountedSource {
    async fn ping(&mut self) -> Result<()> {
        self.inner.ping().await
    }

    async fn list_tables(&mut self, pattern: Option<&str>) -> Result<Vec<String>> {
        self.inner.list_tables(pattern).await
    }

    async fn table_exists(&mut self, table: &str) -> Result<bool> {
        self.inner.table_exists(table).await
    }

    async fn describe_columns(&mut self, table: &str) -> Result<Vec<DescribeRow>> {
        self.inner.describe_columns(table).await
    }

    async fn list_indexes(&mut self, table: &str) -> Result<Vec<IndexRow>> {
        self.inner.list_indexes(table).await
    }

    async fn list_foreign_keys(&mut self, table: &str) -> Result<Vec<ForeignKeyRow>> {
        self.inner.list_foreign_keys(table).await
    }

    async fn row_count(&mut self, table: &str, filter: Option<&str>) -> Result<i64> {
        self.inner.row_count(table, filter).await
    }

    async fn year_histogram(
        &mut self,
        table: &str,
        column: &str,
    ) -> Result<Vec<(Option<i32>, i64)>> {
        self.inner.year_histogram(table, column).await
    }

    async fn fetch_page(
        &mut self,
        query: &PageQuery,
        offset: u64,
        limit: usize,
    ) -> Result<Vec<SourceRow>> {
        self.inner.fetch_page(query, offset, limit).await
    }
}

/// Config with one source profile named "live" and fixed tuning values.
pub fn test_config(migration: MigrationConfig) -> Config {
    let mut sources = BTreeMap::new();
    sources.insert(
        "live".to_string(),
        SourceConfig {
            host: "localhost".into(),
            port: 3306,
            database: "XchangeLive".into(),
            user: "migrator".into(),
            password: String::new(),
            schema: None,
            table_pattern: None,
            include_tables: Vec::new(),
        },
    );
    Config {
        sources,
        target: TargetConfig {
            host: "localhost".into(),
            port: 5432,
            database: "analytics".into(),
            user: "loader".into(),
            password: String::new(),
            ssl_mode: "disable".into(),
        },
        migration,
    }
}

/// Tuning used by most tests: small batches so paging is exercised.
pub fn small_batches() -> MigrationConfig {
    MigrationConfig {
        table_workers: Some(2),
        chunk_workers: Some(3),
        batch_size: Some(100),
        large_table_threshold: Some(1_000_000),
        fast_load_threshold: Some(100_000),
        ..Default::default()
    }
}


//! Migration orchestrator - main workflow coordinator.
//!
//! Every table runs through `Discover → Provision → Load → Finalize` on its
//! own task with its own [`ConnectionPair`]. Large tables fan their load out
//! to chunk tasks, each with a pair of its own. Table and chunk tasks are
//! bounded by two independent semaphores.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::chunk::{ChunkPlan, ChunkPlanner};
use crate::config::{Config, SourceConfig};
use crate::core::report::{
    ChunkResult, CountCheck, Defect, HealthCheckResult, MigrationResult, TableResult, TableStatus,
    TableValidation, ValidationReport,
};
use crate::core::schema::{ChunkSpec, ProvisionMode, Table};
use crate::core::traits::{ConnectionPair, ConnectionProvider, SourceReader, TargetWriter};
use crate::drivers::PoolProvider;
use crate::error::{MigrateError, Result};
use crate::finalize::{ConstraintFinalizer, FinalizeOptions};
use crate::introspect::SchemaIntrospector;
use crate::provision::TableProvisioner;
use crate::transfer::{BulkLoader, LoadOutcome, LoadUnit};

/// Per-table lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TablePhase {
    Discover,
    Provision,
    Load,
    Finalize,
    Done,
    Failed,
}

impl fmt::Display for TablePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TablePhase::Discover => "discover",
            TablePhase::Provision => "provision",
            TablePhase::Load => "load",
            TablePhase::Finalize => "finalize",
            TablePhase::Done => "done",
            TablePhase::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Logs each phase transition of one table.
struct PhaseLog {
    table: String,
    phase: TablePhase,
}

impl PhaseLog {
    fn new(table: &str) -> Self {
        info!("{}: entering {}", table, TablePhase::Discover);
        Self {
            table: table.to_string(),
            phase: TablePhase::Discover,
        }
    }

    fn advance(&mut self, next: TablePhase) {
        info!("{}: {} -> {}", self.table, self.phase, next);
        self.phase = next;
    }
}

/// Dry-run view of one table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TablePlan {
    pub table: String,
    pub row_count: i64,
    pub columns: usize,
    pub primary_key: Vec<String>,
    pub provision_mode: Option<ProvisionMode>,
    /// Empty when the table loads as one unit.
    pub chunks: Vec<ChunkSpec>,
    /// Columns stored with the fallback type.
    pub fallback_columns: Vec<String>,
    pub error: Option<String>,
}

/// Dry-run view of a whole run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunPlan {
    pub database: String,
    pub schema: String,
    pub tables: Vec<TablePlan>,
}

impl RunPlan {
    /// Convert to JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Everything a table or chunk task needs, shared read-only.
struct RunContext {
    config: Arc<Config>,
    provider: Arc<dyn ConnectionProvider>,
    database: String,
    schema: String,
    chunk_permits: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl RunContext {
    fn loader(&self) -> BulkLoader {
        BulkLoader::new(self.schema.clone(), self.config.migration.get_batch_size())
    }

    fn finalize_options(&self) -> FinalizeOptions {
        FinalizeOptions {
            create_foreign_keys: self.config.migration.create_foreign_keys,
        }
    }
}

/// Migration orchestrator for one logical source database.
pub struct Orchestrator {
    config: Arc<Config>,
    source: SourceConfig,
    provider: Arc<dyn ConnectionProvider>,
    tables: Vec<String>,
}

impl Orchestrator {
    /// Create an orchestrator backed by real connection pools.
    pub async fn new(config: Config, source_name: &str) -> Result<Self> {
        let provider = PoolProvider::connect(&config, source_name).await?;
        Self::with_provider(Arc::new(config), source_name, Arc::new(provider))
    }

    /// Create an orchestrator over any connection provider.
    pub fn with_provider(
        config: Arc<Config>,
        source_name: &str,
        provider: Arc<dyn ConnectionProvider>,
    ) -> Result<Self> {
        let source = config.source(source_name)?.clone();
        Ok(Self {
            config,
            source,
            provider,
            tables: Vec::new(),
        })
    }

    /// Restrict the run to an explicit table list.
    ///
    /// Takes precedence over the profile's `include_tables` and
    /// `table_pattern`.
    pub fn with_tables(mut self, tables: Vec<String>) -> Self {
        self.tables = tables;
        self
    }

    /// Sink schema this run writes to.
    pub fn schema(&self) -> String {
        self.source.sink_schema()
    }

    /// Run the migration.
    ///
    /// Returns `Err` only when the run cannot start at all (schema
    /// preparation or table discovery failed). Per-table failures are
    /// reported in the result.
    pub async fn run(&self, cancel: CancellationToken) -> Result<MigrationResult> {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        let schema = self.schema();

        info!(
            "Starting migration run {}: {} -> {}",
            run_id, self.source.database, schema
        );

        let tables = {
            let mut pair = self.provider.acquire().await?;
            self.prepare_schema(pair.sink.as_mut(), &schema).await?;
            self.resolve_tables(pair.source.as_mut()).await?
        };
        info!("Found {} tables to migrate", tables.len());

        let migration = &self.config.migration;
        let table_permits = Arc::new(Semaphore::new(migration.get_table_workers().max(1)));
        let ctx = Arc::new(RunContext {
            config: self.config.clone(),
            provider: self.provider.clone(),
            database: self.source.database.clone(),
            schema: schema.clone(),
            chunk_permits: Arc::new(Semaphore::new(migration.get_chunk_workers().max(1))),
            cancel: cancel.clone(),
        });

        info!(
            "Migrating with {} table workers and {} chunk workers",
            migration.get_table_workers(),
            migration.get_chunk_workers()
        );

        let mut handles: Vec<(String, Option<JoinHandle<TableResult>>)> = Vec::new();
        for name in tables {
            let Some(permit) = acquire_permit(&table_permits, &cancel).await else {
                handles.push((name, None));
                continue;
            };
            let ctx = ctx.clone();
            let task_name = name.clone();
            let handle = tokio::spawn(async move {
                let _permit = permit;
                migrate_table(ctx, task_name).await
            });
            handles.push((name, Some(handle)));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (name, handle) in handles {
            let result = match handle {
                None => {
                    info!("{}: not started, run cancelled", name);
                    TableResult::skipped(name)
                }
                Some(handle) => match handle.await {
                    Ok(result) => result,
                    Err(e) => {
                        error!("{}: task panicked - {}", name, e);
                        TableResult::failed(name, format!("Task panicked: {}", e))
                    }
                },
            };
            results.push(result);
        }

        let result = MigrationResult::from_tables(
            run_id,
            self.source.database.clone(),
            schema,
            started_at,
            results,
            cancel.is_cancelled(),
        );

        info!(
            "Migration finished in {:.1}s: {}/{} tables succeeded, {} failed, {} skipped, \
             {} rows ({} rows/sec), {} defects",
            result.duration_seconds,
            result.tables_success,
            result.tables_total,
            result.tables_failed,
            result.tables_skipped,
            result.rows_loaded,
            result.rows_per_second,
            result.defect_count()
        );
        if !result.success() {
            warn!("Tables not loaded: {}", result.failed_tables().join(", "));
        }

        Ok(result)
    }

    /// Dry run: discovery and chunk planning only. Nothing is written.
    pub async fn plan(&self) -> Result<RunPlan> {
        let mut source = self.provider.acquire_source().await?;
        let names = self.resolve_tables(source.as_mut()).await?;
        let migration = &self.config.migration;

        let mut tables = Vec::with_capacity(names.len());
        for name in names {
            let table = match discover(source.as_mut(), &self.source.database, &name).await {
                Ok((table, _)) => table,
                Err(e) => {
                    warn!("{}: discovery failed: {}", name, e);
                    tables.push(TablePlan {
                        table: name,
                        row_count: 0,
                        columns: 0,
                        primary_key: Vec::new(),
                        provision_mode: None,
                        chunks: Vec::new(),
                        fallback_columns: Vec::new(),
                        error: Some(e.to_string()),
                    });
                    continue;
                }
            };

            let plan = ChunkPlanner::plan(
                source.as_mut(),
                &table,
                migration.get_large_table_threshold(),
            )
            .await;
            let mode = TableProvisioner::choose_mode(
                &table,
                plan.is_chunked(),
                migration.get_fast_load_threshold(),
            );
            info!(
                "{}: {} rows, {} chunks, {:?}",
                name,
                table.row_count,
                plan.chunk_count(),
                mode
            );

            tables.push(TablePlan {
                table: name,
                row_count: table.row_count,
                columns: table.columns.len(),
                primary_key: table.primary_key.clone(),
                provision_mode: Some(mode),
                chunks: match plan {
                    ChunkPlan::Single => Vec::new(),
                    ChunkPlan::Chunked(chunks) => chunks,
                },
                fallback_columns: table
                    .columns
                    .iter()
                    .filter(|c| c.type_fallback)
                    .map(|c| c.name.clone())
                    .collect(),
                error: None,
            });
        }

        Ok(RunPlan {
            database: self.source.database.clone(),
            schema: self.schema(),
            tables,
        })
    }

    /// Compare source and sink row counts per table.
    pub async fn validate(&self) -> Result<ValidationReport> {
        let schema = self.schema();
        let tolerance_pct = self.config.migration.row_count_tolerance_pct;
        let ConnectionPair {
            mut source,
            mut sink,
        } = self.provider.acquire().await?;

        let names = self.resolve_tables(source.as_mut()).await?;
        let mut tables = Vec::with_capacity(names.len());

        for name in names {
            let source_rows = source.row_count(&name, None).await?;
            let sink_table = name.to_lowercase();
            let sink_rows = if sink.table_exists(&schema, &sink_table).await? {
                Some(sink.row_count(&schema, &sink_table).await?)
            } else {
                None
            };

            let check = match sink_rows {
                Some(rows) => CountCheck::classify(source_rows, rows, tolerance_pct),
                None => CountCheck::Mismatch,
            };
            match check {
                CountCheck::Match => info!("{}: {} rows, match", name, source_rows),
                CountCheck::WithinTolerance => info!(
                    "{}: source={} sink={:?}, within {}% tolerance",
                    name, source_rows, sink_rows, tolerance_pct
                ),
                CountCheck::Mismatch => warn!(
                    "{}: source={} sink={:?}, mismatch",
                    name, source_rows, sink_rows
                ),
            }

            tables.push(TableValidation {
                table: name,
                source_rows,
                sink_rows,
                check,
            });
        }

        Ok(ValidationReport {
            database: self.source.database.clone(),
            schema,
            tolerance_pct,
            tables,
        })
    }

    /// Check that both endpoints accept connections and measure latency.
    pub async fn health_check(&self) -> HealthCheckResult {
        let start = Instant::now();
        let source = match self.provider.acquire_source().await {
            Ok(mut s) => s.ping().await,
            Err(e) => Err(e),
        };
        let source_latency_ms = start.elapsed().as_millis() as u64;

        let start = Instant::now();
        let target = match self.provider.acquire_sink().await {
            Ok(mut s) => s.ping().await,
            Err(e) => Err(e),
        };
        let target_latency_ms = start.elapsed().as_millis() as u64;

        let result = HealthCheckResult {
            healthy: source.is_ok() && target.is_ok(),
            source_connected: source.is_ok(),
            source_latency_ms,
            source_error: source.err().map(|e| e.to_string()),
            target_connected: target.is_ok(),
            target_latency_ms,
            target_error: target.err().map(|e| e.to_string()),
        };
        if result.healthy {
            info!(
                "Health check passed: source {}ms, target {}ms",
                source_latency_ms, target_latency_ms
            );
        } else {
            warn!(
                "Health check failed: source={:?} target={:?}",
                result.source_error, result.target_error
            );
        }
        result
    }

    /// Create the sink schema, or drop and recreate it when resetting.
    async fn prepare_schema(&self, sink: &mut dyn TargetWriter, schema: &str) -> Result<()> {
        if self.config.migration.reset_schema {
            warn!(
                "Resetting schema {}: all existing tables in it are dropped",
                schema
            );
            sink.reset_schema(schema, &self.config.target.user).await
        } else {
            sink.create_schema(schema).await
        }
    }

    /// Tables to migrate: explicit list, then profile list, then pattern,
    /// then everything.
    async fn resolve_tables(&self, source: &mut dyn SourceReader) -> Result<Vec<String>> {
        if !self.tables.is_empty() {
            return Ok(self.tables.clone());
        }
        if !self.source.include_tables.is_empty() {
            return Ok(self.source.include_tables.clone());
        }
        let pattern = self.source.table_pattern.as_deref();
        let tables = source.list_tables(pattern).await?;
        debug!("Listed {} tables (pattern: {:?})", tables.len(), pattern);
        Ok(tables)
    }
}

/// Wait for a permit unless the run is cancelled first.
async fn acquire_permit(
    permits: &Arc<Semaphore>,
    cancel: &CancellationToken,
) -> Option<OwnedSemaphorePermit> {
    if cancel.is_cancelled() {
        return None;
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        permit = permits.clone().acquire_owned() => permit.ok(),
    }
}

/// Introspect a table and take its exact row count.
async fn discover(
    source: &mut dyn SourceReader,
    database: &str,
    name: &str,
) -> Result<(Table, Vec<Defect>)> {
    let introspected = SchemaIntrospector::introspect(source, database, name).await?;
    let mut table = introspected.table;
    table.row_count = source.row_count(name, None).await?;
    Ok((table, introspected.defects))
}

/// One table from discovery to finalize. Never fails; errors end up in the
/// returned result.
async fn migrate_table(ctx: Arc<RunContext>, name: String) -> TableResult {
    let start = Instant::now();
    let mut phase = PhaseLog::new(&name);

    let mut pair = match ctx.provider.acquire().await {
        Ok(pair) => pair,
        Err(e) => {
            error!("{}: could not acquire connections: {}", name, e);
            phase.advance(TablePhase::Failed);
            return TableResult::failed(name, e);
        }
    };

    let mut result = TableResult::new(&name);
    if let Err(e) = run_table(&ctx, &mut pair, &mut phase, &mut result).await {
        error!("{}: {}", name, e);
        result.status = TableStatus::Failed;
        result.error = Some(e.to_string());
    }

    result.elapsed_secs = start.elapsed().as_secs_f64();
    phase.advance(if result.succeeded() {
        TablePhase::Done
    } else {
        TablePhase::Failed
    });
    for defect in &result.defects {
        debug!("{}: defect: {}", name, defect);
    }
    result
}

async fn run_table(
    ctx: &Arc<RunContext>,
    pair: &mut ConnectionPair,
    phase: &mut PhaseLog,
    result: &mut TableResult,
) -> Result<()> {
    let migration = &ctx.config.migration;
    let name = result.table.clone();

    let (table, defects) = discover(pair.source.as_mut(), &ctx.database, &name).await?;
    result.defects.extend(defects);
    let plan = ChunkPlanner::plan(
        pair.source.as_mut(),
        &table,
        migration.get_large_table_threshold(),
    )
    .await;

    phase.advance(TablePhase::Provision);
    let mode = TableProvisioner::choose_mode(
        &table,
        plan.is_chunked(),
        migration.get_fast_load_threshold(),
    );
    TableProvisioner::provision(pair.sink.as_mut(), &ctx.schema, &table, mode).await?;
    result.provision_mode = Some(mode);

    let table = Arc::new(table);
    phase.advance(TablePhase::Load);
    if table.row_count == 0 {
        // Still finalized: an empty table gets the same indexes and keys as
        // a loaded one, and later incremental loads land on them.
        info!("{}: source is empty, skipping load", name);
    } else {
        match plan {
            ChunkPlan::Single => {
                let unit = LoadUnit::whole(table.clone());
                match ctx
                    .loader()
                    .load(pair.source.as_mut(), pair.sink.as_mut(), &unit)
                    .await
                {
                    Ok(outcome) => absorb(result, outcome),
                    Err(e) => {
                        error!("{}: load failed: {}", name, e);
                        result.status = TableStatus::Failed;
                        result.error = Some(e.to_string());
                    }
                }
            }
            ChunkPlan::Chunked(chunks) => load_chunks(ctx, &table, chunks, result).await,
        }
    }

    // A failed load still gets durability and constraints on whatever landed
    phase.advance(TablePhase::Finalize);
    let defects = ConstraintFinalizer::finalize(
        pair.sink.as_mut(),
        &ctx.schema,
        &table,
        ctx.finalize_options(),
    )
    .await;
    for defect in &defects {
        warn!("{}: {}", name, defect);
    }
    result.defects.extend(defects);

    Ok(())
}

fn absorb(result: &mut TableResult, outcome: LoadOutcome) {
    result.rows_attempted += outcome.rows_attempted;
    result.rows_loaded += outcome.rows_loaded;
    result.defects.extend(outcome.defects);
}

/// Fan a chunked table out to chunk tasks and fold their results in.
async fn load_chunks(
    ctx: &Arc<RunContext>,
    table: &Arc<Table>,
    chunks: Vec<ChunkSpec>,
    result: &mut TableResult,
) {
    let mut handles: Vec<(ChunkSpec, Option<JoinHandle<(ChunkResult, Vec<Defect>)>>)> =
        Vec::with_capacity(chunks.len());

    for chunk in chunks {
        let Some(permit) = acquire_permit(&ctx.chunk_permits, &ctx.cancel).await else {
            handles.push((chunk, None));
            continue;
        };
        let task_ctx = ctx.clone();
        let unit = LoadUnit::chunk(table.clone(), chunk.clone());
        let handle = tokio::spawn(async move {
            let _permit = permit;
            load_chunk(task_ctx, unit).await
        });
        handles.push((chunk, Some(handle)));
    }

    for (chunk, handle) in handles {
        let (chunk_result, defects) = match handle {
            None => (
                chunk_failure(&chunk, MigrateError::Cancelled.to_string()),
                Vec::new(),
            ),
            Some(handle) => match handle.await {
                Ok(done) => done,
                Err(e) => (
                    chunk_failure(&chunk, format!("Task panicked: {}", e)),
                    Vec::new(),
                ),
            },
        };
        result.rows_attempted += chunk_result.rows_attempted;
        result.rows_loaded += chunk_result.rows_loaded;
        result.defects.extend(defects);
        result.chunks.push(chunk_result);
    }

    let failed: Vec<&str> = result
        .chunks
        .iter()
        .filter(|c| !c.succeeded())
        .map(|c| c.label.as_str())
        .collect();
    if !failed.is_empty() {
        let message = format!("chunks failed: {}", failed.join(", "));
        error!("{}: {}", table.name, message);
        result.status = TableStatus::Failed;
        result.error = Some(MigrateError::transfer(table.name.clone(), message).to_string());
    }
}

fn chunk_failure(chunk: &ChunkSpec, error: String) -> ChunkResult {
    ChunkResult {
        label: chunk.label(),
        estimated_rows: chunk.estimated_rows,
        rows_attempted: 0,
        rows_loaded: 0,
        elapsed_secs: 0.0,
        error: Some(error),
    }
}

/// One chunk on its own connection pair.
async fn load_chunk(ctx: Arc<RunContext>, unit: LoadUnit) -> (ChunkResult, Vec<Defect>) {
    let label = unit.label();
    let chunk_label = unit
        .chunk
        .as_ref()
        .map(ChunkSpec::label)
        .unwrap_or_else(|| label.clone());
    let start = Instant::now();
    let estimated_rows = unit.estimated_rows();

    let loaded = match ctx.provider.acquire().await {
        Ok(mut pair) => {
            ctx.loader()
                .load(pair.source.as_mut(), pair.sink.as_mut(), &unit)
                .await
        }
        Err(e) => Err(e),
    };

    match loaded {
        Ok(outcome) => {
            info!(
                "{}: chunk done, {}/{} rows loaded",
                label, outcome.rows_loaded, outcome.rows_attempted
            );
            (
                ChunkResult {
                    label: chunk_label,
                    estimated_rows,
                    rows_attempted: outcome.rows_attempted,
                    rows_loaded: outcome.rows_loaded,
                    elapsed_secs: outcome.elapsed.as_secs_f64(),
                    error: None,
                },
                outcome.defects,
            )
        }
        Err(e) => {
            error!("{}: chunk failed: {}", label, e);
            (
                ChunkResult {
                    label: chunk_label,
                    estimated_rows,
                    rows_attempted: 0,
                    rows_loaded: 0,
                    elapsed_secs: start.elapsed().as_secs_f64(),
                    error: Some(e.to_string()),
                },
                Vec::new(),
            )
        }
    }
}

//! Run report types.
//!
//! Everything a run learns about its tables ends up here: per-table status,
//! row counts, chunk outcomes and the non-fatal [`Defect`]s. The whole
//! [`MigrationResult`] serializes to JSON for `--output-json`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::schema::ProvisionMode;
use crate::error::Result;

/// A non-fatal problem recorded against a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Defect {
    /// A column type was not recognized and was created as `text`.
    TypeMappingFallback { column: String, source_type: String },

    /// A COPY batch was rejected and skipped.
    BatchLoad {
        /// Chunk label, or `None` for an unchunked table.
        chunk: Option<String>,
        /// Source offset of the first row in the window.
        offset: u64,
        /// Rows in the skipped window.
        rows: usize,
        message: String,
    },

    /// Values of a column were replaced by NULL.
    ValueConversion {
        column: String,
        count: u64,
        /// First failure message seen for this column.
        sample: String,
    },

    /// A finalize step failed.
    ConstraintCreation {
        step: FinalizeStep,
        name: String,
        message: String,
    },

    /// No primary key was found, so PK and index creation were skipped.
    MissingPrimaryKey,
}

impl Defect {
    /// Rows lost to this defect, if any.
    pub fn rows_skipped(&self) -> usize {
        match self {
            Defect::BatchLoad { rows, .. } => *rows,
            _ => 0,
        }
    }
}

impl std::fmt::Display for Defect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Defect::TypeMappingFallback {
                column,
                source_type,
            } => write!(f, "column {} has unmapped type '{}'", column, source_type),
            Defect::BatchLoad {
                chunk,
                offset,
                rows,
                message,
            } => {
                let chunk = chunk.as_deref().unwrap_or("-");
                write!(
                    f,
                    "batch skipped (chunk {}, offset {}, {} rows): {}",
                    chunk, offset, rows, message
                )
            }
            Defect::ValueConversion {
                column,
                count,
                sample,
            } => write!(f, "{} values in column {} set to NULL ({})", count, column, sample),
            Defect::ConstraintCreation {
                step,
                name,
                message,
            } => write!(f, "{} {} failed: {}", step, name, message),
            Defect::MissingPrimaryKey => write!(f, "no primary key; constraints skipped"),
        }
    }
}

/// A step of constraint finalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalizeStep {
    SetLogged,
    NotNull,
    PrimaryKey,
    Index,
    ForeignKey,
}

impl std::fmt::Display for FinalizeStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FinalizeStep::SetLogged => "set logged",
            FinalizeStep::NotNull => "not null",
            FinalizeStep::PrimaryKey => "primary key",
            FinalizeStep::Index => "index",
            FinalizeStep::ForeignKey => "foreign key",
        };
        f.write_str(s)
    }
}

/// Final status of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    /// Load completed; finalize defects do not change this.
    Done,
    /// Discovery, provisioning or at least one load unit failed.
    Failed,
    /// Never started because the run was cancelled.
    Skipped,
}

/// Outcome of one chunk of a chunked table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkResult {
    pub label: String,
    pub estimated_rows: i64,
    pub rows_attempted: u64,
    pub rows_loaded: u64,
    pub elapsed_secs: f64,
    pub error: Option<String>,
}

impl ChunkResult {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Outcome of one table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableResult {
    /// Source table name.
    pub table: String,
    pub status: TableStatus,
    /// Rows read from the source.
    pub rows_attempted: u64,
    /// Rows accepted by the sink.
    pub rows_loaded: u64,
    pub elapsed_secs: f64,
    pub provision_mode: Option<ProvisionMode>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chunks: Vec<ChunkResult>,
    #[serde(default)]
    pub defects: Vec<Defect>,
    pub error: Option<String>,
}

impl TableResult {
    /// Empty result for a table about to run.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            status: TableStatus::Done,
            rows_attempted: 0,
            rows_loaded: 0,
            elapsed_secs: 0.0,
            provision_mode: None,
            chunks: Vec::new(),
            defects: Vec::new(),
            error: None,
        }
    }

    /// Result for a table that failed before or during load.
    pub fn failed(table: impl Into<String>, error: impl ToString) -> Self {
        Self {
            status: TableStatus::Failed,
            error: Some(error.to_string()),
            ..Self::new(table)
        }
    }

    /// Result for a table that was never started.
    pub fn skipped(table: impl Into<String>) -> Self {
        Self {
            status: TableStatus::Skipped,
            ..Self::new(table)
        }
    }

    /// Whether the load phase completed.
    pub fn succeeded(&self) -> bool {
        self.status == TableStatus::Done
    }

    /// Rows in batches the sink rejected.
    pub fn rows_skipped(&self) -> usize {
        self.defects.iter().map(Defect::rows_skipped).sum()
    }
}

/// Outcome of a whole run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationResult {
    /// Unique run identifier.
    pub run_id: String,

    /// Source database name.
    pub database: String,

    /// Sink schema name.
    pub schema: String,

    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_seconds: f64,

    pub tables_total: usize,
    pub tables_success: usize,
    pub tables_failed: usize,
    pub tables_skipped: usize,

    /// Total rows accepted by the sink.
    pub rows_loaded: u64,

    /// Average throughput (rows/second).
    pub rows_per_second: u64,

    /// Whether the run was cancelled before every table started.
    pub cancelled: bool,

    pub tables: Vec<TableResult>,
}

impl MigrationResult {
    /// Build the run summary from per-table results.
    pub fn from_tables(
        run_id: String,
        database: String,
        schema: String,
        started_at: DateTime<Utc>,
        tables: Vec<TableResult>,
        cancelled: bool,
    ) -> Self {
        let completed_at = Utc::now();
        let duration_seconds =
            (completed_at - started_at).num_milliseconds().max(0) as f64 / 1000.0;
        let rows_loaded: u64 = tables.iter().map(|t| t.rows_loaded).sum();
        let rows_per_second = if duration_seconds > 0.0 {
            (rows_loaded as f64 / duration_seconds) as u64
        } else {
            0
        };
        let count = |status| tables.iter().filter(|t| t.status == status).count();

        Self {
            run_id,
            database,
            schema,
            started_at,
            completed_at,
            duration_seconds,
            tables_total: tables.len(),
            tables_success: count(TableStatus::Done),
            tables_failed: count(TableStatus::Failed),
            tables_skipped: count(TableStatus::Skipped),
            rows_loaded,
            rows_per_second,
            cancelled,
            tables,
        }
    }

    /// True when every requested table finished its load phase.
    pub fn success(&self) -> bool {
        self.tables.iter().all(TableResult::succeeded)
    }

    /// Names of tables that did not succeed.
    pub fn failed_tables(&self) -> Vec<&str> {
        self.tables
            .iter()
            .filter(|t| !t.succeeded())
            .map(|t| t.table.as_str())
            .collect()
    }

    /// Total defect count across tables.
    pub fn defect_count(&self) -> usize {
        self.tables.iter().map(|t| t.defects.len()).sum()
    }

    /// Convert to JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Row-count comparison for one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountCheck {
    Match,
    WithinTolerance,
    Mismatch,
}

impl CountCheck {
    /// Classify a source/sink count pair against a percentage tolerance.
    pub fn classify(source: i64, sink: i64, tolerance_pct: f64) -> Self {
        if source == sink {
            return CountCheck::Match;
        }
        let base = source.max(1) as f64;
        let diff_pct = (source - sink).abs() as f64 / base * 100.0;
        if diff_pct <= tolerance_pct {
            CountCheck::WithinTolerance
        } else {
            CountCheck::Mismatch
        }
    }
}

/// Row-count validation of one table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableValidation {
    pub table: String,
    pub source_rows: i64,
    /// `None` when the sink table is missing.
    pub sink_rows: Option<i64>,
    pub check: CountCheck,
}

/// Row-count validation of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub database: String,
    pub schema: String,
    pub tolerance_pct: f64,
    pub tables: Vec<TableValidation>,
}

impl ValidationReport {
    /// True when no table is a mismatch.
    pub fn passed(&self) -> bool {
        self.tables.iter().all(|t| t.check != CountCheck::Mismatch)
    }

    /// Convert to JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Result of a health check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub healthy: bool,
    pub source_connected: bool,
    pub source_latency_ms: u64,
    pub source_error: Option<String>,
    pub target_connected: bool,
    pub target_latency_ms: u64,
    pub target_error: Option<String>,
}

impl HealthCheckResult {
    /// Convert to JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

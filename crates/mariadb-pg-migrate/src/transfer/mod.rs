//! Bulk loading of tables and chunks via COPY.
//!
//! A [`LoadUnit`] is a whole table or one chunk of it. The [`BulkLoader`]
//! pages through the unit with `LIMIT/OFFSET`, transcodes each page into a
//! [`LoadBatch`] and ships it as one COPY text payload in its own sink
//! transaction. A rejected batch is recorded and skipped; the loader moves
//! on to the next window. Reading and writing alternate strictly within one
//! unit.

pub mod transcode;

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::core::report::Defect;
use crate::core::schema::{ChunkSpec, Table};
use crate::core::traits::{PageQuery, SourceReader, TargetWriter};
use crate::core::value::SourceRow;
use crate::error::{MigrateError, Result};

pub use transcode::{escape_copy_text, RowTranscoder, ValueClass, WireRecord};

/// One independently loadable part of a table.
#[derive(Debug, Clone)]
pub struct LoadUnit {
    pub table: Arc<Table>,
    /// `None` loads the whole table.
    pub chunk: Option<ChunkSpec>,
}

impl LoadUnit {
    pub fn whole(table: Arc<Table>) -> Self {
        Self { table, chunk: None }
    }

    pub fn chunk(table: Arc<Table>, chunk: ChunkSpec) -> Self {
        Self {
            table,
            chunk: Some(chunk),
        }
    }

    /// Label used in logs and defects.
    pub fn label(&self) -> String {
        match &self.chunk {
            Some(c) => format!("{}[{}]", self.table.name, c.label()),
            None => self.table.name.clone(),
        }
    }

    /// Row count expected from planning.
    pub fn estimated_rows(&self) -> i64 {
        match &self.chunk {
            Some(c) => c.estimated_rows,
            None => self.table.row_count,
        }
    }

    /// Source page query for this unit.
    pub fn page_query(&self) -> Result<PageQuery> {
        Ok(PageQuery {
            table: self.table.name.clone(),
            columns: self.table.columns.clone(),
            filter: self.chunk.as_ref().map(ChunkSpec::where_clause).transpose()?,
            order_by: self.table.pk_order_by()?,
        })
    }
}

/// Transcoded rows of one page, ready to encode.
#[derive(Debug)]
pub struct LoadBatch {
    pub columns: Vec<String>,
    pub records: Vec<WireRecord>,
}

impl LoadBatch {
    /// Transcode a page of source rows.
    pub fn from_rows(
        transcoder: &mut RowTranscoder,
        columns: Vec<String>,
        rows: &[SourceRow],
    ) -> Self {
        Self {
            columns,
            records: rows.iter().map(|r| transcoder.transcode(r)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Encode the batch as one COPY text payload.
    pub fn encode(&self) -> Bytes {
        let mut out = String::with_capacity(self.records.len() * self.columns.len() * 8);
        for record in &self.records {
            record.write_line(&mut out);
        }
        Bytes::from(out)
    }
}

/// Result of loading one unit.
#[derive(Debug, Clone, Default)]
pub struct LoadOutcome {
    /// Rows read from the source.
    pub rows_attempted: u64,
    /// Rows accepted by the sink.
    pub rows_loaded: u64,
    pub batches: usize,
    pub batches_failed: usize,
    pub elapsed: Duration,
    pub defects: Vec<Defect>,
}

/// Logs progress of one unit at every 10% of its estimated size.
#[derive(Debug)]
pub struct ProgressTracker {
    label: String,
    total: u64,
    start: Instant,
    last_decile: u64,
}

impl ProgressTracker {
    pub fn new(label: impl Into<String>, total: i64) -> Self {
        Self {
            label: label.into(),
            total: total.max(0) as u64,
            start: Instant::now(),
            last_decile: 0,
        }
    }

    /// Report rows done so far. Returns the percentage when a line was logged.
    pub fn update(&mut self, rows_done: u64) -> Option<u64> {
        if self.total == 0 {
            return None;
        }
        let pct = (rows_done.saturating_mul(100) / self.total).min(100);
        let decile = pct / 10;
        if decile <= self.last_decile {
            return None;
        }
        self.last_decile = decile;

        let secs = self.start.elapsed().as_secs_f64();
        let rate = if secs > 0.0 {
            rows_done as f64 / secs
        } else {
            0.0
        };
        info!(
            "{}: {}% ({}/{} rows, {:.0} rows/sec)",
            self.label,
            decile * 10,
            rows_done,
            self.total,
            rate
        );
        Some(decile * 10)
    }
}

/// Streams load units from source to sink.
#[derive(Debug, Clone)]
pub struct BulkLoader {
    schema: String,
    batch_size: usize,
}

impl BulkLoader {
    pub fn new(schema: impl Into<String>, batch_size: usize) -> Self {
        Self {
            schema: schema.into(),
            batch_size: batch_size.max(1),
        }
    }

    /// Load one unit.
    ///
    /// Source read errors abort the unit. Sink batch errors are recorded as
    /// [`Defect::BatchLoad`] and the next window is read.
    pub async fn load(
        &self,
        source: &mut dyn SourceReader,
        sink: &mut dyn TargetWriter,
        unit: &LoadUnit,
    ) -> Result<LoadOutcome> {
        let start = Instant::now();
        let label = unit.label();
        let mut outcome = LoadOutcome::default();

        if unit.estimated_rows() == 0 {
            debug!("{}: no rows, nothing to load", label);
            return Ok(outcome);
        }

        let query = unit.page_query()?;
        let sink_table = unit.table.sink_name();
        let sink_columns = unit.table.sink_column_names();
        let chunk_label = unit.chunk.as_ref().map(ChunkSpec::label);
        let mut transcoder = RowTranscoder::new(&unit.table);
        let mut progress = ProgressTracker::new(&label, unit.estimated_rows());

        if query.order_by.is_none() {
            warn!("{}: no primary key, page order is not guaranteed", label);
        }
        info!(
            "{}: loading ~{} rows in batches of {}",
            label,
            unit.estimated_rows(),
            self.batch_size
        );

        let mut offset: u64 = 0;
        loop {
            let rows = source.fetch_page(&query, offset, self.batch_size).await?;
            let fetched = rows.len();
            if fetched == 0 {
                break;
            }

            let batch = LoadBatch::from_rows(&mut transcoder, sink_columns.clone(), &rows);
            drop(rows);
            outcome.batches += 1;
            outcome.rows_attempted += fetched as u64;

            match sink
                .copy_in(&self.schema, &sink_table, &batch.columns, batch.encode())
                .await
            {
                Ok(loaded) => outcome.rows_loaded += loaded,
                Err(e) => {
                    let err = MigrateError::BatchLoad {
                        table: label.clone(),
                        offset,
                        message: e.to_string(),
                    };
                    warn!("{} ({} rows skipped)", err, fetched);
                    outcome.batches_failed += 1;
                    outcome.defects.push(Defect::BatchLoad {
                        chunk: chunk_label.clone(),
                        offset,
                        rows: fetched,
                        message: e.to_string(),
                    });
                }
            }

            progress.update(outcome.rows_attempted);
            offset += fetched as u64;
            if fetched < self.batch_size {
                break;
            }
        }

        for defect in transcoder.take_defects() {
            warn!("{}: {}", label, defect);
            outcome.defects.push(defect);
        }
        outcome.elapsed = start.elapsed();

        info!(
            "{}: loaded {}/{} rows in {:.1}s ({} of {} batches failed)",
            label,
            outcome.rows_loaded,
            outcome.rows_attempted,
            outcome.elapsed.as_secs_f64(),
            outcome.batches_failed,
            outcome.batches
        );
        Ok(outcome)
    }
}

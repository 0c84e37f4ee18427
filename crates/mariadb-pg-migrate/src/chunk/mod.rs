//! Year-based chunk planning for large tables.

use tracing::{info, warn};

use crate::core::schema::{ChunkPredicate, ChunkSpec, Table};
use crate::core::traits::SourceReader;

/// How a table is split for loading.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkPlan {
    /// Load the table as one unit.
    Single,
    /// Load each chunk as an independent unit.
    Chunked(Vec<ChunkSpec>),
}

impl ChunkPlan {
    pub fn is_chunked(&self) -> bool {
        matches!(self, ChunkPlan::Chunked(_))
    }

    pub fn chunk_count(&self) -> usize {
        match self {
            ChunkPlan::Single => 1,
            ChunkPlan::Chunked(chunks) => chunks.len(),
        }
    }
}

/// Decides whether and how to split a table.
pub struct ChunkPlanner;

impl ChunkPlanner {
    /// Plan a table.
    ///
    /// Only tables at or above `threshold` rows are considered. A histogram
    /// failure degrades to [`ChunkPlan::Single`]; planning never fails.
    pub async fn plan(source: &mut dyn SourceReader, table: &Table, threshold: i64) -> ChunkPlan {
        if !table.is_large(threshold) {
            return ChunkPlan::Single;
        }

        let column = match table.find_chunk_column() {
            Some(c) => c.name.clone(),
            None => {
                info!(
                    "{}: {} rows but no date column to chunk on, loading as one unit",
                    table.name, table.row_count
                );
                return ChunkPlan::Single;
            }
        };

        let histogram = match source.year_histogram(&table.name, &column).await {
            Ok(h) => h,
            Err(e) => {
                warn!(
                    "{}: year histogram on {} failed, loading as one unit: {}",
                    table.name, column, e
                );
                return ChunkPlan::Single;
            }
        };

        let plan = plan_from_histogram(&table.name, &column, histogram);
        if let ChunkPlan::Chunked(chunks) = &plan {
            info!(
                "{}: {} rows split into {} chunks on {}",
                table.name,
                table.row_count,
                chunks.len(),
                column
            );
        }
        plan
    }
}

/// Turn a `YEAR(column)` histogram into a plan.
///
/// One chunk per year in ascending order, then one `YearIsNull` chunk when
/// NULL-year rows exist. Year 0 (zero dates) is its own chunk but does not
/// count towards the distinct years needed to split.
pub fn plan_from_histogram(
    table: &str,
    column: &str,
    histogram: Vec<(Option<i32>, i64)>,
) -> ChunkPlan {
    let mut years: Vec<(i32, i64)> = Vec::new();
    let mut null_rows = 0i64;

    for (year, count) in histogram {
        match year {
            Some(y) => match years.iter_mut().find(|(existing, _)| *existing == y) {
                Some(entry) => entry.1 += count,
                None => years.push((y, count)),
            },
            None => null_rows += count,
        }
    }
    years.sort_by_key(|(y, _)| *y);

    let real_years = years.iter().filter(|(y, _)| *y > 0).count();
    if real_years <= 1 {
        return ChunkPlan::Single;
    }

    let spec = |predicate, estimated_rows| ChunkSpec {
        table: table.to_string(),
        column: column.to_string(),
        predicate,
        estimated_rows,
    };

    let mut chunks: Vec<ChunkSpec> = years
        .into_iter()
        .map(|(y, count)| spec(ChunkPredicate::Year(y), count))
        .collect();
    if null_rows > 0 {
        chunks.push(spec(ChunkPredicate::YearIsNull, null_rows));
    }

    ChunkPlan::Chunked(chunks)
}

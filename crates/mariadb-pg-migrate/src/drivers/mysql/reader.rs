//! MariaDB/MySQL source session.
//!
//! Implements [`SourceReader`] over one pooled sqlx connection. Catalog
//! reads go through INFORMATION_SCHEMA with string columns cast to CHAR so
//! collation and BLOB-typed catalog columns decode uniformly.
//!
//! Row values are selected through a per-column expression chosen by
//! [`column_read_plan`]: integers are widened to 64 bits, and dates,
//! decimals, JSON and enums are read as their source text. Zero dates
//! therefore reach the transcoder intact instead of failing to decode.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow, MySqlSslMode};
use sqlx::pool::PoolConnection;
use sqlx::{Executor, MySql, Row, ValueRef};
use tracing::{debug, info};

use crate::config::{MigrationConfig, SourceConfig};
use crate::core::identifier::quote_mysql;
use crate::core::schema::Column;
use crate::core::traits::{DescribeRow, ForeignKeyRow, IndexRow, PageQuery, SourceReader};
use crate::core::value::{SourceRow, SourceValue};
use crate::error::{MigrateError, Result};

/// How a selected column is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeKind {
    Signed,
    Unsigned,
    Float,
    Double,
    Decimal,
    Temporal,
    Text,
    Bytes,
}

/// Select expression and decode kind for one column.
pub fn column_read_plan(column: &Column) -> Result<(String, DecodeKind)> {
    let col = quote_mysql(&column.name)?;
    let lower = column.source_type.to_lowercase();
    let unsigned = lower.split_whitespace().any(|w| w == "unsigned");

    let plan = match column.base_type().as_str() {
        "tinyint" | "smallint" | "mediumint" | "int" | "integer" | "bigint" if unsigned => {
            (format!("CAST({} AS UNSIGNED)", col), DecodeKind::Unsigned)
        }
        "tinyint" | "smallint" | "mediumint" | "int" | "integer" | "bigint" | "bool"
        | "boolean" | "year" => (format!("CAST({} AS SIGNED)", col), DecodeKind::Signed),
        "bit" => (format!("CAST({} AS UNSIGNED)", col), DecodeKind::Unsigned),
        "float" => (col, DecodeKind::Float),
        "double" | "real" => (col, DecodeKind::Double),
        "decimal" | "numeric" => (format!("CAST({} AS CHAR)", col), DecodeKind::Decimal),
        "date" | "datetime" | "timestamp" | "time" => {
            (format!("CAST({} AS CHAR)", col), DecodeKind::Temporal)
        }
        "binary" | "varbinary" | "tinyblob" | "blob" | "mediumblob" | "longblob" => {
            (col, DecodeKind::Bytes)
        }
        "char" | "varchar" | "tinytext" | "text" | "mediumtext" | "longtext" => {
            (col, DecodeKind::Text)
        }
        _ => (format!("CAST({} AS CHAR)", col), DecodeKind::Text),
    };
    Ok(plan)
}

/// Build the SELECT for one page.
pub fn build_page_sql(query: &PageQuery, offset: u64, limit: usize) -> Result<String> {
    let exprs = query
        .columns
        .iter()
        .map(|c| column_read_plan(c).map(|(expr, _)| expr))
        .collect::<Result<Vec<_>>>()?;

    let mut sql = format!(
        "SELECT {} FROM {}",
        exprs.join(", "),
        quote_mysql(&query.table)?
    );
    if let Some(filter) = &query.filter {
        sql.push_str(" WHERE ");
        sql.push_str(filter);
    }
    if let Some(order_by) = &query.order_by {
        sql.push_str(" ORDER BY ");
        sql.push_str(order_by);
    }
    sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset));
    Ok(sql)
}

/// Statement run on every new source connection.
pub fn session_setup_sql(query_timeout_secs: u64) -> String {
    format!(
        "SET SESSION net_read_timeout = {t}, net_write_timeout = {t}, wait_timeout = {t}",
        t = query_timeout_secs
    )
}

/// Create the source connection pool.
pub async fn connect_pool(
    config: &SourceConfig,
    migration: &MigrationConfig,
    max_conns: usize,
) -> Result<MySqlPool> {
    let options = MySqlConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .database(&config.database)
        .username(&config.user)
        .password(&config.password)
        .ssl_mode(MySqlSslMode::Preferred);

    let setup = session_setup_sql(migration.source_query_timeout_secs);
    let pool = MySqlPoolOptions::new()
        .max_connections(max_conns as u32)
        .acquire_timeout(Duration::from_secs(migration.source_connect_timeout_secs))
        .after_connect(move |conn, _meta| {
            let setup = setup.clone();
            Box::pin(async move {
                conn.execute(setup.as_str()).await?;
                Ok(())
            })
        })
        .connect_with(options)
        .await
        .map_err(|e| MigrateError::pool(e, "creating MariaDB source pool"))?;

    info!(
        "Connected to MariaDB source: {}:{}/{} (max {} connections)",
        config.host, config.port, config.database, max_conns
    );
    Ok(pool)
}

/// One exclusive source session.
pub struct MysqlSession {
    conn: PoolConnection<MySql>,
}

impl MysqlSession {
    pub fn new(conn: PoolConnection<MySql>) -> Self {
        Self { conn }
    }

    /// Check out a session from the pool.
    pub async fn acquire(pool: &MySqlPool) -> Result<Self> {
        let conn = pool
            .acquire()
            .await
            .map_err(|e| MigrateError::pool(e, "acquiring MariaDB source connection"))?;
        Ok(Self::new(conn))
    }

    fn decode_row(row: &MySqlRow, kinds: &[DecodeKind]) -> SourceRow {
        kinds
            .iter()
            .enumerate()
            .map(|(i, kind)| decode_value(row, i, *kind))
            .collect::<Vec<_>>()
            .into()
    }
}

fn decode_value(row: &MySqlRow, i: usize, kind: DecodeKind) -> SourceValue {
    let is_null = row.try_get_raw(i).map(|r| r.is_null()).unwrap_or(false);
    if is_null {
        return SourceValue::Null;
    }

    let decoded = match kind {
        DecodeKind::Signed => row.try_get::<i64, _>(i).map(SourceValue::Int),
        DecodeKind::Unsigned => row.try_get::<u64, _>(i).map(SourceValue::UInt),
        DecodeKind::Float => row.try_get::<f32, _>(i).map(SourceValue::Float),
        DecodeKind::Double => row.try_get::<f64, _>(i).map(SourceValue::Double),
        DecodeKind::Decimal => row.try_get::<String, _>(i).map(SourceValue::Decimal),
        DecodeKind::Temporal => row.try_get::<String, _>(i).map(SourceValue::Temporal),
        DecodeKind::Bytes => row.try_get::<Vec<u8>, _>(i).map(SourceValue::Bytes),
        DecodeKind::Text => row.try_get::<String, _>(i).map(SourceValue::Text).or_else(|_| {
            row.try_get_unchecked::<Vec<u8>, _>(i)
                .map(|b| SourceValue::Text(String::from_utf8_lossy(&b).into_owned()))
        }),
    };

    decoded.unwrap_or_else(|e| SourceValue::Invalid(e.to_string()))
}

#[async_trait]
impl SourceReader for MysqlSession {
    async fn ping(&mut self) -> Result<()> {
        sqlx::query("SELECT 1").fetch_one(&mut *self.conn).await?;
        Ok(())
    }

    async fn list_tables(&mut self, pattern: Option<&str>) -> Result<Vec<String>> {
        let mut sql = String::from(
            "SELECT CAST(TABLE_NAME AS CHAR(255)) AS TABLE_NAME \
             FROM INFORMATION_SCHEMA.TABLES \
             WHERE TABLE_SCHEMA = DATABASE() AND TABLE_TYPE = 'BASE TABLE'",
        );
        if pattern.is_some() {
            sql.push_str(" AND TABLE_NAME LIKE ?");
        }
        sql.push_str(" ORDER BY TABLE_NAME");

        let mut query = sqlx::query(&sql);
        if let Some(p) = pattern {
            query = query.bind(p);
        }
        let rows = query.fetch_all(&mut *self.conn).await?;
        rows.iter()
            .map(|r| r.try_get::<String, _>("TABLE_NAME").map_err(Into::into))
            .collect()
    }

    async fn table_exists(&mut self, table: &str) -> Result<bool> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM INFORMATION_SCHEMA.TABLES \
             WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?",
        )
        .bind(table)
        .fetch_one(&mut *self.conn)
        .await?;
        Ok(row.try_get::<i64, _>("n")? > 0)
    }

    async fn describe_columns(&mut self, table: &str) -> Result<Vec<DescribeRow>> {
        let rows = sqlx::query(
            r#"
            SELECT
                CAST(COLUMN_NAME AS CHAR(255)) AS field,
                CAST(COLUMN_TYPE AS CHAR(1024)) AS column_type,
                CAST(IS_NULLABLE AS CHAR(3)) AS is_null,
                CAST(COLUMN_KEY AS CHAR(3)) AS column_key
            FROM INFORMATION_SCHEMA.COLUMNS
            WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?
            ORDER BY ORDINAL_POSITION
            "#,
        )
        .bind(table)
        .fetch_all(&mut *self.conn)
        .await?;

        rows.iter()
            .map(|r| {
                Ok(DescribeRow {
                    field: r.try_get("field")?,
                    column_type: r.try_get("column_type")?,
                    null: r.try_get("is_null")?,
                    key: r.try_get("column_key")?,
                })
            })
            .collect()
    }

    async fn list_indexes(&mut self, table: &str) -> Result<Vec<IndexRow>> {
        let rows = sqlx::query(
            r#"
            SELECT
                CAST(INDEX_NAME AS CHAR(255)) AS index_name,
                CAST(NON_UNIQUE AS SIGNED) AS non_unique,
                CAST(COLUMN_NAME AS CHAR(255)) AS column_name,
                CAST(SEQ_IN_INDEX AS SIGNED) AS seq_in_index
            FROM INFORMATION_SCHEMA.STATISTICS
            WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?
            ORDER BY INDEX_NAME, SEQ_IN_INDEX
            "#,
        )
        .bind(table)
        .fetch_all(&mut *self.conn)
        .await?;

        rows.iter()
            .map(|r| {
                Ok(IndexRow {
                    index_name: r.try_get("index_name")?,
                    non_unique: r.try_get::<i64, _>("non_unique")? != 0,
                    column_name: r.try_get("column_name")?,
                    seq_in_index: r.try_get::<i64, _>("seq_in_index")? as u32,
                })
            })
            .collect()
    }

    async fn list_foreign_keys(&mut self, table: &str) -> Result<Vec<ForeignKeyRow>> {
        let rows = sqlx::query(
            r#"
            SELECT
                CAST(CONSTRAINT_NAME AS CHAR(255)) AS constraint_name,
                CAST(COLUMN_NAME AS CHAR(255)) AS column_name,
                CAST(REFERENCED_TABLE_NAME AS CHAR(255)) AS referenced_table,
                CAST(REFERENCED_COLUMN_NAME AS CHAR(255)) AS referenced_column,
                CAST(ORDINAL_POSITION AS SIGNED) AS ordinal
            FROM INFORMATION_SCHEMA.KEY_COLUMN_USAGE
            WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?
              AND REFERENCED_TABLE_NAME IS NOT NULL
            ORDER BY CONSTRAINT_NAME, ORDINAL_POSITION
            "#,
        )
        .bind(table)
        .fetch_all(&mut *self.conn)
        .await?;

        rows.iter()
            .map(|r| {
                Ok(ForeignKeyRow {
                    constraint_name: r.try_get("constraint_name")?,
                    column_name: r.try_get("column_name")?,
                    referenced_table: r.try_get("referenced_table")?,
                    referenced_column: r.try_get("referenced_column")?,
                    ordinal: r.try_get::<i64, _>("ordinal")? as u32,
                })
            })
            .collect()
    }

    async fn row_count(&mut self, table: &str, filter: Option<&str>) -> Result<i64> {
        let mut sql = format!("SELECT COUNT(*) AS n FROM {}", quote_mysql(table)?);
        if let Some(f) = filter {
            sql.push_str(" WHERE ");
            sql.push_str(f);
        }
        let row = sqlx::query(&sql).fetch_one(&mut *self.conn).await?;
        Ok(row.try_get::<i64, _>("n")?)
    }

    async fn year_histogram(
        &mut self,
        table: &str,
        column: &str,
    ) -> Result<Vec<(Option<i32>, i64)>> {
        let col = quote_mysql(column)?;
        let sql = format!(
            "SELECT CAST(YEAR({c}) AS SIGNED) AS y, COUNT(*) AS n FROM {t} GROUP BY YEAR({c})",
            c = col,
            t = quote_mysql(table)?
        );
        debug!("Year histogram: {}", sql);
        let rows = sqlx::query(&sql).fetch_all(&mut *self.conn).await?;
        rows.iter()
            .map(|r| {
                let year: Option<i64> = r.try_get("y")?;
                let count: i64 = r.try_get("n")?;
                Ok((year.map(|y| y as i32), count))
            })
            .collect()
    }

    async fn fetch_page(
        &mut self,
        query: &PageQuery,
        offset: u64,
        limit: usize,
    ) -> Result<Vec<SourceRow>> {
        let kinds = query
            .columns
            .iter()
            .map(|c| column_read_plan(c).map(|(_, kind)| kind))
            .collect::<Result<Vec<_>>>()?;
        let sql = build_page_sql(query, offset, limit)?;

        let rows = sqlx::query(&sql).fetch_all(&mut *self.conn).await?;
        Ok(rows.iter().map(|r| Self::decode_row(r, &kinds)).collect())
    }
}

//! PostgreSQL sink session.
//!
//! Implements [`TargetWriter`] over one pooled deadpool-postgres client.
//! Statement text is produced by the `*_sql` builders below so the DDL can
//! be checked without a server.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use futures::SinkExt;
use tokio_postgres::Config as PgConfig;
use tracing::{debug, info, warn};

use crate::config::TargetConfig;
use crate::core::identifier::{
    primary_key_name, qualify_pg, quote_pg, quote_pg_list, truncate_pg_identifier,
};
use crate::core::schema::{Column, ForeignKey, Index, ProvisionMode, Table};
use crate::core::traits::TargetWriter;
use crate::drivers::common::TlsBuilder;
use crate::error::{MigrateError, Result};

/// Connection timeout for new sink connections.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Create the sink connection pool.
pub async fn connect_pool(config: &TargetConfig, max_conns: usize) -> Result<Pool> {
    let mut pg_config = PgConfig::new();
    pg_config.host(&config.host);
    pg_config.port(config.port);
    pg_config.dbname(&config.database);
    pg_config.user(&config.user);
    pg_config.password(&config.password);
    pg_config.application_name("mariadb-pg-migrate");

    // Long COPYs sit idle on the client side between pages
    pg_config.keepalives(true);
    pg_config.keepalives_idle(Duration::from_secs(30));
    pg_config.connect_timeout(CONNECT_TIMEOUT);

    let mgr_config = ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    };

    let mgr = match TlsBuilder::parse(&config.ssl_mode)?.build()? {
        Some(tls) => Manager::from_config(pg_config, tls, mgr_config),
        None => {
            warn!("PostgreSQL TLS is disabled. Credentials will be transmitted in plaintext.");
            Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config)
        }
    };

    let pool = Pool::builder(mgr)
        .max_size(max_conns)
        .build()
        .map_err(|e| MigrateError::pool(e, "creating PostgreSQL sink pool"))?;

    info!(
        "PostgreSQL sink pool ready: {}:{}/{} (max {} connections)",
        config.host, config.port, config.database, max_conns
    );
    Ok(pool)
}

// ===== Statement builders =====

/// Column definition for CREATE TABLE and ADD COLUMN.
///
/// Columns are created nullable so a value converted to NULL cannot reject
/// its batch. NOT NULL comes back at finalize.
fn column_def(column: &Column) -> Result<String> {
    Ok(format!(
        "{} {}",
        quote_pg(&column.sink_name())?,
        column.sink_type
    ))
}

pub fn create_table_sql(schema: &str, table: &Table, mode: ProvisionMode) -> Result<String> {
    let mut defs = table
        .columns
        .iter()
        .map(column_def)
        .collect::<Result<Vec<_>>>()?;

    if mode == ProvisionMode::Durable && table.has_pk() {
        defs.push(format!(
            "PRIMARY KEY ({})",
            quote_pg_list(&table.sink_primary_key())?
        ));
    }

    let unlogged = match mode {
        ProvisionMode::FastLoad => "UNLOGGED ",
        ProvisionMode::Durable => "",
    };

    Ok(format!(
        "CREATE {}TABLE {} (\n    {}\n)",
        unlogged,
        qualify_pg(schema, &table.sink_name())?,
        defs.join(",\n    ")
    ))
}

pub fn add_column_sql(schema: &str, table: &str, column: &Column) -> Result<String> {
    Ok(format!(
        "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {}",
        qualify_pg(schema, table)?,
        column_def(column)?
    ))
}

pub fn drop_column_sql(schema: &str, table: &str, column: &str) -> Result<String> {
    Ok(format!(
        "ALTER TABLE {} DROP COLUMN IF EXISTS {}",
        qualify_pg(schema, table)?,
        quote_pg(column)?
    ))
}

pub fn set_logged_sql(schema: &str, table: &str) -> Result<String> {
    Ok(format!("ALTER TABLE {} SET LOGGED", qualify_pg(schema, table)?))
}

pub fn set_not_null_sql(schema: &str, table: &str, column: &str) -> Result<String> {
    Ok(format!(
        "ALTER TABLE {} ALTER COLUMN {} SET NOT NULL",
        qualify_pg(schema, table)?,
        quote_pg(column)?
    ))
}

pub fn add_primary_key_sql(schema: &str, table: &str, columns: &[String]) -> Result<String> {
    Ok(format!(
        "ALTER TABLE {} ADD CONSTRAINT {} PRIMARY KEY ({})",
        qualify_pg(schema, table)?,
        quote_pg(&primary_key_name(table))?,
        quote_pg_list(columns)?
    ))
}

pub fn create_index_sql(schema: &str, table: &str, index: &Index) -> Result<String> {
    let columns: Vec<String> = index.columns.iter().map(|c| c.to_lowercase()).collect();
    let unique = if index.is_unique { "UNIQUE " } else { "" };
    Ok(format!(
        "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
        unique,
        quote_pg(&index.sink_name(table))?,
        qualify_pg(schema, table)?,
        quote_pg_list(&columns)?
    ))
}

pub fn create_foreign_key_sql(schema: &str, table: &str, fk: &ForeignKey) -> Result<String> {
    let lower = |cols: &[String]| cols.iter().map(|c| c.to_lowercase()).collect::<Vec<_>>();
    let name = truncate_pg_identifier(&format!("{}_{}", table, fk.name).to_lowercase());
    Ok(format!(
        "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
        qualify_pg(schema, table)?,
        quote_pg(&name)?,
        quote_pg_list(&lower(&fk.columns))?,
        qualify_pg(schema, &fk.ref_table.to_lowercase())?,
        quote_pg_list(&lower(&fk.ref_columns))?
    ))
}

pub fn copy_sql(schema: &str, table: &str, columns: &[String]) -> Result<String> {
    Ok(format!(
        "COPY {} ({}) FROM STDIN WITH (FORMAT text, NULL '\\N')",
        qualify_pg(schema, table)?,
        quote_pg_list(columns)?
    ))
}

/// Statements that drop and recreate a schema owned by `owner`.
pub fn reset_schema_sql(schema: &str, owner: &str) -> Result<Vec<String>> {
    let quoted = quote_pg(schema)?;
    Ok(vec![
        format!("DROP SCHEMA IF EXISTS {} CASCADE", quoted),
        format!("CREATE SCHEMA {}", quoted),
        format!("ALTER SCHEMA {} OWNER TO {}", quoted, quote_pg(owner)?),
    ])
}

// ===== Session =====

/// One exclusive sink session.
pub struct PgSession {
    client: Object,
}

impl PgSession {
    pub fn new(client: Object) -> Self {
        Self { client }
    }

    /// Check out a session from the pool.
    pub async fn acquire(pool: &Pool) -> Result<Self> {
        let client = pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, "acquiring PostgreSQL sink connection"))?;
        Ok(Self::new(client))
    }

    async fn exec(&mut self, sql: &str) -> Result<()> {
        debug!("{}", sql);
        self.client.batch_execute(sql).await?;
        Ok(())
    }
}

#[async_trait]
impl TargetWriter for PgSession {
    async fn ping(&mut self) -> Result<()> {
        self.client.simple_query("SELECT 1").await?;
        Ok(())
    }

    async fn create_schema(&mut self, schema: &str) -> Result<()> {
        let sql = format!("CREATE SCHEMA IF NOT EXISTS {}", quote_pg(schema)?);
        self.exec(&sql).await
    }

    async fn reset_schema(&mut self, schema: &str, owner: &str) -> Result<()> {
        warn!("Dropping schema {} and everything in it", schema);
        for sql in reset_schema_sql(schema, owner)? {
            self.exec(&sql).await?;
        }
        info!("Schema {} recreated, owner {}", schema, owner);
        Ok(())
    }

    async fn table_exists(&mut self, schema: &str, table: &str) -> Result<bool> {
        let row = self
            .client
            .query_one(
                "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
                 WHERE table_schema = $1 AND table_name = $2)",
                &[&schema, &table],
            )
            .await?;
        Ok(row.get::<_, bool>(0))
    }

    async fn column_names(&mut self, schema: &str, table: &str) -> Result<Vec<String>> {
        let rows = self
            .client
            .query(
                "SELECT column_name::text FROM information_schema.columns \
                 WHERE table_schema = $1 AND table_name = $2 ORDER BY ordinal_position",
                &[&schema, &table],
            )
            .await?;
        Ok(rows.iter().map(|r| r.get::<_, String>(0)).collect())
    }

    async fn create_table(
        &mut self,
        schema: &str,
        table: &Table,
        mode: ProvisionMode,
    ) -> Result<()> {
        let sql = create_table_sql(schema, table, mode)?;
        self.exec(&sql).await
    }

    async fn add_column(&mut self, schema: &str, table: &str, column: &Column) -> Result<()> {
        let sql = add_column_sql(schema, table, column)?;
        self.exec(&sql).await
    }

    async fn drop_column(&mut self, schema: &str, table: &str, column: &str) -> Result<()> {
        let sql = drop_column_sql(schema, table, column)?;
        self.exec(&sql).await
    }

    async fn set_logged(&mut self, schema: &str, table: &str) -> Result<()> {
        let sql = set_logged_sql(schema, table)?;
        self.exec(&sql).await
    }

    async fn set_not_null(&mut self, schema: &str, table: &str, column: &str) -> Result<()> {
        let sql = set_not_null_sql(schema, table, column)?;
        self.exec(&sql).await
    }

    async fn has_primary_key(&mut self, schema: &str, table: &str) -> Result<bool> {
        let sql = r#"
            SELECT EXISTS (
                SELECT 1 FROM pg_catalog.pg_index ix
                JOIN pg_catalog.pg_class t ON t.oid = ix.indrelid
                JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
                WHERE n.nspname = $1 AND t.relname = $2 AND ix.indisprimary
            )
        "#;
        let row = self.client.query_one(sql, &[&schema, &table]).await?;
        Ok(row.get::<_, bool>(0))
    }

    async fn add_primary_key(
        &mut self,
        schema: &str,
        table: &str,
        columns: &[String],
    ) -> Result<()> {
        let sql = add_primary_key_sql(schema, table, columns)?;
        self.exec(&sql).await
    }

    async fn create_index(&mut self, schema: &str, table: &str, index: &Index) -> Result<()> {
        let sql = create_index_sql(schema, table, index)?;
        self.exec(&sql).await
    }

    async fn create_foreign_key(
        &mut self,
        schema: &str,
        table: &str,
        fk: &ForeignKey,
    ) -> Result<()> {
        let sql = create_foreign_key_sql(schema, table, fk)?;
        self.exec(&sql).await
    }

    async fn copy_in(
        &mut self,
        schema: &str,
        table: &str,
        columns: &[String],
        payload: Bytes,
    ) -> Result<u64> {
        let sql = copy_sql(schema, table, columns)?;
        let tx = self.client.transaction().await?;

        let sink = tx.copy_in(&sql).await?;
        tokio::pin!(sink);
        sink.send(payload).await?;
        let rows = sink.as_mut().finish().await?;

        tx.commit().await?;
        Ok(rows)
    }

    async fn row_count(&mut self, schema: &str, table: &str) -> Result<i64> {
        let sql = format!("SELECT COUNT(*)::int8 FROM {}", qualify_pg(schema, table)?);
        let row = self.client.query_one(&sql, &[]).await?;
        Ok(row.get::<_, i64>(0))
    }
}

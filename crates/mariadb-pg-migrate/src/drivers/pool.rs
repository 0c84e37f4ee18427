//! Pool-backed connection provider.

use async_trait::async_trait;
use deadpool_postgres::Pool;
use sqlx::MySqlPool;
use tracing::info;

use crate::config::{Config, MigrationConfig, SourceConfig, TargetConfig};
use crate::core::traits::{ConnectionProvider, SourceReader, TargetWriter};
use crate::drivers::mysql::{self, MysqlSession};
use crate::drivers::postgres::{self, PgSession};
use crate::error::Result;

/// Owns one MariaDB pool and one PostgreSQL pool of the same size.
///
/// Both pools are sized so every table task, every chunk task and the schema
/// preparation step can hold a connection at the same time.
pub struct PoolProvider {
    source: MySqlPool,
    sink: Pool,
}

impl PoolProvider {
    /// Connect both pools for one logical source database.
    pub async fn connect(config: &Config, source_name: &str) -> Result<Self> {
        let source = config.source(source_name)?;
        Self::connect_with(source, &config.target, &config.migration).await
    }

    pub async fn connect_with(
        source: &SourceConfig,
        target: &TargetConfig,
        migration: &MigrationConfig,
    ) -> Result<Self> {
        let max_conns = migration.max_connections();
        info!("Sizing connection pools to {} connections each", max_conns);

        let source_pool = mysql::connect_pool(source, migration, max_conns).await?;
        let sink_pool = postgres::connect_pool(target, max_conns).await?;

        Ok(Self {
            source: source_pool,
            sink: sink_pool,
        })
    }

    /// Close the source pool. Sink connections close when dropped.
    pub async fn close(&self) {
        self.source.close().await;
        self.sink.close();
    }
}

#[async_trait]
impl ConnectionProvider for PoolProvider {
    async fn acquire_source(&self) -> Result<Box<dyn SourceReader>> {
        Ok(Box::new(MysqlSession::acquire(&self.source).await?))
    }

    async fn acquire_sink(&self) -> Result<Box<dyn TargetWriter>> {
        Ok(Box::new(PgSession::acquire(&self.sink).await?))
    }
}

//! Database drivers.
//!
//! - [`mysql`]: MariaDB source sessions over sqlx
//! - [`postgres`]: PostgreSQL sink sessions over deadpool-postgres
//! - [`common`]: TLS setup shared by the sink pool
//! - [`pool`]: the [`PoolProvider`] that pairs a source and a sink session

pub mod common;
pub mod mysql;
pub mod pool;
pub mod postgres;

pub use common::{SslMode, TlsBuilder};
pub use mysql::MysqlSession;
pub use pool::PoolProvider;
pub use postgres::PgSession;

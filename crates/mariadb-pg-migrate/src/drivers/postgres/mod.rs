//! PostgreSQL sink driver.
//!
//! Connections come from a deadpool-postgres pool; each [`PgSession`] owns
//! one of them exclusively. Data is loaded with COPY text format.

mod writer;

pub use writer::{
    add_column_sql, add_primary_key_sql, connect_pool, copy_sql, create_foreign_key_sql,
    create_index_sql, create_table_sql, drop_column_sql, reset_schema_sql, set_logged_sql,
    set_not_null_sql, PgSession,
};

//! MariaDB/MySQL source driver.
//!
//! Supports MariaDB 10.2+ and MySQL 5.7+. Connections come from a sqlx
//! pool; each [`MysqlSession`] owns one of them exclusively.

mod reader;

pub use reader::{
    build_page_sql, column_read_plan, connect_pool, session_setup_sql, DecodeKind, MysqlSession,
};

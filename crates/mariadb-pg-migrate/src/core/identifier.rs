//! Identifier validation and quoting.
//!
//! Table, column and schema names cannot be bound as statement parameters,
//! so every name that ends up in generated SQL goes through this module.
//! MariaDB names are quoted with backticks, PostgreSQL names with double
//! quotes. Both reject empty names, NUL bytes and names longer than
//! [`MAX_IDENTIFIER_LENGTH`].

use crate::error::{MigrateError, Result};

/// Maximum identifier length accepted before quoting.
const MAX_IDENTIFIER_LENGTH: usize = 128;

/// PostgreSQL truncates identifiers to this many bytes (NAMEDATALEN - 1).
pub const PG_MAX_IDENTIFIER_BYTES: usize = 63;

/// Validate an identifier for security issues.
///
/// # Errors
///
/// Returns `MigrateError::Config` for empty names, names containing NUL and
/// names longer than the limit.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(MigrateError::Config(
            "Identifier cannot be empty".to_string(),
        ));
    }

    if name.contains('\0') {
        return Err(MigrateError::Config(format!(
            "SECURITY: Identifier contains null byte (possible injection attempt): {:?}",
            name
        )));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(MigrateError::Config(format!(
            "SECURITY: Identifier exceeds maximum length of {} bytes (got {} bytes): {:?}",
            MAX_IDENTIFIER_LENGTH,
            name.len(),
            name
        )));
    }

    Ok(())
}

/// Quote a PostgreSQL identifier.
///
/// ```ignore
/// assert_eq!(quote_pg("t_order")?, "\"t_order\"");
/// assert_eq!(quote_pg("odd\"name")?, "\"odd\"\"name\"");
/// ```
pub fn quote_pg(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Quote a MariaDB identifier using backticks.
///
/// ```ignore
/// assert_eq!(quote_mysql("T_ORDER")?, "`T_ORDER`");
/// ```
pub fn quote_mysql(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("`{}`", name.replace('`', "``")))
}

/// Qualify a PostgreSQL table name with its schema.
pub fn qualify_pg(schema: &str, table: &str) -> Result<String> {
    Ok(format!("{}.{}", quote_pg(schema)?, quote_pg(table)?))
}

/// Qualify a MariaDB table name with its database.
pub fn qualify_mysql(database: &str, table: &str) -> Result<String> {
    Ok(format!("{}.{}", quote_mysql(database)?, quote_mysql(table)?))
}

/// Quote and join a list of PostgreSQL column names.
pub fn quote_pg_list(names: &[String]) -> Result<String> {
    let quoted = names
        .iter()
        .map(|n| quote_pg(n))
        .collect::<Result<Vec<_>>>()?;
    Ok(quoted.join(", "))
}

/// Name PostgreSQL gives a table's primary key constraint.
pub fn primary_key_name(table: &str) -> String {
    truncate_pg_identifier(&format!("{}_pkey", table))
}

/// Truncate a generated name to the PostgreSQL identifier limit.
///
/// Cuts on a character boundary so multi-byte names stay valid UTF-8.
pub fn truncate_pg_identifier(name: &str) -> String {
    if name.len() <= PG_MAX_IDENTIFIER_BYTES {
        return name.to_string();
    }
    let mut cut = PG_MAX_IDENTIFIER_BYTES;
    while !name.is_char_boundary(cut) {
        cut -= 1;
    }
    name[..cut].to_string()
}

//! Type mapping between MariaDB and PostgreSQL.

use tracing::warn;

use crate::core::schema::base_type;
use crate::core::traits::TypeMapping;

/// Sink type used for anything not recognized.
pub const FALLBACK_TYPE: &str = "text";

/// Map a MariaDB column type (as reported by DESCRIBE) to PostgreSQL.
///
/// The result depends on the type string alone. Unrecognized types map to
/// `text` with `fallback` set.
pub fn map_type(source_type: &str) -> TypeMapping {
    let lower = source_type.trim().to_lowercase();
    let base = base_type(&lower);
    let params = type_params(&lower);
    let unsigned = lower.split_whitespace().any(|w| w == "unsigned");

    // Narrow flag types
    if matches!(base.as_str(), "tinyint" | "bit") && params == Some("1") {
        return TypeMapping::exact("boolean");
    }

    let mapped = match base.as_str() {
        // Integer types, widened when unsigned
        "tinyint" => "smallint".to_string(),
        "smallint" | "mediumint" if unsigned => "integer".to_string(),
        "smallint" => "smallint".to_string(),
        "mediumint" => "integer".to_string(),
        "int" | "integer" if unsigned => "bigint".to_string(),
        "int" | "integer" => "integer".to_string(),
        "bigint" if unsigned => "numeric(20)".to_string(),
        "bigint" => "bigint".to_string(),
        "bit" => "bigint".to_string(),
        "bool" | "boolean" => "boolean".to_string(),
        "year" => "smallint".to_string(),

        // Exact and approximate numerics
        "decimal" | "numeric" => with_params("numeric", params),
        "float" => "real".to_string(),
        "double" | "real" => "double precision".to_string(),

        // Date/time types
        "date" => "date".to_string(),
        "datetime" => "timestamp".to_string(),
        "timestamp" => "timestamptz".to_string(),
        "time" => "time".to_string(),

        // String types
        "char" | "varchar" => with_params("varchar", params),
        "tinytext" | "text" | "mediumtext" | "longtext" => "text".to_string(),
        "enum" | "set" => "varchar".to_string(),
        "json" => "jsonb".to_string(),

        // Binary types
        "binary" | "varbinary" | "tinyblob" | "blob" | "mediumblob" | "longblob" => {
            "bytea".to_string()
        }

        _ => {
            warn!(
                "Unmapped source type '{}', falling back to {}",
                source_type, FALLBACK_TYPE
            );
            return TypeMapping::fallback(FALLBACK_TYPE);
        }
    };

    TypeMapping::exact(mapped)
}

/// Text between the first `(` and its closing `)`, if any.
fn type_params(lower: &str) -> Option<&str> {
    let open = lower.find('(')?;
    let close = lower[open..].find(')')? + open;
    let inner = lower[open + 1..close].trim();
    (!inner.is_empty()).then_some(inner)
}

fn with_params(name: &str, params: Option<&str>) -> String {
    match params {
        Some(p) => format!("{}({})", name, p.replace(' ', "")),
        None => name.to_string(),
    }
}

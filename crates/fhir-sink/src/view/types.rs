//! Column type mapping from FHIR primitive types to PostgreSQL.

/// Symbolic type of a view column, parsed from its FHIR `type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColumnType {
    #[default]
    String,
    Integer,
    Integer64,
    Decimal,
    Boolean,
    /// FHIR `date`/`dateTime` allow partial precision (`2024`, `2024-03`),
    /// which PostgreSQL date types reject, so these are stored as text.
    Date,
    DateTime,
    Instant,
    Time,
    Binary,
}

impl ColumnType {
    /// Parse a ViewDefinition column `type`. Missing or unknown types are strings.
    pub fn parse(fhir_type: Option<&str>) -> Self {
        match fhir_type.unwrap_or("string") {
            // Boolean
            "boolean" => ColumnType::Boolean,

            // Integer types
            "integer" | "positiveInt" | "unsignedInt" => ColumnType::Integer,
            "integer64" => ColumnType::Integer64,

            // Decimal
            "decimal" => ColumnType::Decimal,

            // Date/time types
            "date" => ColumnType::Date,
            "dateTime" => ColumnType::DateTime,
            "instant" => ColumnType::Instant,
            "time" => ColumnType::Time,

            // Binary (base64 text)
            "base64Binary" => ColumnType::Binary,

            // string, code, id, uri, url, canonical, markdown, complex types
            _ => ColumnType::String,
        }
    }

    /// PostgreSQL type used in `CREATE TABLE`.
    pub fn type_string(&self) -> &'static str {
        match self {
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Integer => "INTEGER",
            ColumnType::Integer64 => "BIGINT",
            ColumnType::Decimal => "NUMERIC",
            ColumnType::Instant => "TIMESTAMPTZ",
            ColumnType::Time => "TIME",
            ColumnType::String | ColumnType::Date | ColumnType::DateTime | ColumnType::Binary => {
                "TEXT"
            }
        }
    }
}

/// Placeholder for text-bound parameter `$n` cast to `sql_type`.
pub fn placeholder(n: usize, sql_type: &str) -> String {
    if sql_type.eq_ignore_ascii_case("TEXT") {
        format!("${}::text", n)
    } else {
        format!("${}::text::{}", n, sql_type)
    }
}

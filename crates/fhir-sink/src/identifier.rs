//! Identifier validation and quoting for table and column names.
//!
//! Table names come from resource types or ViewDefinition names, column names
//! from ViewDefinition columns. None of them can be bound as statement
//! parameters, so every name that ends up in SQL text goes through two gates:
//!
//! 1. [`validate_sql_name`] when configuration is loaded (resource lists, view
//!    catalogs), restricting names to a plain identifier alphabet.
//! 2. [`quote_pg`] when the statement is built, which re-checks the basic
//!    invariants and applies PostgreSQL double-quote escaping.

use crate::error::{Result, SinkError};

/// PostgreSQL truncates identifiers longer than NAMEDATALEN - 1 bytes.
const MAX_IDENTIFIER_LENGTH: usize = 63;

/// Validate an identifier for security issues.
///
/// Rejects empty identifiers, identifiers containing null bytes, and
/// identifiers longer than PostgreSQL keeps.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(SinkError::Config("Identifier cannot be empty".to_string()));
    }

    if name.contains('\0') {
        return Err(SinkError::Config(format!(
            "SECURITY: Identifier contains null byte (possible injection attempt): {:?}",
            name
        )));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(SinkError::Config(format!(
            "Identifier exceeds maximum length of {} bytes (got {} bytes): {:?}",
            MAX_IDENTIFIER_LENGTH,
            name.len(),
            name
        )));
    }

    Ok(())
}

/// Validate a configured table or column name.
///
/// Accepts ASCII letters, digits and underscores, not starting with a digit.
/// This is stricter than what quoting could make safe, and keeps table names
/// portable across the SQL tools that read the sink afterwards.
pub fn validate_sql_name(name: &str) -> Result<()> {
    validate_identifier(name)?;

    let mut chars = name.chars();
    let starts_ok = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);
    if !starts_ok || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(SinkError::Config(format!(
            "Invalid name {:?}: only ASCII letters, digits and '_' are allowed, \
             and it must not start with a digit",
            name
        )));
    }

    Ok(())
}

/// Quote a PostgreSQL identifier.
///
/// Escapes double quotes by doubling them and wraps in double quotes.
/// Validates the identifier before quoting.
pub fn quote_pg(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Quote each name and join with ", ".
pub fn quote_list<S: AsRef<str>>(names: &[S]) -> Result<String> {
    let quoted = names
        .iter()
        .map(|n| quote_pg(n.as_ref()))
        .collect::<Result<Vec<_>>>()?;
    Ok(quoted.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_identifier_normal() {
        assert!(validate_identifier("Patient").is_ok());
        assert!(validate_identifier("patient_flat").is_ok());
    }

    #[test]
    fn test_validate_identifier_rejects_empty() {
        let result = validate_identifier("");
        assert!(result.unwrap_err().to_string().contains("empty"));
    }

    #[test]
    fn test_validate_identifier_rejects_null_byte() {
        let result = validate_identifier("table\0name");
        assert!(result.unwrap_err().to_string().contains("null byte"));
    }

    #[test]
    fn test_validate_identifier_length_limit() {
        assert!(validate_identifier(&"a".repeat(63)).is_ok());
        assert!(validate_identifier(&"a".repeat(64)).is_err());
    }

    #[test]
    fn test_validate_sql_name() {
        assert!(validate_sql_name("Observation").is_ok());
        assert!(validate_sql_name("_private").is_ok());
        assert!(validate_sql_name("obs_2024").is_ok());

        assert!(validate_sql_name("2024_obs").is_err());
        assert!(validate_sql_name("patient-flat").is_err());
        assert!(validate_sql_name("name with space").is_err());
        assert!(validate_sql_name("x\"; DROP TABLE y; --").is_err());
        assert!(validate_sql_name("pätient").is_err());
    }

    #[test]
    fn test_quote_pg_normal() {
        assert_eq!(quote_pg("Patient").unwrap(), "\"Patient\"");
    }

    #[test]
    fn test_quote_pg_escapes_double_quote() {
        assert_eq!(quote_pg("table\"name").unwrap(), "\"table\"\"name\"");
    }

    #[test]
    fn test_quote_pg_sql_injection_safely_quoted() {
        let result = quote_pg("Robert\"); DROP TABLE Students;--");
        assert_eq!(result.unwrap(), "\"Robert\"\"); DROP TABLE Students;--\"");
    }

    #[test]
    fn test_quote_list() {
        assert_eq!(
            quote_list(&["id", "family"]).unwrap(),
            "\"id\", \"family\""
        );
        assert!(quote_list(&["id", ""]).is_err());
    }
}

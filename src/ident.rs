//! Table identifier validation (spec §4.A).
//!
//! Table names are interpolated directly into ClickHouse statements because
//! the HTTP query interface has no parameter binding for identifiers. Every
//! identifier must be checked against this pattern before it touches a
//! statement string.

use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("invalid identifier {name:?} (field {field}): must match ^[A-Za-z0-9_]+(\\.[A-Za-z0-9_]+)?$")]
pub struct InvalidIdentifier {
    pub field: &'static str,
    pub name: String,
}

fn identifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_]+(\.[A-Za-z0-9_]+)?$").expect("static regex"))
}

/// Validates a table identifier of the form `table` or `database.table`.
pub fn validate_identifier(name: &str, field: &'static str) -> Result<(), InvalidIdentifier> {
    if identifier_re().is_match(name) {
        Ok(())
    } else {
        Err(InvalidIdentifier { field, name: name.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_and_qualified_names() {
        assert!(validate_identifier("metrics", "t").is_ok());
        assert!(validate_identifier("default.metrics", "t").is_ok());
        assert!(validate_identifier("_weird_but_legal_", "t").is_ok());
    }

    #[test]
    fn rejects_injection_attempts() {
        assert!(validate_identifier("default.metrics; DROP TABLE x", "t").is_err());
        assert!(validate_identifier("a.b.c", "t").is_err());
        assert!(validate_identifier("", "t").is_err());
        assert!(validate_identifier("a.", "t").is_err());
        assert!(validate_identifier(".a", "t").is_err());
        assert!(validate_identifier("table name", "t").is_err());
    }
}

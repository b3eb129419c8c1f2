//! Identifier validation.
//!
//! Table and collection names supplied by callers are only spliced into
//! statements after they have been found in a freshly fetched table list,
//! and are always quoted.

use crate::errors::{AppError, AppResult};

/// Validates and quotes SQL identifiers.
pub struct IdentifierValidator;

impl IdentifierValidator {
    /// Ensures `name` is one of `known` (exact match).
    ///
    /// # Errors
    /// Returns `AppError::InvalidIdentifier` if the name is empty or not listed.
    pub fn ensure_listed<'a>(name: &'a str, known: &[String]) -> AppResult<&'a str> {
        if name.is_empty() || !known.iter().any(|k| k == name) {
            return Err(AppError::InvalidIdentifier(name.to_string()));
        }
        Ok(name)
    }

    /// ANSI quoting used by PostgreSQL and SQLite.
    pub fn quote_double(name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// MySQL quoting.
    pub fn quote_backtick(name: &str) -> String {
        format!("`{}`", name.replace('`', "``"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tables() -> Vec<String> {
        vec!["users".to_string(), "orders".to_string()]
    }

    #[test]
    fn test_listed_table_is_allowed() {
        assert_eq!(IdentifierValidator::ensure_listed("orders", &tables()).unwrap(), "orders");
    }

    #[test]
    fn test_injection_is_rejected() {
        let err = IdentifierValidator::ensure_listed("users; DROP TABLE users", &tables());
        assert!(matches!(err, Err(AppError::InvalidIdentifier(_))));
        assert!(IdentifierValidator::ensure_listed("", &tables()).is_err());
        assert!(IdentifierValidator::ensure_listed("USERS", &tables()).is_err());
    }

    #[test]
    fn test_quoting_escapes_delimiters() {
        assert_eq!(IdentifierValidator::quote_double("a\"b"), "\"a\"\"b\"");
        assert_eq!(IdentifierValidator::quote_backtick("a`b"), "`a``b`");
    }
}

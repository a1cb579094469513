//! Error types for omopgen.

use serde::Serialize;
use thiserror::Error;

/// A defect found while resolving a single query.
///
/// These are collected on the query's record and never abort a batch run.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "detail")]
pub enum ResolveError {
    /// A bracketed token that cannot be classified or grouped into a legal unit.
    #[error("Malformed placeholder '{raw}' at byte {offset}")]
    MalformedPlaceholder { raw: String, offset: usize },

    /// A template or argument category with no registered renderer.
    #[error("No renderer registered for template category '{0}'")]
    UnknownTemplateType(String),

    /// An index requesting a position beyond the bound sequence for its category.
    #[error("Missing argument: category '{category}' has no value at index {index}")]
    MissingArgument { category: String, index: usize },

    /// Placeholder syntax that survived the bounded re-scan.
    #[error("Unresolved placeholder '{0}' left in output")]
    UnresolvedPlaceholder(String),

    /// A renderer's output needed more resolution passes than the configured bound.
    #[error("Recursion limit of {limit} re-scan pass(es) exceeded")]
    RecursionLimitExceeded { limit: usize },
}

impl ResolveError {
    /// Create a malformed-placeholder error for the given raw span.
    pub fn malformed(raw: impl Into<String>, offset: usize) -> Self {
        Self::MalformedPlaceholder {
            raw: raw.into(),
            offset,
        }
    }

    /// Create a missing-argument error.
    pub fn missing(category: impl Into<String>, index: usize) -> Self {
        Self::MissingArgument {
            category: category.into(),
            index,
        }
    }
}

/// The top-level error type for omopgen operations.
#[derive(Debug, Error)]
pub enum OmopgenError {
    /// Configuration error (a missing or empty schema name is fatal for the run).
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV parsing error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML configuration parse error.
    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result type alias for omopgen operations.
pub type OmopgenResult<T> = Result<T, OmopgenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_error_display() {
        let err = ResolveError::missing("DRUG", 3);
        assert_eq!(
            err.to_string(),
            "Missing argument: category 'DRUG' has no value at index 3"
        );
    }

    #[test]
    fn test_malformed_display() {
        let err = ResolveError::malformed("<ARG-AGE>", 17);
        assert_eq!(err.to_string(), "Malformed placeholder '<ARG-AGE>' at byte 17");
    }

    #[test]
    fn test_serializes_with_kind_tag() {
        let err = ResolveError::UnknownTemplateType("FOO".to_string());
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "UnknownTemplateType");
    }
}

//! Error taxonomy for copy operations.

use model_store::{StateError, StorageError};

/// Fatal copy errors.
///
/// Unresolved optional references are not errors; they are reported as
/// [`crate::CopyWarning`]s and the copy continues.
#[derive(Debug, thiserror::Error)]
pub enum CopyError {
    #[error("{kind} not found: {selector}")]
    NotFound { kind: &'static str, selector: String },

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("header mismatch in {table}: expected `{expected}`, found `{actual}`")]
    HeaderMismatch {
        table: String,
        expected: String,
        actual: String,
    },

    #[error("incomplete {kind} {name}: {detail}")]
    IncompleteData {
        kind: &'static str,
        name: String,
        detail: String,
    },

    #[error("{kind} {name} is not eligible for copy: {reason}")]
    NotEligible {
        kind: &'static str,
        name: String,
        reason: String,
    },

    #[error("invalid row {row} in {table}: {reason}")]
    InvalidRow {
        table: String,
        row: usize,
        reason: String,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("encoding error: {0}")]
    Encoding(String),
}

impl From<StateError> for CopyError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::SchemaVersion { .. } => CopyError::SchemaMismatch(err.to_string()),
            other => CopyError::Storage(StorageError::from(other)),
        }
    }
}

impl CopyError {
    pub(crate) fn not_found(kind: &'static str, selector: impl Into<String>) -> Self {
        CopyError::NotFound {
            kind,
            selector: selector.into(),
        }
    }
}

/// Result type for copy operations.
pub type Result<T> = std::result::Result<T, CopyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_version_maps_to_schema_mismatch() {
        let err: CopyError = StateError::SchemaVersion {
            found: 7,
            expected: 1,
        }
        .into();
        assert!(matches!(err, CopyError::SchemaMismatch(_)));
        assert!(err.to_string().contains("database has 7"));

        let err: CopyError = StateError::Connection("refused".to_string()).into();
        assert!(matches!(err, CopyError::Storage(StorageError::Backend(_))));
    }

    #[test]
    fn test_error_display() {
        let err = CopyError::not_found("run", "digest abc");
        assert_eq!(err.to_string(), "run not found: digest abc");

        let err = CopyError::InvalidRow {
            table: "ageSex".to_string(),
            row: 3,
            reason: "bad float".to_string(),
        };
        assert_eq!(err.to_string(), "invalid row 3 in ageSex: bad float");
    }
}

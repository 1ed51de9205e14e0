//! Error types for model-store

use thiserror::Error;

/// Errors raised while opening or preparing a store connection
#[derive(Error, Debug)]
pub enum StateError {
    /// Database connection error
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Database query error
    #[error("Database query failed: {0}")]
    Query(String),

    /// Serialization error
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Schema setup error
    #[error("Schema setup failed: {0}")]
    SchemaSetup(String),

    /// Stored schema version differs from the one this build understands
    #[error("Incompatible schema version: database has {found}, expected {expected}")]
    SchemaVersion { found: u32, expected: u32 },
}

impl From<surrealdb::Error> for StateError {
    fn from(err: surrealdb::Error) -> Self {
        StateError::Query(err.to_string())
    }
}

impl From<serde_json::Error> for StateError {
    fn from(err: serde_json::Error) -> Self {
        StateError::Serialization(err.to_string())
    }
}

/// Errors returned by [`crate::ModelStore`] operations
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("model not found: {model_id}")]
    ModelNotFound { model_id: i64 },

    #[error("run not found: {run_id}")]
    RunNotFound { run_id: i64 },

    #[error("workset not found: {set_id}")]
    WorksetNotFound { set_id: i64 },

    #[error("task not found: {task_id}")]
    TaskNotFound { task_id: i64 },

    #[error("model {model_id} has no {kind} with hid {hid}")]
    UnknownHid {
        model_id: i64,
        kind: &'static str,
        hid: i32,
    },

    #[error("duplicate {kind}: {key}")]
    Duplicate { kind: &'static str, key: String },

    #[error("workset {set_id} is read-only")]
    ReadonlyWorkset { set_id: i64 },

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    /// Failure raised on purpose by test fakes
    #[error("injected failure: {0}")]
    Injected(String),
}

impl From<surrealdb::Error> for StorageError {
    fn from(err: surrealdb::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<StateError> for StorageError {
    fn from(err: StateError) -> Self {
        StorageError::Backend(err.to_string())
    }
}

//! Error types for hb-flatten

use thiserror::Error;

/// Errors that can occur while flattening or reconstructing records
#[derive(Debug, Error)]
pub enum FlattenError {
    /// Strict mode only: the record does not match the declared input schema.
    ///
    /// `field` is the flat key whose path the mismatch lies on, or the dotted
    /// path itself when no table entry covers it.
    #[error("Schema validation failed for {field} at {path}: expected {expected}, got {actual}")]
    SchemaValidation {
        field: String,
        path: String,
        expected: String,
        actual: String,
    },

    #[error("Path conflict between {first} and {second} at {path}")]
    PathConflict {
        first: String,
        second: String,
        path: String,
    },

    #[error("Invalid path table: {0}")]
    InvalidPathTable(String),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to parse input: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

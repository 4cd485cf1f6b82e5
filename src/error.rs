//! Error types for Allocation Flux

use crate::schema::SchemaViolation;
use thiserror::Error;

/// Errors that abort an analysis run.
///
/// Coverage gaps (unresolved zips, zero populations, slots without history)
/// are not errors; they surface as nullable output fields instead.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Schema violation: {0}")]
    Schema(#[from] SchemaViolation),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Unsupported table format: {0}")]
    UnsupportedFormat(String),

    #[error("Encoding error: {0}")]
    EncodingError(String),
}

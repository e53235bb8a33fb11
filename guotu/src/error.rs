//! Error types for the guotu crate

use thiserror::Error;

/// Errors raised by the conversion core.
///
/// Every variant is fatal for the current read or write call; nothing is
/// retried. Batched database writes report the failing batch through
/// [`GuotuError::DataSource`] and leave already committed batches alone.
#[derive(Debug, Error)]
pub enum GuotuError {
    /// I/O error while reading or writing a dataset
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed input: missing section, wrong field count, unrecognized key
    #[error("Format error: {0}")]
    Format(String),

    /// The reference system is not in the recognized set
    #[error("Unsupported CRS: {0}")]
    CrsUnsupported(String),

    /// No capable, available backend for the requested format
    #[error("Engine not supported: {0}")]
    EngineNotSupported(String),

    /// Failure from an underlying driver or database
    #[error("Data source error: {0}")]
    DataSource(String),

    /// The layer does not satisfy the model invariants
    #[error("Invalid layer: {0}")]
    LayerValidation(String),
}

impl GuotuError {
    /// Creates a format error
    pub fn format_error(reason: impl Into<String>) -> Self {
        Self::Format(reason.into())
    }

    /// Creates an unsupported-CRS error
    pub fn crs_unsupported(reason: impl Into<String>) -> Self {
        Self::CrsUnsupported(reason.into())
    }

    /// Creates an engine-not-supported error
    pub fn engine_not_supported(reason: impl Into<String>) -> Self {
        Self::EngineNotSupported(reason.into())
    }

    /// Creates a data-source error
    pub fn data_source(reason: impl Into<String>) -> Self {
        Self::DataSource(reason.into())
    }

    /// Creates a layer-validation error
    pub fn layer_validation(reason: impl Into<String>) -> Self {
        Self::LayerValidation(reason.into())
    }
}

impl From<tokio_postgres::Error> for GuotuError {
    fn from(e: tokio_postgres::Error) -> Self {
        Self::DataSource(e.to_string())
    }
}

impl From<deadpool_postgres::PoolError> for GuotuError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        Self::DataSource(e.to_string())
    }
}

impl From<serde_json::Error> for GuotuError {
    fn from(e: serde_json::Error) -> Self {
        Self::Format(e.to_string())
    }
}

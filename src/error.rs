// ⚠️ Error types for the forensics library
// Row-level problems are SkipReasons (see parser.rs), not errors.

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ForensicsError {
    #[error("Unrecognized statement header: no known statement schema matched")]
    UnknownSchema,

    #[error("Statement schema '{0}' matched but no date column was found")]
    MissingDateColumn(String),

    #[error("Header row index {index} is out of range ({rows} rows)")]
    HeaderRowOutOfRange { index: usize, rows: usize },

    #[error("Transaction could not start within {0:?}")]
    TransactionWaitExceeded(Duration),

    #[error("Transaction ran for {elapsed:?}, exceeding the {timeout:?} limit; rolled back")]
    TransactionTimeout { elapsed: Duration, timeout: Duration },

    #[error("{0} detector panicked")]
    DetectorPanicked(&'static str),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ForensicsError>;

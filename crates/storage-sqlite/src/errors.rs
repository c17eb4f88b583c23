//! Storage-level errors and their mapping into the core error type.

use thiserror::Error;

/// Errors raised by the SQLite backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to open database: {0}")]
    Connection(#[from] diesel::ConnectionError),

    #[error("Connection pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    #[error("Query failed: {0}")]
    Query(#[from] diesel::result::Error),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Database writer is not running")]
    WriterClosed,
}

impl From<StorageError> for bankfeed_core::Error {
    fn from(err: StorageError) -> Self {
        bankfeed_core::Error::storage(err.to_string())
    }
}

//! Error types for dump operations

use snapdump_storage::StorageError;
use thiserror::Error;

/// Dump-pipeline errors
#[derive(Error, Debug)]
pub enum DumpError {
    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Could not connect to or pin a server connection
    #[error("connection failed: {0}")]
    Connection(String),

    /// A query could not be executed
    #[error("query failed: {0}")]
    Query(String),

    /// A row could not be scanned from a result set
    #[error("row scan failed: {0}")]
    Scan(String),

    /// Opening an output object failed
    #[error("storage open failed: {0}")]
    StorageOpen(String),

    /// Writing to an output object failed
    #[error("storage write failed: {0}")]
    StorageWrite(#[from] StorageError),

    /// The dump was canceled
    #[error("operation canceled")]
    Canceled,
}

impl DumpError {
    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a query error carrying the failing statement
    pub fn query(query: &str, err: mysql_async::Error) -> Self {
        Self::Query(format!("{}: {}", query, err))
    }

    /// Create a new scan error
    pub fn scan(msg: impl Into<String>) -> Self {
        Self::Scan(msg.into())
    }

    /// Create a new storage open error
    pub fn storage_open(msg: impl Into<String>) -> Self {
        Self::StorageOpen(msg.into())
    }
}

/// Result type for dump operations
pub type Result<T> = std::result::Result<T, DumpError>;

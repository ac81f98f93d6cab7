//! Blob-store abstraction for snapdump
//!
//! This crate provides the storage seam the dump pipeline writes through:
//!
//! - **Local** - plain filesystem directories
//! - **S3** - Amazon S3 and S3-compatible storage (MinIO, LocalStack,
//!   Cloudflare R2) with multipart uploads
//! - **Mem** - in-memory storage for tests and scenario assertions
//!
//! # Example
//!
//! ```rust,ignore
//! use snapdump_storage::{ExternalStorage, LocalStorage};
//!
//! let storage = LocalStorage::new("/var/dumps");
//! let mut uploader = storage.create_uploader("mydb.users.0.sql").await?;
//! uploader.write_all(b"INSERT INTO `users` VALUES\n(1);\n").await?;
//! uploader.close().await?;
//! ```

use async_trait::async_trait;
use thiserror::Error;

pub mod local;
pub mod mem;
pub mod s3;

pub use local::LocalStorage;
pub use mem::{BufferUploader, MemStorage, SharedBuffer};
pub use s3::{S3Config, S3Storage, Secret, S3_CHUNK_SIZE};

/// Storage-layer errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// Filesystem error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// S3 request error
    #[error("S3 error: {0}")]
    S3(String),

    /// Invalid storage configuration
    #[error("storage configuration error: {0}")]
    Config(String),

    /// Write after close
    #[error("uploader is closed")]
    Closed,
}

impl StorageError {
    /// Create a new S3 error
    pub fn s3(msg: impl Into<String>) -> Self {
        Self::S3(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// A blob store that can open streaming uploads by path.
///
/// Implementations hand out one [`Uploader`] per output object; the caller
/// owns the uploader and must call [`Uploader::close`] to finalize it.
#[async_trait]
pub trait ExternalStorage: Send + Sync {
    /// Open a streaming upload for the given object path.
    async fn create_uploader(&self, path: &str) -> Result<Box<dyn Uploader>>;

    /// Prefix describing this store, for logging only.
    fn uri(&self) -> String;
}

/// A streaming append-only upload.
///
/// Writes may be buffered internally (e.g. batched to the S3 part size);
/// nothing is durable until [`close`](Uploader::close) returns.
#[async_trait]
pub trait Uploader: Send {
    /// Append bytes to the upload. Returns the number of bytes accepted.
    async fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Flush and finalize the upload.
    async fn close(&mut self) -> Result<()>;

    /// Append the whole slice, retrying partial writes.
    async fn write_all(&mut self, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            let n = self.write(data).await?;
            if n == 0 {
                return Err(StorageError::Closed);
            }
            data = &data[n..];
        }
        Ok(())
    }
}

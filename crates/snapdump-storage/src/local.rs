//! Local filesystem storage backend

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::{ExternalStorage, Result, Uploader};

/// Storage backend rooted at a local directory.
///
/// Object paths are resolved relative to the base directory; missing parent
/// directories are created on first write.
pub struct LocalStorage {
    base: PathBuf,
}

impl LocalStorage {
    /// Create a local storage rooted at `base`.
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// The base directory of this store.
    pub fn base(&self) -> &std::path::Path {
        &self.base
    }
}

#[async_trait]
impl ExternalStorage for LocalStorage {
    async fn create_uploader(&self, path: &str) -> Result<Box<dyn Uploader>> {
        let full = self.base.join(path);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = File::create(&full).await?;
        debug!(path = %full.display(), "opened local file");
        Ok(Box::new(LocalUploader { file }))
    }

    fn uri(&self) -> String {
        format!("file://{}", self.base.display())
    }
}

struct LocalUploader {
    file: File,
}

#[async_trait]
impl Uploader for LocalUploader {
    async fn write(&mut self, data: &[u8]) -> Result<usize> {
        Ok(self.file.write(data).await?)
    }

    async fn close(&mut self) -> Result<()> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_and_close() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());

        let mut uploader = storage.create_uploader("db/t1.sql").await.unwrap();
        uploader.write_all(b"hello ").await.unwrap();
        uploader.write_all(b"world").await.unwrap();
        uploader.close().await.unwrap();

        let written = std::fs::read(dir.path().join("db/t1.sql")).unwrap();
        assert_eq!(written, b"hello world");
    }

    #[tokio::test]
    async fn test_uri_prefix() {
        let storage = LocalStorage::new("/tmp/dumps");
        assert_eq!(storage.uri(), "file:///tmp/dumps");
    }
}

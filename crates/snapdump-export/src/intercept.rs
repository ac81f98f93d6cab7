//! Lazy-opening file sink
//!
//! [`InterceptUploader`] defers creating the underlying storage object
//! until the first non-empty write. When an encoder finishes without
//! offering a single byte (an exhausted source on a rotated chunk), no
//! object exists to clean up; this is the no-empty-files contract of the
//! pipeline.

use async_trait::async_trait;
use snapdump_storage::{ExternalStorage, Uploader};
use std::sync::Arc;
use tracing::debug;

use crate::error::DumpError;

enum SinkState {
    Unopened,
    Open(Box<dyn Uploader>),
    /// Opening failed; the message is re-raised on every later write.
    Failed(String),
}

/// Uploader that opens its target lazily and records whether any payload
/// byte was written.
pub struct InterceptUploader {
    storage: Arc<dyn ExternalStorage>,
    path: String,
    state: SinkState,
    something_written: bool,
}

impl InterceptUploader {
    /// Wrap `storage` for a deferred upload of `path`.
    pub fn new(storage: Arc<dyn ExternalStorage>, path: impl Into<String>) -> Self {
        Self {
            storage,
            path: path.into(),
            state: SinkState::Unopened,
            something_written: false,
        }
    }

    /// Whether at least one payload byte reached this sink.
    pub fn something_written(&self) -> bool {
        self.something_written
    }

    /// The object path this sink uploads to.
    pub fn path(&self) -> &str {
        &self.path
    }

    async fn open_once(&mut self) {
        if matches!(self.state, SinkState::Unopened) {
            self.state = match self.storage.create_uploader(&self.path).await {
                Ok(uploader) => {
                    debug!(path = %self.path, uri = %self.storage.uri(), "opened lazy file writer");
                    SinkState::Open(uploader)
                }
                Err(e) => SinkState::Failed(e.to_string()),
            };
        }
    }
}

#[async_trait]
impl Uploader for InterceptUploader {
    async fn write(&mut self, data: &[u8]) -> snapdump_storage::Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        self.open_once().await;
        self.something_written = true;
        match &mut self.state {
            SinkState::Open(uploader) => uploader.write(data).await,
            SinkState::Failed(msg) => Err(snapdump_storage::StorageError::config(format!(
                "open file error: {}",
                msg
            ))),
            // open_once never leaves the sink unopened
            SinkState::Unopened => Err(snapdump_storage::StorageError::Closed),
        }
    }

    async fn close(&mut self) -> snapdump_storage::Result<()> {
        match &mut self.state {
            SinkState::Open(uploader) => {
                debug!(path = %self.path, "tearing down lazy file writer");
                uploader.close().await
            }
            _ => Ok(()),
        }
    }
}

impl InterceptUploader {
    /// Map an open failure to the pipeline's error kind.
    pub fn open_error(&self) -> Option<DumpError> {
        match &self.state {
            SinkState::Failed(msg) => Some(DumpError::storage_open(msg.clone())),
            _ => None,
        }
    }
}

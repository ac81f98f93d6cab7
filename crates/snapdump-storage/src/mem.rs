//! In-memory storage backend for tests
//!
//! [`MemStorage`] records every object created through it, so tests can
//! assert which files a dump produced and what bytes they contain.
//! [`BufferUploader`] is a standalone sink for exercising a single encoder
//! invocation.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::{ExternalStorage, Result, Uploader};

/// In-memory blob store.
///
/// An object entry appears as soon as `create_uploader` is called, which
/// lets tests distinguish "never created" from "created but empty".
#[derive(Clone, Default)]
pub struct MemStorage {
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemStorage {
    /// Create an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Contents of the object at `path`, if it was created.
    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(path).cloned()
    }

    /// Sorted list of all created object paths.
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.files.lock().unwrap().keys().cloned().collect();
        paths.sort();
        paths
    }
}

#[async_trait]
impl ExternalStorage for MemStorage {
    async fn create_uploader(&self, path: &str) -> Result<Box<dyn Uploader>> {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), Vec::new());
        Ok(Box::new(MemUploader {
            files: Arc::clone(&self.files),
            path: path.to_string(),
        }))
    }

    fn uri(&self) -> String {
        "mem://".to_string()
    }
}

struct MemUploader {
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    path: String,
}

#[async_trait]
impl Uploader for MemUploader {
    async fn write(&mut self, data: &[u8]) -> Result<usize> {
        let mut files = self.files.lock().unwrap();
        files
            .entry(self.path.clone())
            .or_default()
            .extend_from_slice(data);
        Ok(data.len())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Shared handle onto the bytes collected by a [`BufferUploader`].
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    /// A copy of the collected bytes.
    pub fn contents(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }

    /// The collected bytes as a (lossy) string, for assertions.
    pub fn as_string(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

/// An uploader that appends into a shared in-memory buffer.
#[derive(Default)]
pub struct BufferUploader {
    buf: SharedBuffer,
}

impl BufferUploader {
    /// Create an empty buffer sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for reading the collected bytes after the dump.
    pub fn handle(&self) -> SharedBuffer {
        self.buf.clone()
    }
}

#[async_trait]
impl Uploader for BufferUploader {
    async fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.buf.0.lock().unwrap().extend_from_slice(data);
        Ok(data.len())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

//! Buffered producer/consumer pipe between encoders and storage
//!
//! The encoder fills pooled byte buffers and hands them to the pipe; a
//! drain worker writes them to the sink in FIFO order and returns each
//! buffer to the process-wide pool. The bounded channel (capacity 8) is
//! what back-pressures the encoder when storage is slow.
//!
//! Size counters live on the producer side only: the encoder updates and
//! reads them between rows, never concurrently with the drain worker.

use std::sync::{LazyLock, Mutex};

use snapdump_storage::Uploader;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::UNSPECIFIED_SIZE;
use crate::error::DumpError;

/// Flush threshold for in-flight buffers: 1 MiB.
pub const LENGTH_LIMIT: usize = 1_048_576;

const PIPE_DEPTH: usize = 8;
const POOL_MAX_IDLE: usize = 32;

static BUFFER_POOL: LazyLock<Mutex<Vec<Vec<u8>>>> = LazyLock::new(|| Mutex::new(Vec::new()));

/// Check a buffer out of the pool, grown to at least [`LENGTH_LIMIT`].
pub(crate) fn take_buffer() -> Vec<u8> {
    let mut buf = BUFFER_POOL.lock().unwrap().pop().unwrap_or_default();
    if buf.capacity() < LENGTH_LIMIT {
        buf.reserve(LENGTH_LIMIT);
    }
    buf
}

/// Return a buffer to the pool.
pub(crate) fn put_buffer(mut buf: Vec<u8>) {
    buf.clear();
    let mut pool = BUFFER_POOL.lock().unwrap();
    if pool.len() < POOL_MAX_IDLE {
        pool.push(buf);
    }
}

/// Producer half of the pipe, owned by one encoder invocation.
pub(crate) struct WriterPipe {
    input: Option<mpsc::Sender<Vec<u8>>>,
    err_rx: mpsc::Receiver<DumpError>,
    pub(crate) current_file_size: u64,
    pub(crate) current_statement_size: u64,
    file_size_limit: u64,
    statement_size_limit: u64,
}

/// Consumer half: drains buffers to the sink until the input closes.
pub(crate) struct PipeDrain {
    rx: mpsc::Receiver<Vec<u8>>,
    err_tx: mpsc::Sender<DumpError>,
}

impl WriterPipe {
    pub(crate) fn new(file_size_limit: u64, statement_size_limit: u64) -> (Self, PipeDrain) {
        let (tx, rx) = mpsc::channel(PIPE_DEPTH);
        let (err_tx, err_rx) = mpsc::channel(1);
        (
            Self {
                input: Some(tx),
                err_rx,
                current_file_size: 0,
                current_statement_size: 0,
                file_size_limit,
                statement_size_limit,
            },
            PipeDrain { rx, err_tx },
        )
    }

    /// Enqueue a filled buffer; blocks while the channel is full.
    pub(crate) async fn send(&mut self, buf: Vec<u8>) {
        if let Some(input) = &self.input {
            if let Err(rejected) = input.send(buf).await {
                // drain already shut down (cancellation); recycle the buffer
                put_buffer(rejected.0);
            }
        }
    }

    /// Account bytes against both the file and the statement counter.
    pub(crate) fn add_file_size(&mut self, n: u64) {
        self.current_file_size += n;
        self.current_statement_size += n;
    }

    pub(crate) fn should_switch_file(&self) -> bool {
        self.file_size_limit != UNSPECIFIED_SIZE && self.current_file_size >= self.file_size_limit
    }

    pub(crate) fn should_switch_statement(&self) -> bool {
        (self.file_size_limit != UNSPECIFIED_SIZE
            && self.current_file_size >= self.file_size_limit)
            || (self.statement_size_limit != UNSPECIFIED_SIZE
                && self.current_statement_size >= self.statement_size_limit)
    }

    /// Non-blocking peek of the first write error.
    pub(crate) fn error(&mut self) -> Option<DumpError> {
        self.err_rx.try_recv().ok()
    }

    /// Close the input; the drain worker finishes once the queue is empty.
    pub(crate) fn close_input(&mut self) {
        self.input = None;
    }
}

impl PipeDrain {
    /// Drain buffers to `writer` until the input closes.
    ///
    /// The first write error is recorded and subsequent buffers are
    /// discarded, preserving single ownership of the sink. On cancellation
    /// the worker stops writing and recycles whatever is still queued.
    pub(crate) async fn run(mut self, writer: &mut dyn Uploader, cancel: &CancellationToken) {
        let mut err_occurred = false;
        loop {
            let buf = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                received = self.rx.recv() => match received {
                    Some(buf) => buf,
                    None => return,
                },
            };
            if !err_occurred {
                if let Err(e) = writer.write_all(&buf).await {
                    err_occurred = true;
                    let _ = self.err_tx.try_send(e.into());
                }
            }
            put_buffer(buf);
        }
        // canceled: recycle queued buffers without writing them
        self.rx.close();
        while let Ok(buf) = self.rx.try_recv() {
            put_buffer(buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use snapdump_storage::{BufferUploader, StorageError};

    struct PoisonUploader {
        accept: usize,
        written: Vec<u8>,
    }

    #[async_trait]
    impl Uploader for PoisonUploader {
        async fn write(&mut self, data: &[u8]) -> snapdump_storage::Result<usize> {
            if self.accept == 0 {
                return Err(StorageError::s3("poisoned"));
            }
            self.accept -= 1;
            self.written.extend_from_slice(data);
            Ok(data.len())
        }

        async fn close(&mut self) -> snapdump_storage::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_buffer_pool_grows_and_reuses() {
        let buf = take_buffer();
        assert!(buf.capacity() >= LENGTH_LIMIT);
        put_buffer(buf);
        let again = take_buffer();
        assert!(again.capacity() >= LENGTH_LIMIT);
        assert!(again.is_empty());
        put_buffer(again);
    }

    #[test]
    fn test_switch_predicates() {
        let (mut pipe, _drain) = WriterPipe::new(100, 10);
        assert!(!pipe.should_switch_statement());
        assert!(!pipe.should_switch_file());

        pipe.add_file_size(10);
        assert!(pipe.should_switch_statement());
        assert!(!pipe.should_switch_file());

        pipe.current_statement_size = 0;
        assert!(!pipe.should_switch_statement());

        pipe.add_file_size(90);
        assert!(pipe.should_switch_file());
        assert!(pipe.should_switch_statement());
    }

    #[test]
    fn test_unspecified_limits_never_switch() {
        let (mut pipe, _drain) = WriterPipe::new(UNSPECIFIED_SIZE, UNSPECIFIED_SIZE);
        pipe.add_file_size(u32::MAX as u64);
        assert!(!pipe.should_switch_statement());
        assert!(!pipe.should_switch_file());
    }

    #[tokio::test]
    async fn test_pipe_preserves_send_order() {
        let (mut pipe, drain) = WriterPipe::new(UNSPECIFIED_SIZE, UNSPECIFIED_SIZE);
        let mut sink = BufferUploader::new();
        let handle = sink.handle();
        let cancel = CancellationToken::new();

        let produce = async {
            for chunk in ["alpha ", "beta ", "gamma"] {
                let mut buf = take_buffer();
                buf.extend_from_slice(chunk.as_bytes());
                pipe.send(buf).await;
            }
            pipe.close_input();
        };
        tokio::join!(produce, drain.run(&mut sink, &cancel));

        assert_eq!(handle.as_string(), "alpha beta gamma");
    }

    #[tokio::test]
    async fn test_drain_records_first_error_and_discards_rest() {
        let (mut pipe, drain) = WriterPipe::new(UNSPECIFIED_SIZE, UNSPECIFIED_SIZE);
        let mut sink = PoisonUploader {
            accept: 1,
            written: Vec::new(),
        };
        let cancel = CancellationToken::new();

        let produce = async {
            for chunk in ["ok", "fails", "dropped"] {
                let mut buf = take_buffer();
                buf.extend_from_slice(chunk.as_bytes());
                pipe.send(buf).await;
            }
            pipe.close_input();
        };
        tokio::join!(produce, drain.run(&mut sink, &cancel));

        assert_eq!(sink.written, b"ok");
        assert!(matches!(pipe.error(), Some(DumpError::StorageWrite(_))));
        assert!(pipe.error().is_none());
    }

    #[tokio::test]
    async fn test_drain_stops_writing_on_cancel() {
        let (mut pipe, drain) = WriterPipe::new(UNSPECIFIED_SIZE, UNSPECIFIED_SIZE);
        let mut sink = BufferUploader::new();
        let handle = sink.handle();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let produce = async {
            let mut buf = take_buffer();
            buf.extend_from_slice(b"never written");
            pipe.send(buf).await;
            pipe.close_input();
        };
        tokio::join!(produce, drain.run(&mut sink, &cancel));

        assert_eq!(handle.contents(), b"");
    }
}

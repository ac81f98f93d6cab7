//! Pipeline driver
//!
//! [`FileWriter`] turns dump targets into storage objects: schema DDL goes
//! straight to an eagerly opened uploader, table data is driven through the
//! encoders chunk by chunk. For each table-data source it pins a pooled
//! connection, then rotates output files until the encoder consumes the
//! source; a rotated file that receives no bytes is never created.

use std::sync::Arc;

use async_trait::async_trait;
use snapdump_storage::{ExternalStorage, Uploader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{DumpConfig, FileFormat, UNSPECIFIED_SIZE};
use crate::data::MetaData;
use crate::encode::write_meta;
use crate::error::{DumpError, Result};
use crate::intercept::InterceptUploader;
use crate::ir::{SqlRowIter, TableData, TableMeta};
use crate::namer::{FileKind, OutputFileNamer};
use crate::pool::ConnectionPool;

/// Sink side of the dump pipeline.
#[async_trait]
pub trait DumpWriter: Send + Sync {
    /// Write a database's DDL file.
    async fn write_database_meta(&self, db: &str, create_sql: &str) -> Result<()>;

    /// Write a table's DDL file.
    async fn write_table_meta(&self, db: &str, table: &str, create_sql: &str) -> Result<()>;

    /// Write a view's DDL files (stub table plus view definition).
    async fn write_view_meta(
        &self,
        db: &str,
        view: &str,
        create_table_sql: &str,
        create_view_sql: &str,
    ) -> Result<()>;

    /// Drive a stream of table-data sources into output files.
    async fn write_table_data(
        &self,
        meta: &dyn TableMeta,
        sources: mpsc::Receiver<Box<dyn TableData>>,
    ) -> Result<()>;
}

/// Writer that renders dump targets into an external blob store.
pub struct FileWriter {
    cfg: DumpConfig,
    pool: Arc<ConnectionPool>,
    storage: Arc<dyn ExternalStorage>,
    format: FileFormat,
    cancel: CancellationToken,
}

impl FileWriter {
    /// Create a writer over a pinned connection pool and a blob store.
    pub fn new(
        cfg: DumpConfig,
        pool: Arc<ConnectionPool>,
        storage: Arc<dyn ExternalStorage>,
        cancel: CancellationToken,
    ) -> Self {
        let format = cfg.file_type;
        Self {
            cfg,
            pool,
            storage,
            format,
            cancel,
        }
    }

    async fn write_meta_to_file(&self, target: &str, meta_sql: &str, path: &str) -> Result<()> {
        let mut uploader = self
            .storage
            .create_uploader(path)
            .await
            .map_err(|e| DumpError::storage_open(e.to_string()))?;
        let meta = MetaData {
            target: target.to_string(),
            meta_sql: meta_sql.to_string(),
            special_comments: vec!["/*!40101 SET NAMES binary*/;".to_string()],
        };
        let res = write_meta(&meta, uploader.as_mut()).await;
        if let Err(e) = uploader.close().await {
            warn!(path = %path, error = %e, "close file failed");
        }
        res
    }

    /// Rotate output files for one started source until it is consumed.
    async fn write_chunk_files(
        &self,
        meta: &dyn TableMeta,
        rows: &mut (dyn SqlRowIter + '_),
        chunk_index: usize,
    ) -> Result<()> {
        let mut namer = OutputFileNamer::for_chunk(meta, chunk_index);
        loop {
            let file_name = format!(
                "{}{}",
                namer.next_data_name(&self.cfg.output_templates),
                self.format.extension()
            );
            let mut sink = InterceptUploader::new(Arc::clone(&self.storage), file_name.clone());

            let res = self
                .format
                .write_insert(&self.cancel, &self.cfg, meta, rows, &mut sink)
                .await;
            if let Err(e) = sink.close().await {
                warn!(path = %file_name, error = %e, "close file failed");
            }
            if let Some(open_err) = sink.open_error() {
                return Err(open_err);
            }
            res?;

            if !sink.something_written() {
                break;
            }
            if self.cfg.file_size_limit == UNSPECIFIED_SIZE {
                break;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl DumpWriter for FileWriter {
    async fn write_database_meta(&self, db: &str, create_sql: &str) -> Result<()> {
        let namer = OutputFileNamer::for_database(db);
        let file_name = namer.render(&self.cfg.output_templates, FileKind::Schema);
        self.write_meta_to_file(db, create_sql, &format!("{}.sql", file_name))
            .await
    }

    async fn write_table_meta(&self, db: &str, table: &str, create_sql: &str) -> Result<()> {
        let namer = OutputFileNamer::for_table(db, table);
        let file_name = namer.render(&self.cfg.output_templates, FileKind::Table);
        self.write_meta_to_file(table, create_sql, &format!("{}.sql", file_name))
            .await
    }

    async fn write_view_meta(
        &self,
        db: &str,
        view: &str,
        create_table_sql: &str,
        create_view_sql: &str,
    ) -> Result<()> {
        let namer = OutputFileNamer::for_table(db, view);
        let table_file = namer.render(&self.cfg.output_templates, FileKind::Table);
        let view_file = namer.render(&self.cfg.output_templates, FileKind::View);
        self.write_meta_to_file(view, create_table_sql, &format!("{}.sql", table_file))
            .await?;
        self.write_meta_to_file(view, create_view_sql, &format!("{}.sql", view_file))
            .await
    }

    async fn write_table_data(
        &self,
        meta: &dyn TableMeta,
        mut sources: mpsc::Receiver<Box<dyn TableData>>,
    ) -> Result<()> {
        debug!(table = %meta.table_name(), format = %self.format, "start dumping table");
        let mut chunk_index = 0;
        loop {
            let mut source = tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!(table = %meta.table_name(), "dump canceled");
                    return Ok(());
                }
                received = sources.recv() => match received {
                    Some(source) => source,
                    None => break,
                },
            };

            let mut conn = self.pool.get_conn().await?;
            let res = match source.start(&mut conn).await {
                Ok(mut rows) => {
                    let res = self
                        .write_chunk_files(meta, rows.as_mut(), chunk_index)
                        .await;
                    let close_res = rows.close().await;
                    res.and(close_res)
                }
                Err(e) => Err(e),
            };
            self.pool.release_conn(conn).await;
            res?;
            chunk_index += 1;
        }
        debug!(table = %meta.table_name(), "table dumped");
        Ok(())
    }
}

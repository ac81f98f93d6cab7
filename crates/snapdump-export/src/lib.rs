//! # snapdump-export - streaming dump pipeline
//!
//! Logical dump core for MySQL-compatible databases (MySQL, MariaDB,
//! TiDB). Extracts schema DDL and row data over consistent-snapshot
//! connections and renders them as reloadable SQL or CSV files in an
//! external blob store, in bounded memory.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   channel    ┌───────────────┐
//! │ per-table    │ ───────────▶ │ FileWriter    │  one pinned conn/chunk
//! │ chunk source │  TableData   │ (driver)      │ ───────────────────────┐
//! └──────────────┘              └──────┬────────┘                        │
//!                                      │ rows, one at a time             ▼
//!                               ┌──────┴────────┐  filled buffers  ┌───────────┐
//!                               │ write_insert /│ ───────────────▶ │ WriterPipe│
//!                               │ write_..._csv │   (capacity 8)   │  drain    │
//!                               └───────────────┘                  └─────┬─────┘
//!                                                                        ▼
//!                                                              lazy InterceptUploader
//!                                                              ──▶ ExternalStorage
//! ```
//!
//! The encoder fills pooled 1 MiB buffers and tracks file/statement byte
//! counters; the drain worker writes buffers to the sink in order. Size
//! counters decide when to close an `INSERT` statement, rotate to a new
//! file, or stop the current chunk.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use snapdump_export::{
//!     ConnectionPool, DumpConfig, DumpWriter, FileWriter, select_all_from_table,
//! };
//! use snapdump_storage::LocalStorage;
//! use tokio_util::sync::CancellationToken;
//!
//! let cfg = DumpConfig::default();
//! cfg.validate()?;
//!
//! let pool = Arc::new(ConnectionPool::with_consistency(opts, 4).await?);
//! let storage = Arc::new(LocalStorage::new("/var/dumps"));
//! let writer = FileWriter::new(cfg.clone(), pool.clone(), storage, CancellationToken::new());
//!
//! let mut conn = pool.get_conn().await?;
//! let (meta, chunk) = select_all_from_table(&cfg, &mut conn, "shop", "orders").await?;
//! pool.release_conn(conn).await;
//!
//! let (tx, rx) = tokio::sync::mpsc::channel(1);
//! tx.send(Box::new(chunk) as Box<dyn snapdump_export::TableData>).await?;
//! drop(tx);
//! writer.write_table_data(&meta, rx).await?;
//! ```

pub mod config;
pub mod data;
pub mod encode;
pub mod error;
pub mod intercept;
pub mod ir;
pub mod namer;
mod pipe;
pub mod pool;
pub mod receiver;
pub mod sql;
pub mod writer;

#[cfg(test)]
mod mock;

pub use config::{CsvOptions, DumpConfig, FileFormat, ServerType, UNSPECIFIED_SIZE};
pub use data::{MetaData, MySqlRowStream, TableDataChunk, TableMetadata};
pub use encode::{write_insert, write_insert_csv, write_meta};
pub use error::{DumpError, Result};
pub use intercept::InterceptUploader;
pub use ir::{MetaSql, SqlRowIter, TableData, TableMeta};
pub use namer::{FileKind, NameTemplates, OutputFileNamer};
pub use pipe::LENGTH_LIMIT;
pub use pool::{create_conn_with_consistency, ConnectionPool};
pub use receiver::{slot_kind_for, RowReceiver, SlotKind};
pub use sql::{
    build_order_by_clause, build_select_field, build_select_query, build_where_condition,
    escape_identifier, get_primary_key_name, get_unique_index_name, list_columns,
    select_all_from_table, select_tidb_row_id, server_version, show_create_database,
    show_create_table, show_create_view, show_databases, show_tables, show_views, wrap_backticks,
    ColumnInfo, ServerInfo,
};
pub use writer::{DumpWriter, FileWriter};

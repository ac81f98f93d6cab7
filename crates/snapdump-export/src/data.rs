//! Concrete table data sources backed by `mysql_async`
//!
//! [`TableDataChunk`] carries the query for one chunk of a table and, once
//! started on a pinned connection, yields a [`MySqlRowStream`] that pulls
//! rows one at a time over the text protocol. The stream never buffers more
//! than the single peeked row; back-pressure comes from the writer pipe,
//! not from pre-reading.

use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::{Conn, QueryResult, Row, TextProtocol};
use tracing::debug;

use crate::error::{DumpError, Result};
use crate::ir::{MetaSql, SqlRowIter, TableData, TableMeta};
use crate::receiver::RowReceiver;

/// Table metadata as assembled by discovery.
#[derive(Debug, Clone, Default)]
pub struct TableMetadata {
    /// Database name
    pub database: String,
    /// Table name
    pub table: String,
    /// Uppercase column type names, in query order
    pub col_types: Vec<String>,
    /// Column names, in query order
    pub col_names: Vec<String>,
    /// Backtick-quoted column list, empty for `*`
    pub selected_field: String,
    /// Versioned comments prepended to output files
    pub special_comments: Vec<String>,
    /// `SHOW CREATE TABLE` body, when captured
    pub create_table_sql: String,
    /// `SHOW CREATE VIEW` body, when captured
    pub create_view_sql: String,
}

impl TableMeta for TableMetadata {
    fn database_name(&self) -> &str {
        &self.database
    }

    fn table_name(&self) -> &str {
        &self.table
    }

    fn column_count(&self) -> usize {
        self.col_types.len()
    }

    fn column_types(&self) -> &[String] {
        &self.col_types
    }

    fn column_names(&self) -> &[String] {
        &self.col_names
    }

    fn selected_field(&self) -> &str {
        &self.selected_field
    }

    fn special_comments(&self) -> &[String] {
        &self.special_comments
    }

    fn show_create_table(&self) -> &str {
        &self.create_table_sql
    }

    fn show_create_view(&self) -> &str {
        &self.create_view_sql
    }
}

/// A schema-level dump target.
pub struct MetaData {
    /// Name of the object, for logging
    pub target: String,
    /// DDL body
    pub meta_sql: String,
    /// Versioned comments prepended to the file
    pub special_comments: Vec<String>,
}

impl MetaSql for MetaData {
    fn special_comments(&self) -> &[String] {
        &self.special_comments
    }

    fn target_name(&self) -> &str {
        &self.target
    }

    fn meta_sql(&self) -> &str {
        &self.meta_sql
    }
}

/// One chunk of a table's rows, described by a SELECT query.
pub struct TableDataChunk {
    database: String,
    table: String,
    query: String,
    started: bool,
}

impl TableDataChunk {
    /// Create a chunk that dumps the result of `query`.
    pub fn new(database: impl Into<String>, table: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            table: table.into(),
            query: query.into(),
            started: false,
        }
    }

    /// Replace the chunk's query (e.g. with a caller-supplied override).
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    /// The SELECT statement this chunk runs.
    pub fn query(&self) -> &str {
        &self.query
    }
}

#[async_trait]
impl TableData for TableDataChunk {
    fn database(&self) -> &str {
        &self.database
    }

    fn table(&self) -> &str {
        &self.table
    }

    async fn start<'a>(&mut self, conn: &'a mut Conn) -> Result<Box<dyn SqlRowIter + 'a>> {
        if self.started {
            return Err(DumpError::Query(format!(
                "table data source for `{}`.`{}` was already started",
                self.database, self.table
            )));
        }
        self.started = true;
        debug!(table = %self.table, query = %self.query, "starting table data query");
        let result = conn
            .query_iter(self.query.clone())
            .await
            .map_err(|e| DumpError::query(&self.query, e))?;
        Ok(Box::new(MySqlRowStream::new(result)))
    }
}

/// Lazy cursor over a streaming text-protocol result.
pub struct MySqlRowStream<'a> {
    result: QueryResult<'a, 'static, TextProtocol>,
    peeked: Option<Row>,
    err: Option<DumpError>,
    done: bool,
}

impl<'a> MySqlRowStream<'a> {
    fn new(result: QueryResult<'a, 'static, TextProtocol>) -> Self {
        Self {
            result,
            peeked: None,
            err: None,
            done: false,
        }
    }
}

#[async_trait]
impl SqlRowIter for MySqlRowStream<'_> {
    async fn has_next(&mut self) -> bool {
        if self.peeked.is_some() {
            return true;
        }
        if self.done {
            return false;
        }
        match self.result.next().await {
            Ok(Some(row)) => {
                self.peeked = Some(row);
                true
            }
            Ok(None) => {
                self.done = true;
                false
            }
            Err(e) => {
                self.err = Some(DumpError::scan(e.to_string()));
                self.done = true;
                false
            }
        }
    }

    fn decode(&mut self, receiver: &mut RowReceiver) -> Result<()> {
        let row = self
            .peeked
            .as_ref()
            .ok_or_else(|| DumpError::scan("decode called without a current row"))?;
        receiver.bind_row(row)
    }

    fn advance(&mut self) {
        self.peeked = None;
    }

    fn take_error(&mut self) -> Option<DumpError> {
        self.err.take()
    }

    async fn close(&mut self) -> Result<()> {
        // Dropping the underlying result releases the cursor; the
        // connection cleans up any unread tail on its next use.
        self.peeked = None;
        self.done = true;
        Ok(())
    }
}

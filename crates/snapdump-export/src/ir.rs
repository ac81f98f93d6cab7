//! Core traits between the pipeline driver, the encoders and the database
//!
//! A table dump is fed by [`TableData`] sources (one per chunk); each source
//! yields one [`SqlRowIter`] over a pinned connection. [`TableMeta`] and
//! [`MetaSql`] describe what metadata discovery found; the pipeline only
//! consumes these interfaces and never performs discovery itself.

use async_trait::async_trait;
use mysql_async::Conn;

use crate::error::Result;
use crate::receiver::RowReceiver;

/// Meta information of a table, produced by metadata discovery.
pub trait TableMeta: Send + Sync {
    /// Database the table lives in
    fn database_name(&self) -> &str;
    /// Table name, unquoted
    fn table_name(&self) -> &str;
    /// Number of columns
    fn column_count(&self) -> usize;
    /// Uppercase database type name per column
    fn column_types(&self) -> &[String];
    /// Column names, unquoted
    fn column_names(&self) -> &[String];
    /// Comma-joined backtick-quoted column list, or empty for `*`
    fn selected_field(&self) -> &str;
    /// Versioned-comment directives prepended to each output file
    fn special_comments(&self) -> &[String];
    /// `SHOW CREATE TABLE` output
    fn show_create_table(&self) -> &str;
    /// `SHOW CREATE VIEW` output, empty for base tables
    fn show_create_view(&self) -> &str;
}

/// A schema-level dump target (database, table or view DDL).
pub trait MetaSql: Send + Sync {
    /// Versioned-comment directives prepended to the file
    fn special_comments(&self) -> &[String];
    /// Name of the object being dumped, for logging
    fn target_name(&self) -> &str;
    /// The DDL body to write
    fn meta_sql(&self) -> &str;
}

/// Lazy, single-pass iterator over a query result.
///
/// `has_next` peeks (reading one row ahead if needed) and returns `false`
/// at natural end or once an error occurred; the first error is then
/// available from `take_error`. `decode` must be called at most once per
/// position and `advance` exactly once per consumed row.
#[async_trait]
pub trait SqlRowIter: Send {
    /// Whether a row is available at the current position.
    async fn has_next(&mut self) -> bool;

    /// Fill the receiver from the current row.
    fn decode(&mut self, receiver: &mut RowReceiver) -> Result<()>;

    /// Move past the current row.
    fn advance(&mut self);

    /// First error encountered, if any.
    fn take_error(&mut self) -> Option<crate::error::DumpError>;

    /// Release the underlying cursor. Idempotent.
    async fn close(&mut self) -> Result<()>;
}

/// One chunk of a table's rows, dumped over a caller-supplied pinned
/// connection.
///
/// Lifecycle: created, then `start`ed exactly once (executing the query),
/// then iterated by a single consumer, then closed via the returned
/// iterator.
#[async_trait]
pub trait TableData: Send {
    /// Database the chunk belongs to
    fn database(&self) -> &str;
    /// Table the chunk belongs to
    fn table(&self) -> &str;

    /// Execute the chunk's query on `conn` and return the row iterator.
    ///
    /// The iterator borrows the connection; the caller must drop it before
    /// releasing the connection back to the pool.
    async fn start<'a>(&mut self, conn: &'a mut Conn) -> Result<Box<dyn SqlRowIter + 'a>>;
}

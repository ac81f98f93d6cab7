//! Test doubles for the pipeline seams

use std::collections::VecDeque;

use async_trait::async_trait;

use crate::error::{DumpError, Result};
use crate::ir::{MetaSql, SqlRowIter, TableMeta};
use crate::receiver::RowReceiver;

pub(crate) struct MockMeta {
    target: String,
    meta_sql: String,
    special_comments: Vec<String>,
}

impl MockMeta {
    pub(crate) fn new(target: &str, meta_sql: &str, special_comments: &[&str]) -> Self {
        Self {
            target: target.to_string(),
            meta_sql: meta_sql.to_string(),
            special_comments: special_comments.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl MetaSql for MockMeta {
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

pub(crate) struct MockTableMeta {
    database: String,
    table: String,
    col_types: Vec<String>,
    col_names: Vec<String>,
    selected_field: String,
    special_comments: Vec<String>,
}

impl MockTableMeta {
    pub(crate) fn new(database: &str, table: &str, col_types: &[&str]) -> Self {
        Self {
            database: database.to_string(),
            table: table.to_string(),
            col_types: col_types.iter().map(|s| s.to_string()).collect(),
            col_names: Vec::new(),
            selected_field: String::new(),
            special_comments: Vec::new(),
        }
    }

    pub(crate) fn with_names(mut self, names: &[&str]) -> Self {
        self.col_names = names.iter().map(|s| s.to_string()).collect();
        self
    }

    pub(crate) fn with_selected_field(mut self, selected_field: &str) -> Self {
        self.selected_field = selected_field.to_string();
        self
    }

    pub(crate) fn with_comments(mut self, comments: &[&str]) -> Self {
        self.special_comments = comments.iter().map(|s| s.to_string()).collect();
        self
    }
}

impl TableMeta for MockTableMeta {
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
        ""
    }

    fn show_create_view(&self) -> &str {
        ""
    }
}

pub(crate) struct MockRowIter {
    rows: VecDeque<Vec<Option<Vec<u8>>>>,
    err_at: Option<usize>,
    served: usize,
    err: Option<DumpError>,
}

impl MockRowIter {
    pub(crate) fn new(rows: Vec<Vec<Option<Vec<u8>>>>) -> Self {
        Self {
            rows: rows.into(),
            err_at: None,
            served: 0,
            err: None,
        }
    }

    /// Make `has_next` report an error once `n` rows were served.
    pub(crate) fn with_error_at(mut self, n: usize) -> Self {
        self.err_at = Some(n);
        self
    }

    /// Build owned row data from string slices (None = NULL).
    pub(crate) fn rows(data: &[&[Option<&str>]]) -> Vec<Vec<Option<Vec<u8>>>> {
        data.iter()
            .map(|row| {
                row.iter()
                    .map(|cell| cell.map(|s| s.as_bytes().to_vec()))
                    .collect()
            })
            .collect()
    }
}

#[async_trait]
impl SqlRowIter for MockRowIter {
    async fn has_next(&mut self) -> bool {
        if self.err.is_some() {
            return false;
        }
        if self.err_at == Some(self.served) {
            self.err = Some(DumpError::scan("mock row error"));
            return false;
        }
        !self.rows.is_empty()
    }

    fn decode(&mut self, receiver: &mut RowReceiver) -> Result<()> {
        let row = self
            .rows
            .front()
            .ok_or_else(|| DumpError::scan("decode past end of mock rows"))?;
        receiver.bind_values(row)
    }

    fn advance(&mut self) {
        self.rows.pop_front();
        self.served += 1;
    }

    fn take_error(&mut self) -> Option<DumpError> {
        self.err.take()
    }

    async fn close(&mut self) -> Result<()> {
        self.rows.clear();
        Ok(())
    }
}

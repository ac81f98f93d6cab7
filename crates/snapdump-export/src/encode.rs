//! Format encoders
//!
//! [`write_insert`] and [`write_insert_csv`] pull rows through a
//! [`SqlRowIter`] and stream the rendered bytes through a [`WriterPipe`] to
//! the sink. The producer loop and the drain worker run concurrently; the
//! producer closes the pipe input on every exit path, so the drain always
//! terminates before the encoder returns.
//!
//! Rotation: hitting the statement-size limit closes the current `INSERT`
//! group (`;\n`) and starts a new prefix inside the same file; hitting the
//! file-size limit additionally ends the invocation so the pipeline driver
//! can open the next chunk file and call the encoder again with the same
//! source.

use snapdump_storage::Uploader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::config::{DumpConfig, FileFormat, UNSPECIFIED_SIZE};
use crate::error::{DumpError, Result};
use crate::ir::{MetaSql, SqlRowIter, TableMeta};
use crate::pipe::{put_buffer, take_buffer, WriterPipe, LENGTH_LIMIT};
use crate::receiver::{write_csv_field, RowReceiver};
use crate::sql::{escape_identifier, wrap_backticks};

impl FileFormat {
    /// Dispatch to the encoder for this format.
    pub async fn write_insert(
        &self,
        cancel: &CancellationToken,
        cfg: &DumpConfig,
        meta: &dyn TableMeta,
        rows: &mut (dyn SqlRowIter + '_),
        writer: &mut dyn Uploader,
    ) -> Result<()> {
        match self {
            FileFormat::Sql => write_insert(cancel, cfg, meta, rows, writer).await,
            FileFormat::Csv => write_insert_csv(cancel, cfg, meta, rows, writer).await,
        }
    }
}

/// Write a schema-level target: special comments, then the DDL body.
pub async fn write_meta(meta: &dyn MetaSql, writer: &mut dyn Uploader) -> Result<()> {
    debug!(target = %meta.target_name(), "start dumping meta data");

    for comment in meta.special_comments() {
        writer.write_all(format!("{}\n", comment).as_bytes()).await?;
    }
    writer.write_all(meta.meta_sql().as_bytes()).await?;

    debug!(target = %meta.target_name(), "finish dumping meta data");
    Ok(())
}

/// Encode one table-data source as SQL `INSERT` statements.
pub async fn write_insert(
    cancel: &CancellationToken,
    cfg: &DumpConfig,
    meta: &dyn TableMeta,
    rows: &mut (dyn SqlRowIter + '_),
    writer: &mut dyn Uploader,
) -> Result<()> {
    if !rows.has_next().await {
        return Ok(());
    }

    let (mut pipe, drain) = WriterPipe::new(cfg.file_size_limit, cfg.statement_size_limit);
    let produce = async {
        let res = produce_insert(&mut pipe, cfg, meta, &mut *rows, cancel).await;
        pipe.close_input();
        res
    };
    let (res, ()) = tokio::join!(produce, drain.run(writer, cancel));

    res?;
    if let Some(e) = rows.take_error() {
        return Err(e);
    }
    match pipe.error() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

async fn produce_insert(
    pipe: &mut WriterPipe,
    cfg: &DumpConfig,
    meta: &dyn TableMeta,
    rows: &mut (dyn SqlRowIter + '_),
    cancel: &CancellationToken,
) -> Result<()> {
    let mut bf = take_buffer();
    for comment in meta.special_comments() {
        bf.extend_from_slice(comment.as_bytes());
        bf.push(b'\n');
    }
    pipe.current_file_size += bf.len() as u64;

    let mut row = RowReceiver::from_column_types(meta.column_types());
    let mut counter = 0u64;
    let escape_backslash = cfg.escape_backslash;

    let table = wrap_backticks(&escape_identifier(meta.table_name()));
    let selected_field = meta.selected_field();
    // a non-empty column list is required when generated columns exist
    let insert_prefix = if !selected_field.is_empty() {
        format!("INSERT INTO {} ({}) VALUES\n", table, selected_field)
    } else {
        format!("INSERT INTO {} VALUES\n", table)
    };
    let prefix_len = insert_prefix.len() as u64;

    while rows.has_next().await {
        pipe.current_statement_size = 0;
        bf.extend_from_slice(insert_prefix.as_bytes());
        pipe.add_file_size(prefix_len);

        while rows.has_next().await {
            if let Err(e) = rows.decode(&mut row) {
                error!(table = %meta.table_name(), "scanning row failed");
                return Err(e);
            }

            let last_len = bf.len();
            row.write_sql(&mut bf, escape_backslash);
            counter += 1;
            // 2 accounts for the mandatory ",\n" or ";\n"
            pipe.add_file_size((bf.len() - last_len) as u64 + 2);

            rows.advance();
            let should_switch = pipe.should_switch_statement();
            if rows.has_next().await && !should_switch {
                bf.extend_from_slice(b",\n");
            } else {
                bf.extend_from_slice(b";\n");
            }
            if bf.len() >= LENGTH_LIMIT {
                pipe.send(bf).await;
                bf = take_buffer();
            }

            if cancel.is_cancelled() {
                return Err(DumpError::Canceled);
            }
            if let Some(e) = pipe.error() {
                return Err(e);
            }
            if should_switch {
                break;
            }
        }
        if pipe.should_switch_file() {
            break;
        }
    }

    debug!(table = %meta.table_name(), rows = counter, "dumped table rows");
    if !bf.is_empty() {
        pipe.send(bf).await;
    } else {
        put_buffer(bf);
    }
    Ok(())
}

/// Encode one table-data source as CSV records.
///
/// Same plumbing as [`write_insert`] minus statement boundaries; the
/// statement-size limit is disabled.
pub async fn write_insert_csv(
    cancel: &CancellationToken,
    cfg: &DumpConfig,
    meta: &dyn TableMeta,
    rows: &mut (dyn SqlRowIter + '_),
    writer: &mut dyn Uploader,
) -> Result<()> {
    if !rows.has_next().await {
        return Ok(());
    }

    let (mut pipe, drain) = WriterPipe::new(cfg.file_size_limit, UNSPECIFIED_SIZE);
    let produce = async {
        let res = produce_csv(&mut pipe, cfg, meta, &mut *rows, cancel).await;
        pipe.close_input();
        res
    };
    let (res, ()) = tokio::join!(produce, drain.run(writer, cancel));

    res?;
    if let Some(e) = rows.take_error() {
        return Err(e);
    }
    match pipe.error() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

async fn produce_csv(
    pipe: &mut WriterPipe,
    cfg: &DumpConfig,
    meta: &dyn TableMeta,
    rows: &mut (dyn SqlRowIter + '_),
    cancel: &CancellationToken,
) -> Result<()> {
    let opt = &cfg.csv;
    let mut bf = take_buffer();

    if !opt.no_header && !meta.column_names().is_empty() {
        for (i, col) in meta.column_names().iter().enumerate() {
            if i > 0 {
                bf.extend_from_slice(opt.separator.as_bytes());
            }
            write_csv_field(
                col.as_bytes(),
                &mut bf,
                cfg.escape_backslash,
                opt.delimiter.as_bytes(),
            );
        }
        bf.push(b'\n');
    }
    pipe.current_file_size += bf.len() as u64;

    let mut row = RowReceiver::from_column_types(meta.column_types());
    let mut counter = 0u64;

    while rows.has_next().await {
        if let Err(e) = rows.decode(&mut row) {
            error!(table = %meta.table_name(), "scanning row failed");
            return Err(e);
        }

        let last_len = bf.len();
        row.write_csv(&mut bf, cfg.escape_backslash, opt);
        counter += 1;
        // 1 accounts for the line terminator
        pipe.current_file_size += (bf.len() - last_len) as u64 + 1;

        bf.push(b'\n');
        if bf.len() >= LENGTH_LIMIT {
            pipe.send(bf).await;
            bf = take_buffer();
        }

        rows.advance();
        if cancel.is_cancelled() {
            return Err(DumpError::Canceled);
        }
        if let Some(e) = pipe.error() {
            return Err(e);
        }
        if pipe.should_switch_file() {
            break;
        }
    }

    debug!(table = %meta.table_name(), rows = counter, "dumped table rows");
    if !bf.is_empty() {
        pipe.send(bf).await;
    } else {
        put_buffer(bf);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CsvOptions;
    use crate::mock::{MockMeta, MockRowIter, MockTableMeta};
    use snapdump_storage::BufferUploader;

    const EMPLOYEE_TYPES: [&str; 5] = ["INT", "SET", "VARCHAR", "VARCHAR", "TEXT"];

    fn employee_rows() -> Vec<Vec<Option<Vec<u8>>>> {
        MockRowIter::rows(&[
            &[
                Some("1"),
                Some("male"),
                Some("bob@mail.com"),
                Some("020-1234"),
                None,
            ],
            &[
                Some("2"),
                Some("female"),
                Some("sarah@mail.com"),
                Some("020-1253"),
                Some("healthy"),
            ],
            &[
                Some("3"),
                Some("male"),
                Some("john@mail.com"),
                Some("020-1256"),
                Some("healthy"),
            ],
            &[
                Some("4"),
                Some("female"),
                Some("sarah@mail.com"),
                Some("020-1235"),
                Some("healthy"),
            ],
        ])
    }

    fn employee_meta() -> MockTableMeta {
        MockTableMeta::new("test", "employee", &EMPLOYEE_TYPES).with_comments(&[
            "/*!40101 SET NAMES binary*/;",
            "/*!40014 SET FOREIGN_KEY_CHECKS=0*/;",
        ])
    }

    #[tokio::test]
    async fn test_write_meta() {
        let create_table_stmt = "CREATE TABLE `t1` (\n\
                                 \x20 `a` int(11) DEFAULT NULL\n\
                                 ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_0900_ai_ci;\n";
        let meta = MockMeta::new(
            "t1",
            create_table_stmt,
            &["/*!40103 SET TIME_ZONE='+00:00' */;"],
        );
        let mut sink = BufferUploader::new();
        let handle = sink.handle();

        write_meta(&meta, &mut sink).await.unwrap();

        let expected = format!("/*!40103 SET TIME_ZONE='+00:00' */;\n{}", create_table_stmt);
        assert_eq!(handle.as_string(), expected);
    }

    #[tokio::test]
    async fn test_write_insert() {
        let meta = employee_meta();
        let mut rows = MockRowIter::new(employee_rows());
        let mut sink = BufferUploader::new();
        let handle = sink.handle();
        let cfg = DumpConfig::default();
        let cancel = CancellationToken::new();

        write_insert(&cancel, &cfg, &meta, &mut rows, &mut sink)
            .await
            .unwrap();

        let expected = "/*!40101 SET NAMES binary*/;\n\
                        /*!40014 SET FOREIGN_KEY_CHECKS=0*/;\n\
                        INSERT INTO `employee` VALUES\n\
                        (1,'male','bob@mail.com','020-1234',NULL),\n\
                        (2,'female','sarah@mail.com','020-1253','healthy'),\n\
                        (3,'male','john@mail.com','020-1256','healthy'),\n\
                        (4,'female','sarah@mail.com','020-1235','healthy');\n";
        assert_eq!(handle.as_string(), expected);
    }

    #[tokio::test]
    async fn test_write_insert_returns_error_after_closing_statement() {
        let meta = employee_meta();
        // iterator fails after serving the third row
        let mut rows = MockRowIter::new(employee_rows()).with_error_at(3);
        let mut sink = BufferUploader::new();
        let handle = sink.handle();
        let cfg = DumpConfig::default();
        let cancel = CancellationToken::new();

        let err = write_insert(&cancel, &cfg, &meta, &mut rows, &mut sink)
            .await
            .unwrap_err();
        assert!(matches!(err, DumpError::Scan(_)));

        let expected = "/*!40101 SET NAMES binary*/;\n\
                        /*!40014 SET FOREIGN_KEY_CHECKS=0*/;\n\
                        INSERT INTO `employee` VALUES\n\
                        (1,'male','bob@mail.com','020-1234',NULL),\n\
                        (2,'female','sarah@mail.com','020-1253','healthy'),\n\
                        (3,'male','john@mail.com','020-1256','healthy');\n";
        assert_eq!(handle.as_string(), expected);
    }

    #[tokio::test]
    async fn test_write_insert_with_column_list() {
        let meta = MockTableMeta::new("test", "t", &["INT"]).with_selected_field("`a`");
        let mut rows = MockRowIter::new(MockRowIter::rows(&[&[Some("1")]]));
        let mut sink = BufferUploader::new();
        let handle = sink.handle();
        let cfg = DumpConfig::default();
        let cancel = CancellationToken::new();

        write_insert(&cancel, &cfg, &meta, &mut rows, &mut sink)
            .await
            .unwrap();

        assert_eq!(handle.as_string(), "INSERT INTO `t` (`a`) VALUES\n(1);\n");
    }

    #[tokio::test]
    async fn test_statement_size_rotation() {
        let meta = MockTableMeta::new("test", "t", &["INT"]);
        let mut rows = MockRowIter::new(MockRowIter::rows(&[&[Some("1")], &[Some("2")]]));
        let mut sink = BufferUploader::new();
        let handle = sink.handle();
        let cfg = DumpConfig {
            statement_size_limit: 1,
            ..Default::default()
        };
        let cancel = CancellationToken::new();

        write_insert(&cancel, &cfg, &meta, &mut rows, &mut sink)
            .await
            .unwrap();

        // every row closes its statement and a fresh prefix follows
        let expected = "INSERT INTO `t` VALUES\n(1);\nINSERT INTO `t` VALUES\n(2);\n";
        assert_eq!(handle.as_string(), expected);
    }

    #[tokio::test]
    async fn test_write_insert_empty_source_writes_nothing() {
        let meta = employee_meta();
        let mut rows = MockRowIter::new(Vec::new());
        let mut sink = BufferUploader::new();
        let handle = sink.handle();
        let cfg = DumpConfig::default();
        let cancel = CancellationToken::new();

        write_insert(&cancel, &cfg, &meta, &mut rows, &mut sink)
            .await
            .unwrap();

        assert_eq!(handle.contents(), b"");
    }

    #[tokio::test]
    async fn test_write_insert_canceled() {
        let meta = employee_meta();
        let mut rows = MockRowIter::new(employee_rows());
        let mut sink = BufferUploader::new();
        let handle = sink.handle();
        let cfg = DumpConfig::default();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = write_insert(&cancel, &cfg, &meta, &mut rows, &mut sink)
            .await
            .unwrap_err();
        assert!(matches!(err, DumpError::Canceled));
        assert_eq!(handle.contents(), b"");
    }

    #[tokio::test]
    async fn test_write_insert_csv_default_options() {
        let meta = MockTableMeta::new("test", "employee", &EMPLOYEE_TYPES);
        let mut rows = MockRowIter::new(employee_rows());
        let mut sink = BufferUploader::new();
        let handle = sink.handle();
        let cfg = DumpConfig {
            csv: CsvOptions {
                no_header: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let cancel = CancellationToken::new();

        write_insert_csv(&cancel, &cfg, &meta, &mut rows, &mut sink)
            .await
            .unwrap();

        let expected = "1,\"male\",\"bob@mail.com\",\"020-1234\",\\N\n\
                        2,\"female\",\"sarah@mail.com\",\"020-1253\",\"healthy\"\n\
                        3,\"male\",\"john@mail.com\",\"020-1256\",\"healthy\"\n\
                        4,\"female\",\"sarah@mail.com\",\"020-1235\",\"healthy\"\n";
        assert_eq!(handle.as_string(), expected);
    }

    #[tokio::test]
    async fn test_write_insert_csv_custom_separator_and_delimiter() {
        let meta = MockTableMeta::new("test", "employee", &EMPLOYEE_TYPES);
        let mut rows = MockRowIter::new(employee_rows());
        let mut sink = BufferUploader::new();
        let handle = sink.handle();
        let cfg = DumpConfig {
            csv: CsvOptions {
                separator: ";".to_string(),
                delimiter: "'".to_string(),
                null_value: "\\N".to_string(),
                no_header: true,
            },
            ..Default::default()
        };
        let cancel = CancellationToken::new();

        write_insert_csv(&cancel, &cfg, &meta, &mut rows, &mut sink)
            .await
            .unwrap();

        let expected = "1;'male';'bob@mail.com';'020-1234';\\N\n\
                        2;'female';'sarah@mail.com';'020-1253';'healthy'\n\
                        3;'male';'john@mail.com';'020-1256';'healthy'\n\
                        4;'female';'sarah@mail.com';'020-1235';'healthy'\n";
        assert_eq!(handle.as_string(), expected);
    }

    #[tokio::test]
    async fn test_write_insert_csv_delimiter_inside_values_and_header() {
        let meta = MockTableMeta::new("test", "employee", &EMPLOYEE_TYPES)
            .with_names(&["id", "gender", "email", "phone_number", "status"]);
        let mut rows = MockRowIter::new(employee_rows());
        let mut sink = BufferUploader::new();
        let handle = sink.handle();
        let cfg = DumpConfig {
            csv: CsvOptions {
                separator: "&;,?".to_string(),
                delimiter: "ma".to_string(),
                null_value: "\\N".to_string(),
                no_header: false,
            },
            ..Default::default()
        };
        let cancel = CancellationToken::new();

        write_insert_csv(&cancel, &cfg, &meta, &mut rows, &mut sink)
            .await
            .unwrap();

        let expected = "maidma&;,?magenderma&;,?maemamailma&;,?maphone_numberma&;,?mastatusma\n\
                        1&;,?mamamalema&;,?mabob@mamail.comma&;,?ma020-1234ma&;,?\\N\n\
                        2&;,?mafemamalema&;,?masarah@mamail.comma&;,?ma020-1253ma&;,?mahealthyma\n\
                        3&;,?mamamalema&;,?majohn@mamail.comma&;,?ma020-1256ma&;,?mahealthyma\n\
                        4&;,?mafemamalema&;,?masarah@mamail.comma&;,?ma020-1235ma&;,?mahealthyma\n";
        assert_eq!(handle.as_string(), expected);
    }

    #[tokio::test]
    async fn test_binary_column_renders_hex() {
        let meta = MockTableMeta::new("test", "t", &["BINARY"]);
        let mut rows = MockRowIter::new(MockRowIter::rows(&[&[Some("1234")]]));
        let mut sink = BufferUploader::new();
        let handle = sink.handle();
        let cfg = DumpConfig::default();
        let cancel = CancellationToken::new();

        write_insert(&cancel, &cfg, &meta, &mut rows, &mut sink)
            .await
            .unwrap();

        assert_eq!(
            handle.as_string(),
            "INSERT INTO `t` VALUES\n(x'31323334');\n"
        );
    }
}

//! Server metadata queries and SQL assembly
//!
//! Catalog listing, `SHOW CREATE` capture and SELECT-query building for the
//! dump pipeline. Everything here runs on a caller-supplied connection; the
//! pipeline core only consumes the results.

use mysql_async::prelude::*;
use mysql_async::Conn;
use tracing::debug;

use crate::config::{DumpConfig, ServerType};
use crate::data::{TableDataChunk, TableMetadata};
use crate::error::{DumpError, Result};

/// Double embedded backticks so an identifier can be backtick-quoted.
pub fn escape_identifier(identifier: &str) -> String {
    identifier.replace('`', "``")
}

/// Wrap an identifier in backticks unless it already carries them.
pub fn wrap_backticks(identifier: &str) -> String {
    if !identifier.starts_with('`') && !identifier.ends_with('`') {
        format!("`{}`", identifier)
    } else {
        identifier.to_string()
    }
}

/// One column as discovered from INFORMATION_SCHEMA.
#[derive(Debug, Clone)]
pub struct ColumnInfo {
    /// Column name, unquoted
    pub name: String,
    /// Uppercase data type name (e.g. `INT`, `VARCHAR`)
    pub data_type: String,
    /// Whether the column is stored/virtual generated
    pub generated: bool,
}

/// List a table's columns in ordinal order.
pub async fn list_columns(conn: &mut Conn, database: &str, table: &str) -> Result<Vec<ColumnInfo>> {
    const QUERY: &str = "SELECT COLUMN_NAME, DATA_TYPE, EXTRA \
                         FROM INFORMATION_SCHEMA.COLUMNS \
                         WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? \
                         ORDER BY ORDINAL_POSITION";
    let rows: Vec<(String, String, String)> = conn
        .exec(QUERY, (database, table))
        .await
        .map_err(|e| DumpError::query(QUERY, e))?;

    Ok(rows
        .into_iter()
        .map(|(name, data_type, extra)| ColumnInfo {
            name,
            data_type: data_type.to_uppercase(),
            generated: matches!(extra.as_str(), "STORED GENERATED" | "VIRTUAL GENERATED"),
        })
        .collect())
}

/// Build the column list for `INSERT`/`SELECT` statements.
///
/// Returns the empty string (meaning `*`) unless `complete_insert` is set
/// or generated columns force an explicit list. Generated columns are
/// excluded from explicit lists so the dump reloads without column-count
/// mismatches.
pub fn selected_field_from_columns(columns: &[ColumnInfo], complete_insert: bool) -> String {
    let has_generated = columns.iter().any(|c| c.generated);
    if !complete_insert && !has_generated {
        return String::new();
    }
    columns
        .iter()
        .filter(|c| !c.generated)
        .map(|c| wrap_backticks(&escape_identifier(&c.name)))
        .collect::<Vec<_>>()
        .join(",")
}

/// Build the column list for a table, per the configuration.
pub async fn build_select_field(
    conn: &mut Conn,
    database: &str,
    table: &str,
    complete_insert: bool,
) -> Result<String> {
    let columns = list_columns(conn, database, table).await?;
    Ok(selected_field_from_columns(&columns, complete_insert))
}

/// Assemble the row-dump query for one table.
pub fn build_select_query(
    database: &str,
    table: &str,
    fields: &str,
    where_condition: &str,
    order_by_clause: &str,
) -> String {
    let mut query = String::from("SELECT ");
    if fields.is_empty() {
        query.push('*');
    } else {
        query.push_str(fields);
    }
    query.push_str(" FROM `");
    query.push_str(&escape_identifier(database));
    query.push_str("`.`");
    query.push_str(&escape_identifier(table));
    query.push('`');

    if !where_condition.is_empty() {
        query.push(' ');
        query.push_str(where_condition);
    }
    if !order_by_clause.is_empty() {
        query.push(' ');
        query.push_str(order_by_clause);
    }
    query
}

/// Combine the configured row filter with a chunk-level condition into a
/// `WHERE …` clause (empty when both filters are empty).
pub fn build_where_condition(cfg: &DumpConfig, where_clause: &str) -> String {
    let mut query = String::new();
    let mut separator = "WHERE";
    if let Some(configured) = cfg.where_clause.as_deref() {
        if !configured.is_empty() {
            query.push_str(separator);
            query.push(' ');
            query.push_str(configured);
            separator = "AND";
        }
    }
    if !where_clause.is_empty() {
        if !query.is_empty() {
            query.push(' ');
        }
        query.push_str(separator);
        query.push(' ');
        query.push_str(where_clause);
    }
    query
}

/// Build the ordering clause for deterministic dumps.
///
/// On TiDB, tables without an integer primary key still expose the hidden
/// `_tidb_rowid`, which gives a stable order.
pub async fn build_order_by_clause(
    cfg: &DumpConfig,
    conn: &mut Conn,
    database: &str,
    table: &str,
) -> Result<String> {
    if !cfg.sort_by_pk {
        return Ok(String::new());
    }
    if cfg.server_type == ServerType::TiDb {
        if select_tidb_row_id(conn, database, table).await? {
            return Ok("ORDER BY _tidb_rowid".to_string());
        }
        return Ok(String::new());
    }
    match get_primary_key_name(conn, database, table).await? {
        Some(pk) => Ok(format!("ORDER BY `{}`", escape_identifier(&pk))),
        None => Ok(String::new()),
    }
}

/// Probe whether a table exposes the hidden `_tidb_rowid` column.
pub async fn select_tidb_row_id(conn: &mut Conn, database: &str, table: &str) -> Result<bool> {
    const ERR_BAD_FIELD: u16 = 1054;
    let query = format!(
        "SELECT _tidb_rowid from `{}`.`{}` LIMIT 0",
        escape_identifier(database),
        escape_identifier(table)
    );
    match conn.query_drop(&query).await {
        Ok(()) => Ok(true),
        Err(mysql_async::Error::Server(server_err)) if server_err.code == ERR_BAD_FIELD => {
            Ok(false)
        }
        Err(e) => Err(DumpError::query(&query, e)),
    }
}

/// Primary key column of a table, if one exists.
pub async fn get_primary_key_name(
    conn: &mut Conn,
    database: &str,
    table: &str,
) -> Result<Option<String>> {
    const QUERY: &str = "SELECT column_name FROM information_schema.columns \
                         WHERE table_schema = ? AND table_name = ? AND column_key = 'PRI' \
                         ORDER BY ORDINAL_POSITION LIMIT 1";
    conn.exec_first(QUERY, (database, table))
        .await
        .map_err(|e| DumpError::query(QUERY, e))
}

/// First unique-index column of a table, if one exists.
pub async fn get_unique_index_name(
    conn: &mut Conn,
    database: &str,
    table: &str,
) -> Result<Option<String>> {
    const QUERY: &str = "SELECT column_name FROM information_schema.columns \
                         WHERE table_schema = ? AND table_name = ? AND column_key = 'UNI' \
                         ORDER BY ORDINAL_POSITION LIMIT 1";
    conn.exec_first(QUERY, (database, table))
        .await
        .map_err(|e| DumpError::query(QUERY, e))
}

/// List all databases on the server.
pub async fn show_databases(conn: &mut Conn) -> Result<Vec<String>> {
    const QUERY: &str = "SHOW DATABASES";
    conn.query(QUERY)
        .await
        .map_err(|e| DumpError::query(QUERY, e))
}

/// List the base tables of a database.
pub async fn show_tables(conn: &mut Conn, database: &str) -> Result<Vec<String>> {
    const QUERY: &str = "SELECT table_name FROM information_schema.tables \
                         WHERE table_schema = ? AND table_type = 'BASE TABLE'";
    conn.exec(QUERY, (database,))
        .await
        .map_err(|e| DumpError::query(QUERY, e))
}

/// List the views of a database.
pub async fn show_views(conn: &mut Conn, database: &str) -> Result<Vec<String>> {
    const QUERY: &str = "SELECT table_name FROM information_schema.tables \
                         WHERE table_schema = ? AND table_type = 'VIEW'";
    conn.exec(QUERY, (database,))
        .await
        .map_err(|e| DumpError::query(QUERY, e))
}

/// `SHOW CREATE DATABASE` body.
pub async fn show_create_database(conn: &mut Conn, database: &str) -> Result<String> {
    let query = format!(
        "SHOW CREATE DATABASE `{}`",
        escape_identifier(database)
    );
    let row: Option<(String, String)> = conn
        .query_first(&query)
        .await
        .map_err(|e| DumpError::query(&query, e))?;
    row.map(|(_, create_sql)| create_sql)
        .ok_or_else(|| DumpError::Query(format!("{}: empty result", query)))
}

/// `SHOW CREATE TABLE` body.
pub async fn show_create_table(conn: &mut Conn, database: &str, table: &str) -> Result<String> {
    let query = format!(
        "SHOW CREATE TABLE `{}`.`{}`",
        escape_identifier(database),
        escape_identifier(table)
    );
    let row: Option<(String, String)> = conn
        .query_first(&query)
        .await
        .map_err(|e| DumpError::query(&query, e))?;
    row.map(|(_, create_sql)| create_sql)
        .ok_or_else(|| DumpError::Query(format!("{}: empty result", query)))
}

/// View DDL as a two-part script.
///
/// Returns `(create_table_sql, create_view_sql)`: a MyISAM stub table that
/// reserves the name during reload, and the real view definition wrapped in
/// charset save/restore statements.
pub async fn show_create_view(
    conn: &mut Conn,
    database: &str,
    view: &str,
) -> Result<(String, String)> {
    let query = format!(
        "SHOW FIELDS FROM `{}`.`{}`",
        escape_identifier(database),
        escape_identifier(view)
    );
    let rows: Vec<mysql_async::Row> = conn
        .query(&query)
        .await
        .map_err(|e| DumpError::query(&query, e))?;
    let field_lines: Vec<String> = rows
        .iter()
        .filter_map(|row| row.get::<Option<String>, _>(0).flatten())
        .map(|name| format!("`{}` int", escape_identifier(&name)))
        .collect();

    let mut create_table_sql = format!("CREATE TABLE `{}`(\n", escape_identifier(view));
    create_table_sql.push_str(&field_lines.join(",\n"));
    create_table_sql.push_str("\n)ENGINE=MyISAM;\n");

    let mut create_view_sql = String::new();
    create_view_sql.push_str(&format!(
        "DROP TABLE IF EXISTS `{}`;\n",
        escape_identifier(view)
    ));
    create_view_sql.push_str(&format!(
        "DROP VIEW IF EXISTS `{}`;\n",
        escape_identifier(view)
    ));

    let query = format!(
        "SHOW CREATE VIEW `{}`.`{}`",
        escape_identifier(database),
        escape_identifier(view)
    );
    let row: Option<(String, String, String, String)> = conn
        .query_first(&query)
        .await
        .map_err(|e| DumpError::query(&query, e))?;
    let (_, body, character_set, collation) =
        row.ok_or_else(|| DumpError::Query(format!("{}: empty result", query)))?;

    set_charset(&mut create_view_sql, &character_set, &collation);
    create_view_sql.push_str(&body);
    create_view_sql.push_str(";\n");
    restore_charset(&mut create_view_sql);

    Ok((create_table_sql, create_view_sql))
}

/// Save the session charset and switch to the view's charset.
pub fn set_charset(out: &mut String, character_set: &str, collation: &str) {
    out.push_str("SET @PREV_CHARACTER_SET_CLIENT=@@CHARACTER_SET_CLIENT;\n");
    out.push_str("SET @PREV_CHARACTER_SET_RESULTS=@@CHARACTER_SET_RESULTS;\n");
    out.push_str("SET @PREV_COLLATION_CONNECTION=@@COLLATION_CONNECTION;\n");
    out.push_str(&format!("SET character_set_client = {};\n", character_set));
    out.push_str(&format!("SET character_set_results = {};\n", character_set));
    out.push_str(&format!("SET collation_connection = {};\n", collation));
}

/// Restore the session charset saved by [`set_charset`].
pub fn restore_charset(out: &mut String) {
    out.push_str("SET character_set_client = @PREV_CHARACTER_SET_CLIENT;\n");
    out.push_str("SET character_set_results = @PREV_CHARACTER_SET_RESULTS;\n");
    out.push_str("SET collation_connection = @PREV_COLLATION_CONNECTION;\n");
}

/// `SELECT version()` output.
pub async fn server_version(conn: &mut Conn) -> Result<String> {
    const QUERY: &str = "SELECT version()";
    let version: Option<String> = conn
        .query_first(QUERY)
        .await
        .map_err(|e| DumpError::query(QUERY, e))?;
    version.ok_or_else(|| DumpError::Query(format!("{}: empty result", QUERY)))
}

/// Server kind and raw version string.
#[derive(Debug, Clone)]
pub struct ServerInfo {
    /// Detected server kind
    pub server_type: ServerType,
    /// Raw `SELECT version()` output
    pub version: String,
}

impl ServerInfo {
    /// Classify a server from its version string.
    pub fn detect(version: &str) -> Self {
        let lower = version.to_lowercase();
        let server_type = if lower.contains("tidb") {
            ServerType::TiDb
        } else if lower.contains("mariadb") {
            ServerType::MariaDb
        } else if version.is_empty() {
            ServerType::Unknown
        } else {
            ServerType::MySql
        };
        debug!(version = %version, server_type = ?server_type, "detected server");
        Self {
            server_type,
            version: version.to_string(),
        }
    }
}

/// Build the metadata and the full-table data source for one table.
pub async fn select_all_from_table(
    cfg: &DumpConfig,
    conn: &mut Conn,
    database: &str,
    table: &str,
) -> Result<(TableMetadata, TableDataChunk)> {
    let columns = list_columns(conn, database, table).await?;
    let selected_field = selected_field_from_columns(&columns, cfg.complete_insert);

    // an explicit column list excludes generated columns, so the receiver
    // shape must exclude them too
    let dumped: Vec<&ColumnInfo> = if selected_field.is_empty() {
        columns.iter().collect()
    } else {
        columns.iter().filter(|c| !c.generated).collect()
    };

    let order_by_clause = build_order_by_clause(cfg, conn, database, table).await?;
    let where_condition = build_where_condition(cfg, "");
    let query = build_select_query(
        database,
        table,
        &selected_field,
        &where_condition,
        &order_by_clause,
    );

    let meta = TableMetadata {
        database: database.to_string(),
        table: table.to_string(),
        col_types: dumped.iter().map(|c| c.data_type.clone()).collect(),
        col_names: dumped.iter().map(|c| c.name.clone()).collect(),
        selected_field,
        special_comments: vec!["/*!40101 SET NAMES binary*/;".to_string()],
        create_table_sql: String::new(),
        create_view_sql: String::new(),
    };
    let chunk = TableDataChunk::new(database, table, query);
    Ok((meta, chunk))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_identifier() {
        assert_eq!(escape_identifier("plain"), "plain");
        assert_eq!(escape_identifier("wei`rd"), "wei``rd");
    }

    #[test]
    fn test_wrap_backticks() {
        assert_eq!(wrap_backticks("t"), "`t`");
        assert_eq!(wrap_backticks("`t`"), "`t`");
    }

    #[test]
    fn test_build_select_query() {
        assert_eq!(
            build_select_query("shop", "orders", "", "", ""),
            "SELECT * FROM `shop`.`orders`"
        );
        assert_eq!(
            build_select_query("shop", "orders", "`id`,`total`", "WHERE id > 5", "ORDER BY `id`"),
            "SELECT `id`,`total` FROM `shop`.`orders` WHERE id > 5 ORDER BY `id`"
        );
    }

    #[test]
    fn test_build_where_condition() {
        let mut cfg = DumpConfig::default();
        assert_eq!(build_where_condition(&cfg, ""), "");
        assert_eq!(build_where_condition(&cfg, "id > 5"), "WHERE id > 5");

        cfg.where_clause = Some("status = 'active'".to_string());
        assert_eq!(build_where_condition(&cfg, ""), "WHERE status = 'active'");
        assert_eq!(
            build_where_condition(&cfg, "id > 5"),
            "WHERE status = 'active' AND id > 5"
        );
    }

    #[test]
    fn test_selected_field_default_is_star() {
        let columns = vec![
            ColumnInfo {
                name: "id".to_string(),
                data_type: "INT".to_string(),
                generated: false,
            },
            ColumnInfo {
                name: "name".to_string(),
                data_type: "VARCHAR".to_string(),
                generated: false,
            },
        ];
        assert_eq!(selected_field_from_columns(&columns, false), "");
        assert_eq!(selected_field_from_columns(&columns, true), "`id`,`name`");
    }

    #[test]
    fn test_selected_field_excludes_generated_columns() {
        let columns = vec![
            ColumnInfo {
                name: "id".to_string(),
                data_type: "INT".to_string(),
                generated: false,
            },
            ColumnInfo {
                name: "total".to_string(),
                data_type: "DECIMAL".to_string(),
                generated: true,
            },
        ];
        // generated columns force an explicit list even without complete_insert
        assert_eq!(selected_field_from_columns(&columns, false), "`id`");
    }

    #[test]
    fn test_server_detection() {
        assert_eq!(ServerInfo::detect("8.0.18").server_type, ServerType::MySql);
        assert_eq!(
            ServerInfo::detect("5.5.5-10.4.8-MariaDB-log").server_type,
            ServerType::MariaDb
        );
        assert_eq!(
            ServerInfo::detect("5.7.25-TiDB-v4.0.0-rc").server_type,
            ServerType::TiDb
        );
        assert_eq!(ServerInfo::detect("").server_type, ServerType::Unknown);
    }

    #[test]
    fn test_charset_save_restore() {
        let mut out = String::new();
        set_charset(&mut out, "utf8", "utf8_general_ci");
        assert!(out.contains("SET @PREV_CHARACTER_SET_CLIENT=@@CHARACTER_SET_CLIENT;\n"));
        assert!(out.contains("SET character_set_client = utf8;\n"));
        assert!(out.contains("SET collation_connection = utf8_general_ci;\n"));

        restore_charset(&mut out);
        assert!(out.ends_with("SET collation_connection = @PREV_COLLATION_CONNECTION;\n"));
    }
}

//! Dump configuration
//!
//! The pipeline receives a resolved [`DumpConfig`] value; loading it from a
//! CLI or file is the caller's job. [`DumpConfig::validate`] is the explicit
//! resolution pass run once before a dump starts.

use serde::{Deserialize, Serialize};

use crate::error::{DumpError, Result};
use crate::namer::NameTemplates;

/// Sentinel meaning "no limit configured" for byte-size limits.
pub const UNSPECIFIED_SIZE: u64 = 0;

/// Output file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    /// SQL text (`INSERT` statements)
    #[default]
    Sql,
    /// Comma(or custom)-separated values
    Csv,
}

impl FileFormat {
    /// Extension for this format, including the leading dot.
    pub fn extension(&self) -> &'static str {
        match self {
            FileFormat::Sql => ".sql",
            FileFormat::Csv => ".csv",
        }
    }
}

impl std::fmt::Display for FileFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileFormat::Sql => write!(f, "sql"),
            FileFormat::Csv => write!(f, "csv"),
        }
    }
}

/// Kind of MySQL-compatible server being dumped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerType {
    /// Oracle MySQL
    #[default]
    MySql,
    /// MariaDB
    MariaDb,
    /// TiDB
    TiDb,
    /// Unrecognized server
    Unknown,
}

/// CSV rendering options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct CsvOptions {
    /// Byte string written between fields
    pub separator: String,
    /// Byte string wrapping string/binary fields; empty disables wrapping
    pub delimiter: String,
    /// Literal written for NULL values, without delimiters
    pub null_value: String,
    /// Skip the header row
    pub no_header: bool,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            separator: ",".to_string(),
            delimiter: "\"".to_string(),
            null_value: "\\N".to_string(),
            no_header: false,
        }
    }
}

/// Resolved dump configuration, immutable for the duration of a dump.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct DumpConfig {
    /// Target output format
    pub file_type: FileFormat,
    /// Rotate output files once this many bytes were accounted;
    /// [`UNSPECIFIED_SIZE`] disables rotation
    pub file_size_limit: u64,
    /// Close an `INSERT` statement once it reaches this many bytes;
    /// [`UNSPECIFIED_SIZE`] disables the limit
    pub statement_size_limit: u64,
    /// Escape with backslashes instead of quote doubling (affects SQL and CSV)
    pub escape_backslash: bool,
    /// CSV options, used when `file_type` is CSV
    pub csv: CsvOptions,
    /// Always emit the column list in `INSERT` statements
    pub complete_insert: bool,
    /// Order rows by primary key (or `_tidb_rowid` on TiDB)
    pub sort_by_pk: bool,
    /// Free-form row filter appended as a `WHERE` condition
    pub where_clause: Option<String>,
    /// Full query override; mutually exclusive with `where_clause`
    pub sql: Option<String>,
    /// Kind of server being dumped
    pub server_type: ServerType,
    /// Output filename templates
    pub output_templates: NameTemplates,
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self {
            file_type: FileFormat::Sql,
            file_size_limit: UNSPECIFIED_SIZE,
            statement_size_limit: UNSPECIFIED_SIZE,
            escape_backslash: false,
            csv: CsvOptions::default(),
            complete_insert: false,
            sort_by_pk: true,
            where_clause: None,
            sql: None,
            server_type: ServerType::MySql,
            output_templates: NameTemplates::default(),
        }
    }
}

impl DumpConfig {
    /// Validate cross-field constraints. Must be called once after the
    /// configuration is resolved and before the dump starts.
    pub fn validate(&self) -> Result<()> {
        if self.sql.is_some() && self.where_clause.is_some() {
            return Err(DumpError::config(
                "can't specify both a query override and a where condition; \
                 combine them into the query",
            ));
        }
        if self.file_type == FileFormat::Csv && self.csv.separator.is_empty() {
            return Err(DumpError::config("CSV separator must not be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(DumpConfig::default().validate().is_ok());
    }

    #[test]
    fn test_sql_and_where_are_exclusive() {
        let config = DumpConfig {
            sql: Some("SELECT * FROM t".to_string()),
            where_clause: Some("id > 10".to_string()),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, DumpError::Config(_)));
    }

    #[test]
    fn test_csv_requires_separator() {
        let config = DumpConfig {
            file_type: FileFormat::Csv,
            csv: CsvOptions {
                separator: String::new(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_format_extensions() {
        assert_eq!(FileFormat::Sql.extension(), ".sql");
        assert_eq!(FileFormat::Csv.extension(), ".csv");
    }
}

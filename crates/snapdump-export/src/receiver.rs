//! Typed row receivers
//!
//! A [`RowReceiver`] is built once per query from the column type list and
//! re-bound for every row, reusing its slot allocations. Each slot renders
//! the raw driver bytes of one column into the SQL or CSV wire form.
//!
//! Escaping notes:
//!
//! - With `escape_backslash` enabled, NUL, LF, CR, ^Z, `'` and `\` are
//!   backslash-escaped; disabled, only `'` is doubled and every other byte
//!   passes through raw, including NUL inside BINARY columns. This
//!   reproduces the upstream dump dialect as-is.
//! - CSV delimiter occurrences inside a field are `\`-prefixed when
//!   `escape_backslash` is enabled and doubled otherwise. This is not RFC
//!   4180; it is the dialect `LOAD DATA` understands.
//! - Binary values become lowercase `x'…'` hex literals.

use mysql_async::{Row, Value};

use crate::config::CsvOptions;
use crate::error::{DumpError, Result};

/// Column family deciding how a value is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    /// Numeric text, written without quoting
    Number,
    /// Character data, single-quoted in SQL and delimited in CSV
    Quoted,
    /// Binary data, written as a hex literal in SQL
    Bytes,
}

/// Map an uppercase database type name to its slot kind.
///
/// Unknown type names fall back to [`SlotKind::Quoted`], which is always
/// reloadable.
pub fn slot_kind_for(col_type: &str) -> SlotKind {
    match col_type {
        "INTEGER" | "BIGINT" | "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "INT1" | "INT2"
        | "INT3" | "INT8" | "FLOAT" | "REAL" | "DOUBLE" | "DOUBLE PRECISION" | "DECIMAL"
        | "NUMERIC" | "FIXED" | "BOOL" | "BOOLEAN" | "YEAR" | "SQL_TSI_YEAR" => SlotKind::Number,
        "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BINARY" | "VARBINARY" | "BIT"
        | "GEOMETRY" => SlotKind::Bytes,
        _ => SlotKind::Quoted,
    }
}

/// One column position of a [`RowReceiver`].
#[derive(Debug)]
pub struct Slot {
    kind: SlotKind,
    buf: Vec<u8>,
    is_null: bool,
}

impl Slot {
    fn new(kind: SlotKind) -> Self {
        Self {
            kind,
            buf: Vec::new(),
            is_null: true,
        }
    }

    /// Whether the most recently decoded value was NULL.
    pub fn is_null(&self) -> bool {
        self.is_null
    }

    fn feed(&mut self, value: Option<&[u8]>) {
        match value {
            None => self.is_null = true,
            Some(bytes) => {
                self.is_null = false;
                self.buf.clear();
                self.buf.extend_from_slice(bytes);
            }
        }
    }

    fn feed_value(&mut self, value: Option<&Value>) {
        self.is_null = false;
        self.buf.clear();
        match value {
            None | Some(Value::NULL) => self.is_null = true,
            Some(Value::Bytes(b)) => self.buf.extend_from_slice(b),
            Some(Value::Int(n)) => self.buf.extend_from_slice(n.to_string().as_bytes()),
            Some(Value::UInt(n)) => self.buf.extend_from_slice(n.to_string().as_bytes()),
            Some(Value::Float(f)) => self.buf.extend_from_slice(f.to_string().as_bytes()),
            Some(Value::Double(d)) => self.buf.extend_from_slice(d.to_string().as_bytes()),
            // Temporal variants only appear on the binary protocol; the
            // dump queries run over the text protocol and arrive as Bytes.
            Some(Value::Date(y, mo, d, h, mi, s, us)) => {
                let mut text = format!("{:04}-{:02}-{:02} {:02}:{:02}:{:02}", y, mo, d, h, mi, s);
                if *us != 0 {
                    text.push_str(&format!(".{:06}", us));
                }
                self.buf.extend_from_slice(text.as_bytes());
            }
            Some(Value::Time(neg, days, h, mi, s, us)) => {
                let sign = if *neg { "-" } else { "" };
                let hours = days * 24 + u32::from(*h);
                let mut text = format!("{}{:02}:{:02}:{:02}", sign, hours, mi, s);
                if *us != 0 {
                    text.push_str(&format!(".{:06}", us));
                }
                self.buf.extend_from_slice(text.as_bytes());
            }
        }
    }

    fn write_sql(&self, out: &mut Vec<u8>, escape_backslash: bool) {
        if self.is_null {
            out.extend_from_slice(b"NULL");
            return;
        }
        match self.kind {
            SlotKind::Number => out.extend_from_slice(&self.buf),
            SlotKind::Quoted => {
                out.push(b'\'');
                escape_sql_into(&self.buf, out, escape_backslash);
                out.push(b'\'');
            }
            SlotKind::Bytes => {
                out.extend_from_slice(b"x'");
                out.extend_from_slice(hex::encode(&self.buf).as_bytes());
                out.push(b'\'');
            }
        }
    }

    fn write_csv(&self, out: &mut Vec<u8>, escape_backslash: bool, opt: &CsvOptions) {
        if self.is_null {
            out.extend_from_slice(opt.null_value.as_bytes());
            return;
        }
        match self.kind {
            SlotKind::Number => out.extend_from_slice(&self.buf),
            SlotKind::Quoted | SlotKind::Bytes => {
                write_csv_field(&self.buf, out, escape_backslash, opt.delimiter.as_bytes());
            }
        }
    }
}

/// Ordered sequence of slots matching a query's column types.
#[derive(Debug)]
pub struct RowReceiver {
    slots: Vec<Slot>,
}

impl RowReceiver {
    /// Build a receiver for the given uppercase column type names.
    pub fn from_column_types(col_types: &[String]) -> Self {
        Self {
            slots: col_types
                .iter()
                .map(|t| Slot::new(slot_kind_for(t)))
                .collect(),
        }
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the receiver has no slots.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Re-bind the receiver from a driver row.
    pub fn bind_row(&mut self, row: &Row) -> Result<()> {
        if row.len() != self.slots.len() {
            return Err(DumpError::scan(format!(
                "column count mismatch: query returned {}, receiver expects {}",
                row.len(),
                self.slots.len()
            )));
        }
        for (i, slot) in self.slots.iter_mut().enumerate() {
            slot.feed_value(row.as_ref(i));
        }
        Ok(())
    }

    /// Re-bind the receiver from raw column bytes (None = NULL).
    pub(crate) fn bind_values<V: AsRef<[u8]>>(&mut self, values: &[Option<V>]) -> Result<()> {
        if values.len() != self.slots.len() {
            return Err(DumpError::scan(format!(
                "column count mismatch: row has {}, receiver expects {}",
                values.len(),
                self.slots.len()
            )));
        }
        for (slot, value) in self.slots.iter_mut().zip(values) {
            slot.feed(value.as_ref().map(|v| v.as_ref()));
        }
        Ok(())
    }

    /// Append the row as a parenthesized SQL value tuple.
    pub fn write_sql(&self, out: &mut Vec<u8>, escape_backslash: bool) {
        out.push(b'(');
        for (i, slot) in self.slots.iter().enumerate() {
            if i > 0 {
                out.push(b',');
            }
            slot.write_sql(out, escape_backslash);
        }
        out.push(b')');
    }

    /// Append the row as a CSV record, without the line terminator.
    pub fn write_csv(&self, out: &mut Vec<u8>, escape_backslash: bool, opt: &CsvOptions) {
        for (i, slot) in self.slots.iter().enumerate() {
            if i > 0 {
                out.extend_from_slice(opt.separator.as_bytes());
            }
            slot.write_csv(out, escape_backslash, opt);
        }
    }
}

fn escape_sql_into(s: &[u8], out: &mut Vec<u8>, escape_backslash: bool) {
    if escape_backslash {
        for &b in s {
            match b {
                0 => out.extend_from_slice(b"\\0"),
                b'\n' => out.extend_from_slice(b"\\n"),
                b'\r' => out.extend_from_slice(b"\\r"),
                0x1a => out.extend_from_slice(b"\\Z"),
                b'\'' => out.extend_from_slice(b"\\'"),
                b'\\' => out.extend_from_slice(b"\\\\"),
                _ => out.push(b),
            }
        }
    } else {
        for &b in s {
            if b == b'\'' {
                out.extend_from_slice(b"''");
            } else {
                out.push(b);
            }
        }
    }
}

/// Write one delimited CSV field, escaping embedded delimiters.
pub(crate) fn write_csv_field(
    field: &[u8],
    out: &mut Vec<u8>,
    escape_backslash: bool,
    delimiter: &[u8],
) {
    if delimiter.is_empty() {
        out.extend_from_slice(field);
        return;
    }
    out.extend_from_slice(delimiter);
    let mut i = 0;
    while i < field.len() {
        if field[i..].starts_with(delimiter) {
            if escape_backslash {
                out.push(b'\\');
                out.extend_from_slice(delimiter);
            } else {
                out.extend_from_slice(delimiter);
                out.extend_from_slice(delimiter);
            }
            i += delimiter.len();
        } else {
            out.push(field[i]);
            i += 1;
        }
    }
    out.extend_from_slice(delimiter);
}

//! Permissive codec for the comma-delimited flow dialect.
//!
//! `parse_document` never fails: it tokenizes whatever it is given and leaves
//! classification of bad rows to the validator. `serialize_row` quotes any
//! field containing the delimiter, a quote, or a newline, doubling embedded
//! quotes, so `parse(serialize(r)) == r` for every row this codec produces.

use crate::columns::{COLUMN_COUNT, HEADER};

pub const DELIMITER: char = ',';

/// One raw row: untyped string columns, possibly not 26 of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    pub fields: Vec<String>,
}

impl RawRow {
    pub fn new(fields: Vec<String>) -> Self {
        Self { fields }
    }

    /// A well-formed empty row: 26 empty columns.
    pub fn blank() -> Self {
        Self {
            fields: vec![String::new(); COLUMN_COUNT],
        }
    }

    /// Column accessor that treats missing columns as empty.
    pub fn get(&self, index: usize) -> &str {
        self.fields.get(index).map(String::as_str).unwrap_or("")
    }

    /// Set a column, padding with empty fields if the row is short.
    pub fn set(&mut self, index: usize, value: impl Into<String>) {
        if self.fields.len() <= index {
            self.fields.resize(index + 1, String::new());
        }
        self.fields[index] = value.into();
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Tokenize delimited text into raw rows. Never fails.
///
/// One physical line per row, except that a quoted field may contain embedded
/// newlines and delimiters. `""` inside a quoted field unescapes to `"`.
/// Blank lines produce no row. Column counts are not enforced here.
pub fn parse_document(text: &str) -> Vec<RawRow> {
    let mut rows = Vec::new();
    let mut fields: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    // A quote only opens a quoted section at the start of a field; a stray
    // quote mid-field is kept literally.
    let mut at_field_start = true;

    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' => {
                    if chars.peek() == Some(&'"') {
                        chars.next();
                        field.push('"');
                    } else {
                        in_quotes = false;
                    }
                }
                other => field.push(other),
            }
            continue;
        }
        match c {
            '"' if at_field_start => {
                in_quotes = true;
                at_field_start = false;
            }
            DELIMITER => {
                fields.push(std::mem::take(&mut field));
                at_field_start = true;
            }
            '\r' => {
                // swallowed; \r\n and bare \r both end the line at the \n
                // or at the next char
                if chars.peek() != Some(&'\n') {
                    end_row(&mut rows, &mut fields, &mut field);
                    at_field_start = true;
                }
            }
            '\n' => {
                end_row(&mut rows, &mut fields, &mut field);
                at_field_start = true;
            }
            other => {
                field.push(other);
                at_field_start = false;
            }
        }
    }
    end_row(&mut rows, &mut fields, &mut field);
    rows
}

fn end_row(rows: &mut Vec<RawRow>, fields: &mut Vec<String>, field: &mut String) {
    if fields.is_empty() && field.is_empty() {
        return; // blank line
    }
    fields.push(std::mem::take(field));
    rows.push(RawRow::new(std::mem::take(fields)));
}

fn needs_quoting(field: &str) -> bool {
    field.contains(DELIMITER) || field.contains('"') || field.contains('\n') || field.contains('\r')
}

fn quote_field(field: &str) -> String {
    let mut out = String::with_capacity(field.len() + 2);
    out.push('"');
    for c in field.chars() {
        if c == '"' {
            out.push('"');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Serialize one row, quoting where required.
pub fn serialize_row(row: &RawRow) -> String {
    let mut out = String::new();
    for (i, field) in row.fields.iter().enumerate() {
        if i > 0 {
            out.push(DELIMITER);
        }
        if needs_quoting(field) {
            out.push_str(&quote_field(field));
        } else {
            out.push_str(field);
        }
    }
    out
}

/// Serialize a document body with the canonical header row on top.
pub fn serialize_document(rows: &[RawRow]) -> String {
    let mut out = header_row_text();
    for row in rows {
        out.push('\n');
        out.push_str(&serialize_row(row));
    }
    out.push('\n');
    out
}

fn header_row_text() -> String {
    HEADER.join(",")
}

/// Detect and strip a leading header row (recognized by column 0 == `id`).
/// Returns the body rows and whether a header was present.
pub fn split_header(mut rows: Vec<RawRow>) -> (Vec<RawRow>, bool) {
    let has_header = rows.first().map(|r| r.get(0) == "id").unwrap_or(false);
    if has_header {
        rows.remove(0);
    }
    (rows, has_header)
}

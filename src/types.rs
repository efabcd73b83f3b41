//! Core data model: cell values and in-memory tables.
//!
//! Tables are schema-less: the column list is whatever the source file's header row says,
//! normalized (trimmed and lower-cased) at construction so lookups are case- and
//! whitespace-insensitive.

use std::borrow::Cow;
use std::collections::HashSet;
use std::fmt;

/// A single cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Missing/empty value.
    Null,
    /// 64-bit signed integer.
    Int64(i64),
    /// 64-bit float.
    Float64(f64),
    /// Boolean.
    Bool(bool),
    /// UTF-8 string.
    Utf8(String),
}

impl Value {
    /// Text form of the value as a user would read it in the spreadsheet.
    ///
    /// Whole floats print without a fractional part (`12.0` -> `12`), NaN prints `nan`, and
    /// `Null` prints the empty string.
    pub fn as_text(&self) -> Cow<'_, str> {
        match self {
            Value::Null => Cow::Borrowed(""),
            Value::Utf8(s) => Cow::Borrowed(s.as_str()),
            Value::Int64(i) => Cow::Owned(i.to_string()),
            Value::Float64(f) => Cow::Owned(float_text(*f)),
            Value::Bool(b) => Cow::Owned(b.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_text())
    }
}

fn float_text(f: f64) -> String {
    if f.is_nan() {
        "nan".to_string()
    } else if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 {
        (f as i64).to_string()
    } else {
        f.to_string()
    }
}

/// Normalize a raw header cell into a column name: trimmed, lower-cased, BOM stripped.
pub fn normalize_column_name(raw: &str) -> String {
    raw.trim_start_matches('\u{feff}').trim().to_lowercase()
}

/// Normalize a cell into a partition/identity key.
///
/// Returns `None` when the value is missing: `Null`, blank, or the literal `nan`
/// (any case). Otherwise returns the trimmed, lower-cased text.
pub fn normalize_key(value: &Value) -> Option<String> {
    let text = value.as_text();
    let key = text.trim().to_lowercase();
    if key.is_empty() || key == "nan" {
        None
    } else {
        Some(key)
    }
}

/// In-memory tabular data.
///
/// Rows are stored as `Vec<Vec<Value>>` in the same order as [`Table::columns`]. Every row has
/// exactly `columns.len()` cells.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    /// Normalized, unique column names in source order.
    pub columns: Vec<String>,
    /// Row-major value storage.
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    /// Create a table from raw header cells and rows.
    ///
    /// Header cells are normalized with [`normalize_column_name`]; blank headers become
    /// `unnamed: <index>` and duplicates get a `.1`, `.2`, ... suffix. Rows are padded with
    /// `Null` or truncated to the header width.
    pub fn new<S: AsRef<str>>(headers: &[S], rows: Vec<Vec<Value>>) -> Self {
        let columns = unique_columns(headers);
        let width = columns.len();
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, Value::Null);
                row
            })
            .collect();
        Self { columns, rows }
    }

    /// Number of rows in the table.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns the index of a column by (normalized) name, if present.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        let name = normalize_column_name(name);
        self.columns.iter().position(|c| *c == name)
    }

    /// Cell at `row`, `col`, or `Null` when out of range.
    pub fn cell(&self, row: usize, col: usize) -> &Value {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .unwrap_or(&Value::Null)
    }

    /// Build a sub-table from row indices, preserving the given order.
    ///
    /// Out-of-range indices are skipped.
    pub fn select_rows(&self, indices: &[usize]) -> Self {
        let rows = indices
            .iter()
            .filter_map(|&i| self.rows.get(i).cloned())
            .collect();
        Self {
            columns: self.columns.clone(),
            rows,
        }
    }

    /// Return a copy of the table with column `name` set to `values`.
    ///
    /// An existing column with the same normalized name is overwritten in place; otherwise the
    /// column is appended. `values` must yield one value per row; missing values are filled with
    /// `Null`.
    pub fn with_column(&self, name: &str, values: Vec<Value>) -> Self {
        let mut values = values.into_iter();
        match self.index_of(name) {
            Some(idx) => {
                let rows = self
                    .rows
                    .iter()
                    .map(|row| {
                        let mut out = row.clone();
                        let value = values.next().unwrap_or(Value::Null);
                        if let Some(cell) = out.get_mut(idx) {
                            *cell = value;
                        }
                        out
                    })
                    .collect();
                Self {
                    columns: self.columns.clone(),
                    rows,
                }
            }
            None => {
                let mut headers = self.columns.clone();
                headers.push(name.to_string());
                let rows = self
                    .rows
                    .iter()
                    .map(|row| {
                        let mut out = row.clone();
                        out.push(values.next().unwrap_or(Value::Null));
                        out
                    })
                    .collect();
                Self::new(&headers, rows)
            }
        }
    }
}

fn unique_columns<S: AsRef<str>>(headers: &[S]) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::with_capacity(headers.len());
    let mut out = Vec::with_capacity(headers.len());
    for (idx, raw) in headers.iter().enumerate() {
        let mut name = normalize_column_name(raw.as_ref());
        if name.is_empty() {
            name = format!("unnamed: {idx}");
        }
        if seen.contains(&name) {
            let base = name.clone();
            let mut n = 1usize;
            while seen.contains(&name) {
                name = format!("{base}.{n}");
                n += 1;
            }
        }
        seen.insert(name.clone());
        out.push(name);
    }
    out
}
